use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn an input file into a model-ready slice.
///
/// These are per-request errors: one malformed input file fails that
/// request and nothing else. Out-of-range slice indices are *not* errors
/// (they clamp, see [`crate::volume::Volume::plane`]).
#[derive(Debug, Error)]
pub enum PreprocessingError {
    #[error("failed to read volume {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },

    #[error("volume {} has unsupported shape {shape:?}, expected a 3-D volume", .path.display())]
    Shape { path: PathBuf, shape: Vec<usize> },
}

/// Failure inside the forward pass itself, distinct from input processing.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("forward pass failed: {0}")]
    Execution(#[from] ort::Error),

    #[error("model produced output shape {got:?}, expected {expected:?}")]
    OutputShape { got: Vec<usize>, expected: Vec<usize> },

    #[error("inference session lock poisoned by a previous panic")]
    Poisoned,
}

/// Request-boundary error for the two inference operations.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("input processing failed: {0}")]
    Preprocessing(#[from] PreprocessingError),

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
}

/// One failed attempt in the model-load strategy chain.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    pub strategy: &'static str,
    pub cause: String,
}

/// Fatal model-load failure carrying the cause of every attempted strategy.
///
/// Startup must treat this as "model unavailable", not retry it.
#[derive(Debug)]
pub struct ModelLoadError {
    pub attempts: Vec<LoadAttempt>,
}

impl fmt::Display for ModelLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attempts.as_slice() {
            [only] => write!(f, "model load failed: {}", only.cause),
            attempts => {
                write!(f, "incompatible model version: ")?;
                for (i, attempt) in attempts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} load failed ({})", attempt.strategy, attempt.cause)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ModelLoadError {}

impl ModelLoadError {
    pub fn single(strategy: &'static str, cause: impl Into<String>) -> Self {
        Self {
            attempts: vec![LoadAttempt {
                strategy,
                cause: cause.into(),
            }],
        }
    }
}
