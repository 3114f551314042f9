use std::path::Path;

use anyhow::Context;
use ort::{GraphOptimizationLevel, Session, SessionBuilder, ValueType};

use super::compat;
use crate::error::{LoadAttempt, ModelLoadError};

const INTRA_THREADS: usize = 4;

/// A ready-to-use segmentation network.
///
/// Loaded once at process start and shared read-only afterwards; the
/// inference engine owns the session from then on.
pub struct LoadedModel {
    pub(crate) session: Session,
    input_dims: Vec<i64>,
    output_dims: Vec<i64>,
}

impl LoadedModel {
    fn from_session(session: Session) -> Self {
        let input_dims = session
            .inputs
            .first()
            .map(|input| tensor_dimensions(&input.input_type))
            .unwrap_or_default();
        let output_dims = session
            .outputs
            .first()
            .map(|output| tensor_dimensions(&output.output_type))
            .unwrap_or_default();

        Self {
            session,
            input_dims,
            output_dims,
        }
    }

    /// Declared input tensor shape (-1 for dynamic axes).
    pub fn input_dims(&self) -> &[i64] {
        &self.input_dims
    }

    /// Declared output tensor shape (-1 for dynamic axes).
    pub fn output_dims(&self) -> &[i64] {
        &self.output_dims
    }
}

type Strategy = (&'static str, fn(&Path) -> anyhow::Result<Session>);

/// Ordered fallback chain. Each strategy starts from a clean slate; no
/// partially constructed state carries over from a failed attempt.
const STRATEGIES: [Strategy; 2] = [("direct", load_direct), ("container rewrite", load_rewritten)];

/// Deserialize the pretrained segmentation network at `path`.
///
/// Tries each load strategy in order and collects every failure cause, so a
/// model that no strategy can open yields one diagnostic naming all of
/// them. The winning strategy is logged together with the resolved tensor
/// shapes.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<LoadedModel, ModelLoadError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ModelLoadError::single(
            "direct",
            format!("model file not found: {}", path.display()),
        ));
    }

    let mut attempts = Vec::new();
    for (name, strategy) in STRATEGIES {
        match strategy(path) {
            Ok(session) => {
                let model = LoadedModel::from_session(session);
                tracing::info!(
                    "Segmentation model loaded ({} strategy), input shape {:?}, output shape {:?}",
                    name,
                    model.input_dims(),
                    model.output_dims()
                );
                return Ok(model);
            }
            Err(error) => {
                tracing::warn!("Model load strategy '{}' failed: {:#}", name, error);
                attempts.push(LoadAttempt {
                    strategy: name,
                    cause: format!("{error:#}"),
                });
            }
        }
    }

    Err(ModelLoadError { attempts })
}

fn builder() -> ort::Result<SessionBuilder> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(INTRA_THREADS)
}

/// Strategy 1: whole-container deserialization. Only the inference graph is
/// needed, so no training-only state is reconstructed.
fn load_direct(path: &Path) -> anyhow::Result<Session> {
    let session = builder()?
        .commit_from_file(path)
        .with_context(|| format!("failed to deserialize {}", path.display()))?;
    Ok(session)
}

/// Strategy 2: rewrite the container's drifted compatibility records, then
/// rebuild the session from the patched bytes.
fn load_rewritten(path: &Path) -> anyhow::Result<Session> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read model container {}", path.display()))?;
    let patched = compat::rewrite_container(&bytes)?;
    let session = builder()?
        .commit_from_memory(&patched)
        .context("failed to deserialize rewritten container")?;
    Ok(session)
}

fn tensor_dimensions(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { dimensions, .. } => dimensions.clone(),
        _ => Vec::new(),
    }
}
