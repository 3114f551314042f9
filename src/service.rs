use std::path::Path;

use ndarray::Array4;
use serde::Serialize;

use crate::engine::{InferenceEngine, SlicePrediction};
use crate::error::PredictError;
use crate::model;

/// Outcome of the startup model load, kept for the lifetime of the process.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Ready,
    Unavailable { reason: String },
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

/// The inference core behind the request boundary.
///
/// Holds the model as a write-once handle: loaded during startup, shared
/// read-only afterwards. A failed load does not prevent startup; it is
/// recorded so every subsequent request is rejected with the same specific
/// reason instead of a generic failure.
pub struct SegmentationService {
    engine: Option<InferenceEngine>,
    status: ModelStatus,
}

impl SegmentationService {
    /// Load the segmentation model once and record the outcome.
    pub fn initialize<P: AsRef<Path>>(model_path: P) -> Self {
        match model::load_model(model_path.as_ref()) {
            Ok(model) => Self {
                engine: Some(InferenceEngine::new(model)),
                status: ModelStatus::Ready,
            },
            Err(error) => {
                tracing::error!("Model initialization failed: {}", error);
                Self {
                    engine: None,
                    status: ModelStatus::Unavailable {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    fn engine(&self) -> Result<&InferenceEngine, PredictError> {
        self.engine.as_ref().ok_or_else(|| {
            let reason = match &self.status {
                ModelStatus::Unavailable { reason } => reason.clone(),
                ModelStatus::Ready => "model not loaded".to_owned(),
            };
            PredictError::ModelUnavailable(reason)
        })
    }

    /// Segment one slice of a FLAIR/T1CE pair.
    pub fn infer_slice(
        &self,
        flair: &Path,
        t1ce: &Path,
        slice_index: usize,
    ) -> Result<SlicePrediction, PredictError> {
        self.engine()?.predict_slice(flair, t1ce, slice_index)
    }

    /// Segment a contiguous slice range, returning the probability batch.
    pub fn infer_volume(
        &self,
        flair: &Path,
        t1ce: &Path,
        start_index: usize,
        count: usize,
    ) -> Result<Array4<f32>, PredictError> {
        self.engine()?.predict_volume(flair, t1ce, start_index, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_load_is_recorded_not_fatal() {
        let service = SegmentationService::initialize("/nonexistent/best_model.onnx");

        assert!(!service.is_ready());
        match service.status() {
            ModelStatus::Unavailable { reason } => assert!(reason.contains("not found")),
            ModelStatus::Ready => panic!("service should not be ready"),
        }
    }

    #[test]
    fn every_request_reports_the_recorded_reason() {
        let service = SegmentationService::initialize("/nonexistent/best_model.onnx");

        for _ in 0..2 {
            let err = service
                .infer_slice(Path::new("flair.nii"), Path::new("t1ce.nii"), 75)
                .unwrap_err();
            match err {
                PredictError::ModelUnavailable(reason) => {
                    assert!(reason.contains("not found"));
                }
                other => panic!("expected ModelUnavailable, got {other}"),
            }
        }

        let err = service
            .infer_volume(Path::new("flair.nii"), Path::new("t1ce.nii"), 22, 100)
            .unwrap_err();
        assert!(matches!(err, PredictError::ModelUnavailable(_)));
    }
}
