//! AI-assisted segmentation of brain MRI slices into tumor sub-regions.
//!
//! The crate covers the inference pipeline only: loading the pretrained
//! segmentation network despite container format drift, turning NIfTI
//! volumes into model-ready tensors, running the network per slice or per
//! slice range, and reducing class maps to coverage statistics. Uploads,
//! rendering, and history belong to the calling layer, which interacts
//! through [`SegmentationService`] and the pure helpers re-exported here.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod service;
pub mod stats;
pub mod volume;

pub use engine::{
    build_batch, class_map_for, InferenceEngine, SlicePrediction, INPUT_CHANNELS, NUM_CLASSES,
    VOLUME_SLICES, VOLUME_START_AT,
};
pub use error::{InferenceError, ModelLoadError, PredictError, PreprocessingError};
pub use model::{load_model, LoadedModel};
pub use preprocess::{Preprocessor, MODEL_INPUT_SIZE};
pub use service::{ModelStatus, SegmentationService};
pub use stats::{aggregate, summarize, Assessment, ClassStatistics, TumorClass, TumorSummary};
pub use volume::Volume;
