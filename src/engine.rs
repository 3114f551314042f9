use std::path::Path;
use std::sync::Mutex;

use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis, Ix4};
use ort::Session;

use crate::error::{InferenceError, PredictError};
use crate::model::LoadedModel;
use crate::preprocess::{Preprocessor, MODEL_INPUT_SIZE};
use crate::volume::Volume;

/// Tissue classes the network distinguishes.
pub const NUM_CLASSES: usize = 4;
/// Input channels: 0 = FLAIR, 1 = T1CE.
pub const INPUT_CHANNELS: usize = 2;
/// Default number of slices evaluated in volume mode.
pub const VOLUME_SLICES: usize = 100;
/// Default first slice evaluated in volume mode.
pub const VOLUME_START_AT: usize = 22;

/// Result of a single-slice forward pass.
pub struct SlicePrediction {
    /// Per-position class assignment, argmax of `probabilities`.
    pub class_map: Array2<u8>,
    /// Per-position distribution over the four classes, shape (S, S, 4).
    pub probabilities: Array3<f32>,
}

/// Runs the segmentation network over preprocessed slices.
///
/// The session is shared read-only across calls; the mutex exists because
/// the execution context is not reentrant-safe, and it covers only the
/// forward pass. Preprocessing has no shared state and runs outside it.
pub struct InferenceEngine {
    session: Mutex<Session>,
    preprocessor: Preprocessor,
}

impl InferenceEngine {
    pub fn new(model: LoadedModel) -> Self {
        Self {
            session: Mutex::new(model.session),
            preprocessor: Preprocessor::default(),
        }
    }

    /// Segment one slice of a co-registered FLAIR/T1CE pair.
    ///
    /// Each sequence is preprocessed independently at the same index; a
    /// failure in either one propagates as an input-processing error,
    /// distinct from a forward-pass failure.
    pub fn predict_slice(
        &self,
        flair: &Path,
        t1ce: &Path,
        slice_index: usize,
    ) -> Result<SlicePrediction, PredictError> {
        let flair_slice = self.preprocessor.prepare_file(flair, slice_index)?;
        let t1ce_slice = self.preprocessor.prepare_file(t1ce, slice_index)?;

        let side = MODEL_INPUT_SIZE;
        let mut input = Array4::<f32>::zeros((1, side, side, INPUT_CHANNELS));
        // Channel order is fixed by training: FLAIR first, T1CE second.
        input.slice_mut(s![0, .., .., 0]).assign(&flair_slice);
        input.slice_mut(s![0, .., .., 1]).assign(&t1ce_slice);

        let probabilities = self.forward(input)?.index_axis_move(Axis(0), 0);
        let class_map = class_map_for(probabilities.view());

        Ok(SlicePrediction {
            class_map,
            probabilities,
        })
    }

    /// Segment a contiguous range of slices in one batched forward pass.
    ///
    /// Both volumes are loaded once. Returns the (count, S, S, 4)
    /// probability batch.
    pub fn predict_volume(
        &self,
        flair: &Path,
        t1ce: &Path,
        start_index: usize,
        count: usize,
    ) -> Result<Array4<f32>, PredictError> {
        let flair_volume = Volume::open(flair)?;
        let t1ce_volume = Volume::open(t1ce)?;

        let batch = build_batch(
            &self.preprocessor,
            &flair_volume,
            &t1ce_volume,
            start_index,
            count,
        );

        Ok(self.forward(batch)?)
    }

    fn forward(&self, input: Array4<f32>) -> Result<Array4<f32>, InferenceError> {
        let _span = tracing::debug_span!("inference").entered();
        let batch = input.len_of(Axis(0));

        let probabilities = {
            let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
            let outputs = session.run(ort::inputs![input.view()]?)?;
            outputs[0].try_extract_tensor::<f32>()?.view().to_owned()
        };

        let got = probabilities.shape().to_vec();
        let expected = [batch, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, NUM_CLASSES];
        probabilities
            .into_dimensionality::<Ix4>()
            .ok()
            .filter(|p| p.shape() == expected)
            .ok_or_else(|| InferenceError::OutputShape {
                got,
                expected: expected.to_vec(),
            })
    }
}

/// Assemble the volume-mode input batch.
///
/// Slices past the end of a volume leave their batch slot at its zero
/// initialization; overrunning the scan is a quiet degradation, not an
/// error, and must stay that way. The finished batch is then normalized
/// once by its global maximum, a coarser rule than the per-slice
/// normalization used in single-slice mode.
pub fn build_batch(
    preprocessor: &Preprocessor,
    flair: &Volume,
    t1ce: &Volume,
    start_index: usize,
    count: usize,
) -> Array4<f32> {
    let side = MODEL_INPUT_SIZE;
    let mut batch = Array4::<f32>::zeros((count, side, side, INPUT_CHANNELS));

    for offset in 0..count {
        let index = start_index + offset;
        if index < flair.depth() {
            batch
                .slice_mut(s![offset, .., .., 0])
                .assign(&preprocessor.resize_plane(flair.plane(index)));
        }
        if index < t1ce.depth() {
            batch
                .slice_mut(s![offset, .., .., 1])
                .assign(&preprocessor.resize_plane(t1ce.plane(index)));
        }
    }

    let max = batch.fold(0.0f32, |acc, &v| acc.max(v));
    if max > 0.0 {
        batch.mapv_inplace(|v| v / max);
    }

    batch
}

/// Reduce a probability map to per-position argmax classes.
///
/// Ties break to the lowest class index.
pub fn class_map_for(probabilities: ArrayView3<'_, f32>) -> Array2<u8> {
    let (height, width, classes) = probabilities.dim();

    Array2::from_shape_fn((height, width), |(y, x)| {
        let mut best = 0usize;
        let mut best_value = probabilities[[y, x, 0]];
        for class in 1..classes {
            let value = probabilities[[y, x, class]];
            if value > best_value {
                best = class;
                best_value = value;
            }
        }
        best as u8
    })
}
