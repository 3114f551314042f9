use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};

use crate::error::PreprocessingError;
use crate::volume::Volume;

/// Spatial resolution the segmentation network was trained on.
pub const MODEL_INPUT_SIZE: usize = 128;

type PlaneBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Converts volume planes into model-ready slices.
///
/// Steps:
/// 1. Extract the 2-D plane at the requested depth index (clamped)
/// 2. Resize to the model's fixed spatial resolution
/// 3. Normalize intensity to [0, 1] by the per-slice maximum
pub struct Preprocessor {
    size: u32,
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Resize a raw intensity plane to (size, size) without normalizing.
    ///
    /// Volume-mode batches are normalized once by their global maximum, so
    /// the resample step must leave raw intensities alone. The resampler
    /// clamps float samples to [0, 1], so it runs on a unit-scaled copy
    /// which is scaled back afterwards; bilinear filtering is linear, so
    /// the result is the resize of the raw plane.
    pub fn resize_plane(&self, plane: ArrayView2<'_, f32>) -> Array2<f32> {
        let (height, width) = plane.dim();
        let max = plane.fold(0.0f32, |acc, &v| acc.max(v));
        let scale = if max > 0.0 { max } else { 1.0 };

        let buffer = PlaneBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([plane[[y as usize, x as usize]] / scale])
        });
        let resized = imageops::resize(&buffer, self.size, self.size, FilterType::Triangle);

        let side = self.size as usize;
        Array2::from_shape_fn((side, side), |(y, x)| {
            resized.get_pixel(x as u32, y as u32)[0] * scale
        })
    }

    /// Extract, resize, and normalize the slice at `slice_index`.
    ///
    /// Out-of-range indices clamp to the last slice. An all-zero slice
    /// stays all-zero.
    pub fn prepare(&self, volume: &Volume, slice_index: usize) -> Array2<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let mut slice = self.resize_plane(volume.plane(slice_index));

        let max = slice.fold(0.0f32, |acc, &v| acc.max(v));
        if max > 0.0 {
            slice.mapv_inplace(|v| v / max);
        }

        slice
    }

    /// Open `path` and prepare the slice at `slice_index`.
    ///
    /// I/O and decode failures surface as an error; callers must not
    /// substitute a zero slice for a file that failed to read.
    pub fn prepare_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        slice_index: usize,
    ) -> Result<Array2<f32>, PreprocessingError> {
        let volume = Volume::open(path)?;
        Ok(self.prepare(&volume, slice_index))
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(MODEL_INPUT_SIZE as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp_volume(height: usize, width: usize, depth: usize) -> Volume {
        let data = Array3::from_shape_fn((height, width, depth), |(y, x, z)| {
            (y * width + x + z) as f32
        });
        Volume::from_array(data)
    }

    #[test]
    fn output_shape_is_fixed_regardless_of_native_resolution() {
        let preprocessor = Preprocessor::default();

        for (h, w) in [(240, 240), (64, 96), (7, 300)] {
            let slice = preprocessor.prepare(&ramp_volume(h, w, 4), 1);
            assert_eq!(slice.dim(), (MODEL_INPUT_SIZE, MODEL_INPUT_SIZE));
        }
    }

    #[test]
    fn normalized_values_stay_in_unit_range() {
        let preprocessor = Preprocessor::default();
        let slice = preprocessor.prepare(&ramp_volume(50, 60, 3), 0);

        let max = slice.fold(0.0f32, |acc, &v| acc.max(v));
        let min = slice.fold(f32::INFINITY, |acc, &v| acc.min(v));
        assert!(max <= 1.0 + 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
        assert!(min >= 0.0);
    }

    #[test]
    fn all_zero_slice_stays_all_zero() {
        let preprocessor = Preprocessor::default();
        let volume = Volume::from_array(Array3::zeros((30, 30, 2)));

        let slice = preprocessor.prepare(&volume, 0);
        assert!(slice.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn out_of_range_index_degrades_to_last_slice() {
        let preprocessor = Preprocessor::default();
        let mut data = Array3::<f32>::zeros((16, 16, 5));
        data.index_axis_mut(ndarray::Axis(2), 4).fill(3.0);
        let volume = Volume::from_array(data);

        let clamped = preprocessor.prepare(&volume, 500);
        let last = preprocessor.prepare(&volume, 4);
        assert_eq!(clamped, last);
        assert!(clamped.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn resize_plane_keeps_raw_intensity_scale() {
        let preprocessor = Preprocessor::default();
        let volume = Volume::from_array(Array3::from_elem((40, 40, 1), 500.0));

        let resized = preprocessor.resize_plane(volume.plane(0));
        assert!(resized.iter().all(|&v| (v - 500.0).abs() < 1e-2));
    }

    #[test]
    fn resize_preserves_intensity_ordering() {
        let preprocessor = Preprocessor::default();
        // Left half dim, right half bright.
        let data = Array3::from_shape_fn((64, 64, 1), |(_, x, _)| {
            if x < 32 {
                10.0
            } else {
                100.0
            }
        });
        let slice = preprocessor.prepare(&Volume::from_array(data), 0);

        assert!(slice[[64, 8]] < slice[[64, 120]]);
    }
}
