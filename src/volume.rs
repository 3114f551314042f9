use std::path::Path;

use ndarray::{Array3, ArrayView2, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::PreprocessingError;

/// A 3-D medical image volume of raw scanner intensities, shape (H, W, D).
///
/// Read-only once constructed; slices are extracted along the depth axis.
pub struct Volume {
    data: Array3<f32>,
}

impl Volume {
    /// Read a NIfTI file (.nii or .nii.gz) into memory.
    ///
    /// Trailing singleton axes are squeezed so volumes exported with a unit
    /// time axis still load. Any other shape is a `PreprocessingError`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PreprocessingError> {
        let path = path.as_ref();

        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|source| PreprocessingError::Read {
                path: path.to_owned(),
                source,
            })?;

        let mut data = object.into_volume().into_ndarray::<f32>().map_err(|source| {
            PreprocessingError::Read {
                path: path.to_owned(),
                source,
            }
        })?;

        while data.ndim() > 3 && data.len_of(Axis(data.ndim() - 1)) == 1 {
            data = data.index_axis_move(Axis(data.ndim() - 1), 0);
        }

        let shape = data.shape().to_vec();
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|_| PreprocessingError::Shape {
                path: path.to_owned(),
                shape,
            })?;

        tracing::debug!(
            "Loaded volume {} with shape {:?}",
            path.display(),
            data.dim()
        );

        Ok(Self { data })
    }

    /// Construct a volume from an in-memory array.
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Number of slices along the depth axis.
    pub fn depth(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Volume shape as (height, width, depth).
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// The 2-D plane at the given depth index.
    ///
    /// Indices past the end clamp to the last slice: an out-of-range request
    /// degrades to "last available slice" instead of failing the request.
    pub fn plane(&self, index: usize) -> ArrayView2<'_, f32> {
        let clamped = index.min(self.depth().saturating_sub(1));
        self.data.index_axis(Axis(2), clamped)
    }
}
