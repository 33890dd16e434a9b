//! The canonical classifier input.

use burn::prelude::*;
use image::{GrayImage, Luma};
use ndarray::{s, Array2, Array4, ArrayView2};

use crate::error::{CoreError, Result};

/// Side length of the canonical canvas.
pub const CANVAS_SIZE: usize = 28;

/// Shape of the canonical tensor: `(batch, height, width, channels)`.
pub const CANONICAL_SHAPE: [usize; 4] = [1, CANVAS_SIZE, CANVAS_SIZE, 1];

/// Row/column the intensity-weighted centroid is moved to.
pub const CANVAS_CENTER: f32 = 13.5;

/// A preprocessed digit ready for the classifier.
///
/// Always has shape `(1, 28, 28, 1)` with every value in `[0, 1]`. The
/// all-zero tensor is the "no digit detected" sentinel, a valid input that the
/// model simply classifies with low confidence.
///
/// # Example
///
/// ```rust
/// use vforge_core::CanonicalTensor;
///
/// let blank = CanonicalTensor::zeros();
/// assert!(blank.is_blank());
/// assert_eq!(blank.as_array().shape(), &[1, 28, 28, 1]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTensor {
    data: Array4<f32>,
}

impl CanonicalTensor {
    /// The all-zero tensor.
    #[must_use]
    pub fn zeros() -> Self {
        Self {
            data: Array4::zeros(CANONICAL_SHAPE),
        }
    }

    /// Wrap a `(1, 28, 28, 1)` array.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape differs or any value lies outside `[0, 1]`.
    pub fn from_array(data: Array4<f32>) -> Result<Self> {
        if data.shape() != CANONICAL_SHAPE {
            return Err(CoreError::InvalidShape {
                expected: format!("{:?}", CANONICAL_SHAPE),
                got: format!("{:?}", data.shape()),
            });
        }
        if let Some(bad) = data.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(CoreError::InvalidShape {
                expected: "values in [0, 1]".to_string(),
                got: format!("value {bad}"),
            });
        }
        Ok(Self { data })
    }

    /// Build from a 28×28 grid of intensities in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid is not 28×28 or holds out-of-range values.
    pub fn from_pixels(pixels: Array2<f32>) -> Result<Self> {
        let (h, w) = pixels.dim();
        let data = pixels
            .into_shape_with_order((1, h, w, 1))
            .map_err(|e| CoreError::InvalidShape {
                expected: format!("{:?}", CANONICAL_SHAPE),
                got: e.to_string(),
            })?;
        Self::from_array(data)
    }

    /// The underlying `(1, 28, 28, 1)` array.
    #[must_use]
    pub const fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// Consume and return the underlying array.
    #[must_use]
    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    /// A 28×28 view without the batch and channel axes.
    #[must_use]
    pub fn pixels(&self) -> ArrayView2<'_, f32> {
        self.data.slice(s![0, .., .., 0])
    }

    /// Whether every value is exactly zero.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Intensity-weighted centroid as `(row, column)`, or `None` when blank.
    #[must_use]
    pub fn centroid(&self) -> Option<(f32, f32)> {
        let mut total = 0.0f64;
        let mut row_sum = 0.0f64;
        let mut col_sum = 0.0f64;
        for ((row, col), &v) in self.pixels().indexed_iter() {
            let v = f64::from(v);
            total += v;
            row_sum += row as f64 * v;
            col_sum += col as f64 * v;
        }
        if total <= 0.0 {
            return None;
        }
        Some(((row_sum / total) as f32, (col_sum / total) as f32))
    }

    /// Convert to a burn tensor in NCHW layout, shape `(1, 1, 28, 28)`.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        // With a single channel NHWC and NCHW share the same element order.
        let values: Vec<f32> = self.data.iter().copied().collect();
        let data = TensorData::new(values, [1, 1, CANVAS_SIZE, CANVAS_SIZE]);
        Tensor::from_data(data, device)
    }

    /// Render as an 8-bit grayscale image, white strokes on black.
    #[must_use]
    pub fn to_gray_image(&self) -> GrayImage {
        let pixels = self.pixels();
        GrayImage::from_fn(CANVAS_SIZE as u32, CANVAS_SIZE as u32, |x, y| {
            let v = pixels[[y as usize, x as usize]];
            Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }
}

impl Default for CanonicalTensor {
    fn default() -> Self {
        Self::zeros()
    }
}
