//! Numeric policy of the normalization pipeline.

use serde::{Deserialize, Serialize};
use vforge_core::CANVAS_SIZE;

use crate::error::{PreprocessError, Result};

/// Configuration for [`normalize_with`](crate::normalize_with).
///
/// The defaults reproduce the canonical MNIST-style normalization; every field
/// maps to one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// CLAHE clip limit, relative to a uniform histogram.
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis.
    pub clahe_tiles: u32,
    /// Lowest foreground fraction at which the Otsu result is kept.
    pub otsu_min_foreground: f32,
    /// Highest foreground fraction at which the Otsu result is kept.
    pub otsu_max_foreground: f32,
    /// Side of the Gaussian neighbourhood for the adaptive fallback (odd).
    pub adaptive_block_size: u32,
    /// Margin a pixel must exceed its local mean by to count as foreground.
    pub adaptive_offset: f32,
    /// Fewer surviving foreground pixels than this means "no digit".
    pub min_foreground_pixels: usize,
    /// Bridge small stroke gaps with a morphological closing.
    pub close_gaps: bool,
    /// Padding added around the digit bounding box.
    pub bbox_padding: u32,
    /// Side of the square cell the digit is fitted into.
    pub cell_size: u32,
    /// Sigma of the anti-aliasing blur (3×3 kernel).
    pub blur_sigma: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_tiles: 4,
            otsu_min_foreground: 0.01,
            otsu_max_foreground: 0.9,
            adaptive_block_size: 11,
            adaptive_offset: 2.0,
            min_foreground_pixels: 10,
            close_gaps: true,
            bbox_padding: 2,
            cell_size: 20,
            blur_sigma: 0.5,
        }
    }
}

impl PipelineConfig {
    /// Check that every step can run with these values.
    ///
    /// # Errors
    ///
    /// Returns [`PreprocessError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.clahe_tiles == 0 {
            return Err(invalid("clahe_tiles must be positive"));
        }
        if self.otsu_min_foreground > self.otsu_max_foreground {
            return Err(invalid("otsu_min_foreground exceeds otsu_max_foreground"));
        }
        if self.adaptive_block_size < 3 || self.adaptive_block_size % 2 == 0 {
            return Err(invalid("adaptive_block_size must be odd and >= 3"));
        }
        if self.cell_size == 0 || self.cell_size as usize > CANVAS_SIZE {
            return Err(invalid("cell_size must lie in 1..=28"));
        }
        if !(self.blur_sigma.is_finite() && self.blur_sigma > 0.0) {
            return Err(invalid("blur_sigma must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> PreprocessError {
    PreprocessError::InvalidConfig(message.to_string())
}
