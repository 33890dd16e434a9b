//! The end-to-end normalization pipeline.

use image::{DynamicImage, GrayImage};
use tracing::{debug, warn};
use vforge_core::{CanonicalTensor, CANVAS_CENTER, CANVAS_SIZE};

use crate::centering::{anti_alias, center_by_mass, to_unit_range};
use crate::components::keep_largest_component;
use crate::config::PipelineConfig;
use crate::contrast::{normalize_polarity, to_luma601, Clahe};
use crate::error::{PreprocessError, Result};
use crate::geometry::{crop, fit_to_cell, foreground_bounds, place_on_canvas};
use crate::morphology::close_gaps;
use crate::threshold::{binarize, foreground_count};

/// Outcome of normalizing one drawing.
///
/// `NoDigitDetected` is an ordinary result, not a failure: the drawing was
/// empty, too faint, or could not be processed. Its tensor form is the
/// all-zero [`CanonicalTensor`], which callers may still feed to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A digit was found and normalized.
    Digit(CanonicalTensor),
    /// Nothing usable survived preprocessing.
    NoDigitDetected,
}

impl Normalized {
    /// Whether a digit was found.
    #[must_use]
    pub const fn is_digit(&self) -> bool {
        matches!(self, Normalized::Digit(_))
    }

    /// The classifier input; the all-zero tensor when no digit was detected.
    #[must_use]
    pub fn into_tensor(self) -> CanonicalTensor {
        match self {
            Normalized::Digit(tensor) => tensor,
            Normalized::NoDigitDetected => CanonicalTensor::zeros(),
        }
    }
}

impl From<Normalized> for CanonicalTensor {
    fn from(normalized: Normalized) -> Self {
        normalized.into_tensor()
    }
}

/// Converts freehand drawings into canonical classifier input.
///
/// Stateless apart from its configuration, so one instance can be shared
/// across threads.
///
/// # Example
///
/// ```rust
/// use image::{DynamicImage, GrayImage, Luma};
/// use vforge_preprocess::{DigitNormalizer, Normalized};
///
/// let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(280, 280, Luma([255])));
/// let result = DigitNormalizer::new().normalize(&blank);
/// assert_eq!(result, Normalized::NoDigitDetected);
/// assert!(result.into_tensor().is_blank());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DigitNormalizer {
    config: PipelineConfig,
}

impl DigitNormalizer {
    /// Create a normalizer with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from config.
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Normalize a drawing. Never fails.
    ///
    /// Internal errors are logged and reported as
    /// [`Normalized::NoDigitDetected`].
    pub fn normalize(&self, image: &DynamicImage) -> Normalized {
        match self.try_normalize(image) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Preprocessing failed, returning blank tensor");
                Normalized::NoDigitDetected
            }
        }
    }

    /// Normalize a drawing, surfacing internal errors.
    ///
    /// # Errors
    ///
    /// Returns an error for empty images, invalid configuration, or a digit
    /// region that collapses during resizing.
    pub fn try_normalize(&self, image: &DynamicImage) -> Result<Normalized> {
        let config = &self.config;
        config.validate()?;

        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(PreprocessError::EmptyImage { width, height });
        }

        let mut gray = to_luma601(image);
        if normalize_polarity(&mut gray) {
            debug!("Light background detected, inverted");
        }

        let enhanced = Clahe::new(config.clahe_clip_limit, config.clahe_tiles).apply(&gray);
        let binary = binarize(&enhanced, config)?;
        debug!(method = ?binary.method, "Binarized");

        let mask = keep_largest_component(&binary.mask);
        let surviving = foreground_count(&mask);
        if surviving < config.min_foreground_pixels {
            debug!(surviving, "Too few foreground pixels, no digit");
            return Ok(Normalized::NoDigitDetected);
        }

        let mask = if config.close_gaps {
            close_gaps(&mask)
        } else {
            mask
        };

        let canvas = self.fit_to_canvas(&mask)?;
        let centered = center_by_mass(&canvas, f64::from(CANVAS_CENTER));
        let smoothed = anti_alias(&centered, config.blur_sigma);

        let tensor = CanonicalTensor::from_pixels(to_unit_range(&smoothed))?;
        Ok(Normalized::Digit(tensor))
    }

    fn fit_to_canvas(&self, mask: &GrayImage) -> Result<GrayImage> {
        let bounds = foreground_bounds(mask).ok_or_else(|| {
            PreprocessError::DegenerateGeometry("mask emptied by closing".to_string())
        })?;
        let bounds = bounds.padded(self.config.bbox_padding, mask.width(), mask.height());
        let digit = crop(mask, bounds);
        let resized = fit_to_cell(&digit, self.config.cell_size)?;
        debug!(
            crop_w = digit.width(),
            crop_h = digit.height(),
            w = resized.width(),
            h = resized.height(),
            "Fitted digit to cell"
        );
        Ok(place_on_canvas(&resized, CANVAS_SIZE as u32))
    }
}

/// Normalize a drawing with the default policy.
pub fn normalize(image: &DynamicImage) -> Normalized {
    DigitNormalizer::new().normalize(image)
}

/// Normalize a drawing with a custom policy.
pub fn normalize_with(image: &DynamicImage, config: &PipelineConfig) -> Normalized {
    DigitNormalizer::from_config(config.clone()).normalize(image)
}
