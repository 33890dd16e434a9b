//! Binarization: global Otsu with a local adaptive fallback.

use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PreprocessError, Result};
use crate::filter::{gaussian_blur, to_f32, Border};

/// Value of a foreground pixel in a binary mask.
pub const FOREGROUND: u8 = 255;

/// Which thresholding strategy produced a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarizationMethod {
    /// Global Otsu threshold at the given level.
    Otsu {
        /// Pixels strictly above this level are foreground.
        level: u8,
    },
    /// Gaussian-weighted local threshold.
    Adaptive,
}

/// A `{0, 255}` mask together with the method that produced it.
#[derive(Debug, Clone)]
pub struct Binarization {
    /// The binary mask; strokes are 255.
    pub mask: GrayImage,
    /// How the mask was obtained.
    pub method: BinarizationMethod,
}

/// Fraction of pixels that are foreground.
pub fn foreground_fraction(mask: &GrayImage) -> f32 {
    let total = mask.width() as usize * mask.height() as usize;
    if total == 0 {
        return 0.0;
    }
    foreground_count(mask) as f32 / total as f32
}

/// Number of non-zero pixels.
pub fn foreground_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}

/// Local threshold against a Gaussian-weighted neighbourhood mean.
///
/// A pixel is foreground when it exceeds its local mean by more than
/// `offset`, so flat regions of any brightness stay background.
///
/// # Errors
///
/// Returns an error if `block_size` is even or smaller than 3.
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, offset: f32) -> Result<GrayImage> {
    if block_size < 3 || block_size % 2 == 0 {
        return Err(PreprocessError::InvalidConfig(format!(
            "adaptive block size must be odd and >= 3, got {block_size}"
        )));
    }

    let values = to_f32(image);
    let local_mean = gaussian_blur(&values, block_size as usize, 0.0, Border::Replicate);

    let (width, height) = image.dimensions();
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let value = values.get_pixel(x, y)[0];
        let mean = local_mean.get_pixel(x, y)[0];
        if value > mean + offset {
            image::Luma([FOREGROUND])
        } else {
            image::Luma([0])
        }
    }))
}

/// Binarize an enhanced grayscale image.
///
/// Otsu is kept when its foreground fraction falls inside the configured
/// band; otherwise it has collapsed towards all-foreground or
/// all-background and the adaptive threshold is used instead.
///
/// # Errors
///
/// Returns an error if the adaptive block size is invalid.
pub fn binarize(image: &GrayImage, config: &PipelineConfig) -> Result<Binarization> {
    let level = otsu_level(image);
    let otsu = threshold(image, level);
    let fraction = foreground_fraction(&otsu);

    if (config.otsu_min_foreground..=config.otsu_max_foreground).contains(&fraction) {
        debug!(level, fraction, "Otsu threshold accepted");
        return Ok(Binarization {
            mask: otsu,
            method: BinarizationMethod::Otsu { level },
        });
    }

    debug!(level, fraction, "Otsu foreground fraction out of range, using adaptive threshold");
    let mask = adaptive_threshold(image, config.adaptive_block_size, config.adaptive_offset)?;
    Ok(Binarization {
        mask,
        method: BinarizationMethod::Adaptive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_otsu_accepted_for_solid_digit() {
        let mut image = GrayImage::from_pixel(40, 40, Luma([10]));
        for y in 10..30 {
            for x in 15..25 {
                image.put_pixel(x, y, Luma([240]));
            }
        }

        let result = binarize(&image, &PipelineConfig::default()).unwrap();
        assert!(matches!(result.method, BinarizationMethod::Otsu { .. }));
        assert_eq!(foreground_count(&result.mask), 200);
    }

    #[test]
    fn test_sparse_stroke_falls_back_to_adaptive() {
        // One thin stroke covering well under 1% of the canvas.
        let mut image = GrayImage::from_pixel(280, 280, Luma([3]));
        for y in 100..160 {
            image.put_pixel(140, y, Luma([255]));
        }

        let result = binarize(&image, &PipelineConfig::default()).unwrap();
        assert_eq!(result.method, BinarizationMethod::Adaptive);

        for y in 100..160 {
            assert_eq!(result.mask.get_pixel(140, y)[0], FOREGROUND);
        }
        // Nothing but the stroke survives.
        assert_eq!(foreground_count(&result.mask), 60);
    }

    #[test]
    fn test_flat_image_is_all_background() {
        let image = GrayImage::from_pixel(50, 50, Luma([3]));
        let result = binarize(&image, &PipelineConfig::default()).unwrap();
        assert_eq!(result.method, BinarizationMethod::Adaptive);
        assert_eq!(foreground_count(&result.mask), 0);
    }

    #[test]
    fn test_adaptive_rejects_even_block() {
        let image = GrayImage::new(10, 10);
        assert!(adaptive_threshold(&image, 10, 2.0).is_err());
    }

    #[test]
    fn test_foreground_fraction() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(0, 0, Luma([FOREGROUND]));
        assert!((foreground_fraction(&mask) - 0.01).abs() < 1e-6);
    }
}
