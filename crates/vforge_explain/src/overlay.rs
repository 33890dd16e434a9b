//! Heatmap colorization and blending onto the source image.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::gradcam::Heatmap;

/// Scalar-to-color mapping for heatmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    /// Blue → cyan → yellow → red.
    #[default]
    Jet,
    /// Black → white.
    Gray,
}

impl Colormap {
    /// Color for a value in `[0, 1]`. Values outside are clamped.
    pub fn color(self, value: f32) -> Rgb<u8> {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        match self {
            Colormap::Jet => {
                let channel = |center: f32| {
                    let c = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
                    (c * 255.0).round() as u8
                };
                Rgb([channel(3.0), channel(2.0), channel(1.0)])
            }
            Colormap::Gray => {
                let g = (v * 255.0).round() as u8;
                Rgb([g, g, g])
            }
        }
    }
}

/// Options for [`overlay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayOptions {
    /// Weight of the colored heatmap; the base image gets `1 - alpha`.
    pub alpha: f32,
    /// Colormap for the heatmap.
    pub colormap: Colormap,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            colormap: Colormap::Jet,
        }
    }
}

/// Bilinearly resample a 2D map to `width × height`.
pub fn resize_map(values: &Array2<f32>, width: u32, height: u32) -> Array2<f32> {
    let (rows, cols) = values.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((height as usize, width as usize));
    }
    let source: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([values[[y as usize, x as usize]]])
        });
    let resized = imageops::resize(&source, width, height, FilterType::Triangle);
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        resized.get_pixel(x as u32, y as u32)[0]
    })
}

/// Color a heatmap at its native resolution.
pub fn colorize(heatmap: &Heatmap, colormap: Colormap) -> RgbImage {
    let (rows, cols) = heatmap.dims();
    let values = heatmap.values();
    RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        colormap.color(values[[y as usize, x as usize]])
    })
}

/// Blend a colored heatmap onto `base`.
///
/// The heatmap is resized to the base image with linear interpolation and
/// mixed as `(1 - alpha) * base + alpha * color`. Grayscale bases are
/// expanded to three channels first.
pub fn overlay(base: &DynamicImage, heatmap: &Heatmap, options: &OverlayOptions) -> RgbImage {
    let base = base.to_rgb8();
    let (width, height) = base.dimensions();
    let resized = resize_map(heatmap.values(), width, height);
    let alpha = options.alpha.clamp(0.0, 1.0);

    RgbImage::from_fn(width, height, |x, y| {
        let color = options.colormap.color(resized[[y as usize, x as usize]]);
        let pixel = base.get_pixel(x, y);
        let mix = |b: u8, c: u8| {
            let v = (1.0 - alpha) * f32::from(b) + alpha * f32::from(c);
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb([
            mix(pixel[0], color[0]),
            mix(pixel[1], color[1]),
            mix(pixel[2], color[2]),
        ])
    })
}
