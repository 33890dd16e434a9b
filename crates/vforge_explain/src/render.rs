//! Grayscale renderings of activations and heatmaps for display.

use burn::prelude::*;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ndarray::{s, Array2, ArrayView2};
use vforge_core::CoreError;

use crate::activation::to_array4;
use crate::gradcam::Heatmap;
use crate::overlay::resize_map;

/// Feature maps shown per layer when not overridden.
pub const DEFAULT_MAX_MAPS: usize = 16;

/// Side length of a rendered feature map.
pub const DEFAULT_FEATURE_MAP_SIZE: u32 = 56;

/// Side length of a rendered heatmap.
pub const DEFAULT_HEATMAP_SIZE: u32 = 112;

/// Min-max stretch to 8 bits; a constant map renders black.
pub fn stretch_to_gray(values: ArrayView2<'_, f32>) -> GrayImage {
    let (rows, cols) = values.dim();
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = values[[y as usize, x as usize]] - min;
        let scaled = if range > 0.0 { v / range } else { v };
        Luma([(scaled * 255.0).clamp(0.0, 255.0) as u8])
    })
}

/// Render the first `max_maps` channels of a convolutional activation.
///
/// Each channel of batch item 0 is min-max stretched on its own and enlarged
/// to `size × size` with nearest-neighbour sampling.
///
/// # Errors
///
/// Returns [`CoreError::TensorData`] if the tensor cannot be read.
pub fn feature_map_images<B: Backend>(
    activation: &Tensor<B, 4>,
    max_maps: usize,
    size: u32,
) -> Result<Vec<GrayImage>, CoreError> {
    let data = to_array4(activation)?;
    let channels = data.shape()[1].min(max_maps);

    Ok((0..channels)
        .map(|c| {
            let map = stretch_to_gray(data.slice(s![0, c, .., ..]));
            imageops::resize(&map, size, size, FilterType::Nearest)
        })
        .collect())
}

/// Render a heatmap as an 8-bit image, bilinearly resized to `size × size`.
pub fn heatmap_image(heatmap: &Heatmap, size: u32) -> GrayImage {
    let resized: Array2<f32> = resize_map(heatmap.values(), size, size);
    stretch_to_gray(resized.view())
}
