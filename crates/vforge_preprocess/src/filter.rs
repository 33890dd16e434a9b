//! Gaussian smoothing on floating-point images.

use image::imageops::crop_imm;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::separable_filter_equal;

/// Single-channel image with `f32` intensities.
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Normalized 1D Gaussian kernel of odd length `size`.
///
/// A non-positive `sigma` derives one from the kernel size the way OpenCV
/// does: `0.3 * ((size - 1) / 2 - 1) + 0.8`.
pub fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let radius = (size / 2) as f32;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - radius;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// How pixels beyond the image edge are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// `aaaaaa|abcdefgh`, OpenCV's `BORDER_REPLICATE`.
    Replicate,
    /// `gfedcb|abcdefgh`, OpenCV's default `BORDER_REFLECT_101`.
    Reflect101,
}

/// Blur with a separable `size × size` Gaussian.
pub fn gaussian_blur(image: &GrayF32, size: usize, sigma: f32, border: Border) -> GrayF32 {
    let kernel = gaussian_kernel(size, sigma);
    let pad = (size / 2) as u32;
    if pad == 0 || border == Border::Replicate {
        return separable_filter_equal(image, &kernel);
    }
    let (width, height) = image.dimensions();
    let blurred = separable_filter_equal(&pad_reflect_101(image, pad), &kernel);
    crop_imm(&blurred, pad, pad, width, height).to_image()
}

/// Index into `0..len` after mirroring about the first and last element.
fn reflect_101(index: i64, len: u32) -> u32 {
    let len = i64::from(len);
    if len <= 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let folded = index.rem_euclid(period);
    (if folded < len { folded } else { period - folded }) as u32
}

/// Grow an image by `pad` pixels on every side with reflect-101 borders.
pub fn pad_reflect_101(image: &GrayF32, pad: u32) -> GrayF32 {
    let (width, height) = image.dimensions();
    let offset = i64::from(pad);
    ImageBuffer::from_fn(width + 2 * pad, height + 2 * pad, |x, y| {
        let sx = reflect_101(i64::from(x) - offset, width);
        let sy = reflect_101(i64::from(y) - offset, height);
        *image.get_pixel(sx, sy)
    })
}

/// Widen an 8-bit image to `f32` without rescaling.
pub fn to_f32(image: &GrayImage) -> GrayF32 {
    let (width, height) = image.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| Luma([f32::from(image.get_pixel(x, y)[0])]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_kernel_normalized() {
        let kernel = gaussian_kernel(3, 0.5);
        assert_eq!(kernel.len(), 3);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((kernel[0] - kernel[2]).abs() < 1e-7);
        assert!((kernel[1] - 0.7870).abs() < 1e-3);
    }

    #[test]
    fn test_gaussian_kernel_auto_sigma() {
        let kernel = gaussian_kernel(11, 0.0);
        assert_eq!(kernel.len(), 11);
        assert!(kernel[5] > kernel[4]);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_blur_preserves_constant() {
        let image = GrayF32::from_pixel(9, 9, Luma([7.0]));
        let blurred = gaussian_blur(&image, 3, 0.5, Border::Reflect101);
        assert!(blurred.pixels().all(|p| (p[0] - 7.0).abs() < 1e-4));
    }

    #[test]
    fn test_reflect_101_indices() {
        let mirrored: Vec<u32> = (-3..8).map(|i| reflect_101(i, 5)).collect();
        assert_eq!(mirrored, vec![3, 2, 1, 0, 1, 2, 3, 4, 3, 2, 1]);
        assert_eq!(reflect_101(-2, 1), 0);
    }

    #[test]
    fn test_blur_reflects_border_without_edge_repeat() {
        // Columns: 10, 0, 0, 0, 0. The pixel left of the border mirrors
        // column 1, so only the centre tap sees the bright edge.
        let image = GrayF32::from_fn(5, 5, |x, _| Luma([if x == 0 { 10.0 } else { 0.0 }]));
        let kernel = gaussian_kernel(3, 0.5);
        let blurred = gaussian_blur(&image, 3, 0.5, Border::Reflect101);

        for y in 0..5 {
            assert!((blurred.get_pixel(0, y)[0] - 10.0 * kernel[1]).abs() < 1e-4);
            assert!((blurred.get_pixel(1, y)[0] - 10.0 * kernel[0]).abs() < 1e-4);
            assert!(blurred.get_pixel(3, y)[0].abs() < 1e-6);
        }

        let replicated = gaussian_blur(&image, 3, 0.5, Border::Replicate);
        let expected = 10.0 * (kernel[0] + kernel[1]);
        assert!((replicated.get_pixel(0, 2)[0] - expected).abs() < 1e-4);
    }
}
