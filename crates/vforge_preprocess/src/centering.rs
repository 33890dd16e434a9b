//! Center-of-mass refinement and the final anti-aliasing pass.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use ndarray::Array2;

use crate::filter::{gaussian_blur, to_f32, Border};

/// Intensity-weighted centroid `(x, y)` of an 8-bit image.
///
/// Returns `None` when every pixel is zero.
pub fn center_of_mass(image: &GrayImage) -> Option<(f64, f64)> {
    let mut total = 0.0f64;
    let mut x_sum = 0.0f64;
    let mut y_sum = 0.0f64;
    for (x, y, p) in image.enumerate_pixels() {
        let v = f64::from(p[0]);
        total += v;
        x_sum += f64::from(x) * v;
        y_sum += f64::from(y) * v;
    }
    if total == 0.0 {
        return None;
    }
    Some((x_sum / total, y_sum / total))
}

/// Integer translation that moves `centroid` towards `target`, truncated
/// towards zero on each axis.
#[must_use]
pub fn centering_shift(centroid: (f64, f64), target: f64) -> (i32, i32) {
    ((target - centroid.0) as i32, (target - centroid.1) as i32)
}

/// Shift the image by whole pixels, filling uncovered pixels with black.
#[must_use]
pub fn translate(image: &GrayImage, dx: i32, dy: i32) -> GrayImage {
    if dx == 0 && dy == 0 {
        return image.clone();
    }
    let projection = Projection::translate(dx as f32, dy as f32);
    warp(image, &projection, Interpolation::Nearest, Luma([0]))
}

/// Move the intensity-weighted centroid to `(target, target)`.
///
/// Images without any signal are returned unchanged.
#[must_use]
pub fn center_by_mass(image: &GrayImage, target: f64) -> GrayImage {
    match center_of_mass(image) {
        Some(centroid) => {
            let (dx, dy) = centering_shift(centroid, target);
            translate(image, dx, dy)
        }
        None => image.clone(),
    }
}

/// Soften binary edges with a 3×3 Gaussian, rounding back to 8 bits.
#[must_use]
pub fn anti_alias(image: &GrayImage, sigma: f32) -> GrayImage {
    let blurred = gaussian_blur(&to_f32(image), 3, sigma, Border::Reflect101);
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

/// Stretch intensities so the brightest pixel becomes 255, then scale to
/// `[0, 1]`.
///
/// The stretch truncates to whole 8-bit levels before the final division, so
/// the output only takes values `k / 255`.
#[must_use]
pub fn to_unit_range(image: &GrayImage) -> Array2<f32> {
    let (width, height) = image.dimensions();
    let max = image.pixels().map(|p| p[0]).max().unwrap_or(0);
    let mut out = Array2::zeros((height as usize, width as usize));
    if max == 0 {
        return out;
    }

    let max = f32::from(max);
    for (x, y, p) in image.enumerate_pixels() {
        let level = (f32::from(p[0]) / max * 255.0).min(255.0).trunc();
        out[[y as usize, x as usize]] = level / 255.0;
    }
    out
}
