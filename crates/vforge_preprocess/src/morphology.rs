//! Binary gap closing on stroke masks.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;

/// Radius of the closing element.
///
/// An `L1` ball of radius 1 is the 3×3 cross, the smallest symmetric element
/// covering the 2×2 elliptical kernel `[[0, 1], [1, 1]]`.
pub const CLOSE_RADIUS: u8 = 1;

/// Bridge small breaks in a binary stroke mask.
///
/// Dilation followed by erosion with the same symmetric element, so the
/// result always contains the input and strokes are never shifted.
#[must_use]
pub fn close_gaps(mask: &GrayImage) -> GrayImage {
    close(mask, Norm::L1, CLOSE_RADIUS)
}
