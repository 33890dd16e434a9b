//! Connected-component noise suppression.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::threshold::FOREGROUND;

/// Keep only the largest 8-connected foreground component.
///
/// Masks with zero or one component are returned unchanged. When several
/// components share the maximum area the first one in scan order wins.
pub fn keep_largest_component(mask: &GrayImage) -> GrayImage {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let n_labels = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    if n_labels <= 1 {
        return mask.clone();
    }

    let mut areas = vec![0usize; n_labels + 1];
    for label in labels.pixels() {
        areas[label[0] as usize] += 1;
    }

    let mut largest = 1;
    for label in 2..=n_labels {
        if areas[label] > areas[largest] {
            largest = label;
        }
    }
    debug!(
        components = n_labels,
        kept_area = areas[largest],
        "Discarding stray components"
    );

    let (width, height) = mask.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if labels.get_pixel(x, y)[0] as usize == largest {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::foreground_count;

    #[test]
    fn test_keeps_largest_component() {
        let mut mask = GrayImage::new(30, 30);
        for y in 5..20 {
            for x in 5..10 {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        mask.put_pixel(25, 25, Luma([FOREGROUND]));
        mask.put_pixel(27, 2, Luma([FOREGROUND]));

        let cleaned = keep_largest_component(&mask);
        assert_eq!(foreground_count(&cleaned), 75);
        assert_eq!(cleaned.get_pixel(25, 25)[0], 0);
        assert_eq!(cleaned.get_pixel(7, 7)[0], FOREGROUND);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mut mask = GrayImage::new(10, 10);
        for i in 0..5 {
            mask.put_pixel(i, i, Luma([FOREGROUND]));
        }
        mask.put_pixel(9, 0, Luma([FOREGROUND]));

        let cleaned = keep_largest_component(&mask);
        assert_eq!(foreground_count(&cleaned), 5);
    }

    #[test]
    fn test_empty_mask_unchanged() {
        let mask = GrayImage::new(8, 8);
        assert_eq!(keep_largest_component(&mask), mask);
    }
}
