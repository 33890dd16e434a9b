//! Cropping, aspect-preserving resize and canvas placement.

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::error::{PreprocessError, Result};

/// Inclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Leftmost column.
    pub x_min: u32,
    /// Topmost row.
    pub y_min: u32,
    /// Rightmost column.
    pub x_max: u32,
    /// Bottom row.
    pub y_max: u32,
}

impl BoundingBox {
    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.x_max - self.x_min + 1
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.y_max - self.y_min + 1
    }

    /// Grow by `padding` on every side, clamped to a `width × height` image.
    #[must_use]
    pub fn padded(self, padding: u32, width: u32, height: u32) -> Self {
        Self {
            x_min: self.x_min.saturating_sub(padding),
            y_min: self.y_min.saturating_sub(padding),
            x_max: (self.x_max + padding).min(width.saturating_sub(1)),
            y_max: (self.y_max + padding).min(height.saturating_sub(1)),
        }
    }
}

/// Tight bounding box of the non-zero pixels, or `None` for an empty mask.
pub fn foreground_bounds(mask: &GrayImage) -> Option<BoundingBox> {
    let mut bounds: Option<BoundingBox> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => BoundingBox {
                x_min: x,
                y_min: y,
                x_max: x,
                y_max: y,
            },
            Some(b) => BoundingBox {
                x_min: b.x_min.min(x),
                y_min: b.y_min.min(y),
                x_max: b.x_max.max(x),
                y_max: b.y_max.max(y),
            },
        });
    }
    bounds
}

/// Copy the region covered by `bounds`.
pub fn crop(mask: &GrayImage, bounds: BoundingBox) -> GrayImage {
    imageops::crop_imm(mask, bounds.x_min, bounds.y_min, bounds.width(), bounds.height()).to_image()
}

/// Dimensions `(width, height)` that fit `width × height` into a square cell.
///
/// The longer side becomes `cell`; the shorter one is scaled by the aspect
/// ratio, truncated, and never drops below one pixel. Square inputs take the
/// width branch.
#[must_use]
pub fn fit_dimensions(width: u32, height: u32, cell: u32) -> (u32, u32) {
    let aspect = width as f64 / height as f64;
    if height > width {
        let new_w = ((f64::from(cell) * aspect) as u32).max(1);
        (new_w, cell)
    } else {
        let new_h = ((f64::from(cell) / aspect) as u32).max(1);
        (cell, new_h)
    }
}

/// Resize a digit crop so it fits the cell.
///
/// Shrinking along either axis selects an antialiasing triangle filter
/// (area-style averaging); pure enlargement uses Catmull-Rom cubic sampling.
///
/// # Errors
///
/// Returns an error if the crop or the cell is empty.
pub fn fit_to_cell(digit: &GrayImage, cell: u32) -> Result<GrayImage> {
    let (width, height) = digit.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::DegenerateGeometry(format!(
            "digit crop is {width}x{height}"
        )));
    }
    if cell == 0 {
        return Err(PreprocessError::InvalidConfig("cell size must be positive".to_string()));
    }

    let (new_w, new_h) = fit_dimensions(width, height, cell);
    let filter = if width > new_w || height > new_h {
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    };
    Ok(imageops::resize(digit, new_w, new_h, filter))
}

/// Paste `digit` into the middle of a black `size × size` canvas.
///
/// Offsets are `(size - dim) / 2` floored at zero; anything that overflows
/// the canvas is clipped.
#[must_use]
pub fn place_on_canvas(digit: &GrayImage, size: u32) -> GrayImage {
    let mut canvas = GrayImage::new(size, size);
    let x_offset = size.saturating_sub(digit.width()) / 2;
    let y_offset = size.saturating_sub(digit.height()) / 2;
    imageops::replace(&mut canvas, digit, i64::from(x_offset), i64::from(y_offset));
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_foreground_bounds() {
        let mut mask = GrayImage::new(20, 20);
        mask.put_pixel(3, 7, Luma([255]));
        mask.put_pixel(12, 4, Luma([255]));

        let bounds = foreground_bounds(&mask).unwrap();
        assert_eq!(
            bounds,
            BoundingBox {
                x_min: 3,
                y_min: 4,
                x_max: 12,
                y_max: 7
            }
        );
        assert_eq!(bounds.width(), 10);
        assert_eq!(bounds.height(), 4);
    }

    #[test]
    fn test_empty_mask_has_no_bounds() {
        assert!(foreground_bounds(&GrayImage::new(5, 5)).is_none());
    }

    #[test]
    fn test_padding_is_clamped() {
        let bounds = BoundingBox {
            x_min: 1,
            y_min: 5,
            x_max: 8,
            y_max: 9,
        };
        let padded = bounds.padded(2, 10, 10);
        assert_eq!(
            padded,
            BoundingBox {
                x_min: 0,
                y_min: 3,
                x_max: 9,
                y_max: 9
            }
        );
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(fit_dimensions(50, 100, 20), (10, 20));
        assert_eq!(fit_dimensions(100, 25, 20), (20, 5));
        assert_eq!(fit_dimensions(40, 40, 20), (20, 20));
        // A one-pixel-wide stroke keeps at least one column.
        assert_eq!(fit_dimensions(1, 300, 20), (1, 20));
    }

    #[test]
    fn test_fit_to_cell_dimensions() {
        let digit = GrayImage::from_pixel(60, 120, Luma([255]));
        let fitted = fit_to_cell(&digit, 20).unwrap();
        assert_eq!(fitted.dimensions(), (10, 20));

        let small = GrayImage::from_pixel(4, 5, Luma([255]));
        let fitted = fit_to_cell(&small, 20).unwrap();
        assert_eq!(fitted.dimensions(), (16, 20));
    }

    #[test]
    fn test_place_on_canvas_centers_geometrically() {
        let digit = GrayImage::from_pixel(10, 20, Luma([200]));
        let canvas = place_on_canvas(&digit, 28);

        assert_eq!(canvas.dimensions(), (28, 28));
        let bounds = foreground_bounds(&canvas).unwrap();
        assert_eq!((bounds.x_min, bounds.y_min), (9, 4));
        assert_eq!((bounds.x_max, bounds.y_max), (18, 23));
    }

    #[test]
    fn test_place_on_canvas_clips_oversized() {
        let digit = GrayImage::from_pixel(40, 10, Luma([255]));
        let canvas = place_on_canvas(&digit, 28);
        let bounds = foreground_bounds(&canvas).unwrap();
        assert_eq!((bounds.x_min, bounds.x_max), (0, 27));
    }
}
