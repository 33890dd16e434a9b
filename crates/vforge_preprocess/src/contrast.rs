//! Polarity correction and local contrast enhancement.

use image::{imageops, DynamicImage, GrayImage, Luma};
use imageproc::stats::histogram;

/// Number of intensity levels in an 8-bit image.
const LEVELS: usize = 256;

/// ITU-R BT.601 luma weights in 16-bit fixed point; they sum to `1 << 16`.
const LUMA_R: u32 = 19_595;
const LUMA_G: u32 = 38_470;
const LUMA_B: u32 = 7_471;

/// Convert to 8-bit grayscale with BT.601 weights `0.299 R + 0.587 G + 0.114 B`.
///
/// Single-channel 8-bit input is returned unchanged and alpha is dropped.
pub fn to_luma601(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let weighted = LUMA_R * u32::from(r) + LUMA_G * u32::from(g) + LUMA_B * u32::from(b);
        Luma([((weighted + (1 << 15)) >> 16) as u8])
    })
}

/// Most frequent intensity, taken as the background level.
///
/// Ties resolve to the darker level.
pub fn background_level(image: &GrayImage) -> u8 {
    let hist = histogram(image);
    let counts = &hist.channels[0];
    let mut modal = 0usize;
    for (level, &count) in counts.iter().enumerate() {
        if count > counts[modal] {
            modal = level;
        }
    }
    modal as u8
}

/// Invert the image in place when its background is light.
///
/// Afterwards strokes are bright on a dark background. Returns whether the
/// image was inverted.
pub fn normalize_polarity(image: &mut GrayImage) -> bool {
    let background = background_level(image);
    if background > 127 {
        imageops::invert(image);
        true
    } else {
        false
    }
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `tiles × tiles` grid. Each tile gets its own
/// equalization lookup table built from a clipped histogram, and every pixel
/// is mapped through a bilinear blend of the four nearest tile tables. Tiles
/// that extend past the image border sample it mirrored (reflect-101).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    clip_limit: f32,
    tiles: u32,
}

impl Clahe {
    /// Create a new CLAHE operator.
    ///
    /// A non-positive `clip_limit` disables clipping (plain tiled equalization).
    #[must_use]
    pub fn new(clip_limit: f32, tiles: u32) -> Self {
        Self {
            clip_limit,
            tiles: tiles.max(1),
        }
    }

    /// Apply the equalization, returning a new image.
    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image.clone();
        }

        let tiles = self.tiles;
        let tile_w = width.div_ceil(tiles);
        let tile_h = height.div_ceil(tiles);
        let tile_area = (tile_w * tile_h) as usize;

        let clip = if self.clip_limit > 0.0 {
            ((self.clip_limit * tile_area as f32 / LEVELS as f32) as u32).max(1)
        } else {
            u32::MAX
        };

        let mut luts = Vec::with_capacity((tiles * tiles) as usize);
        for ty in 0..tiles {
            for tx in 0..tiles {
                let mut hist = [0u32; LEVELS];
                for y in ty * tile_h..(ty + 1) * tile_h {
                    let sy = reflect_101(y, height);
                    for x in tx * tile_w..(tx + 1) * tile_w {
                        let sx = reflect_101(x, width);
                        hist[image.get_pixel(sx, sy)[0] as usize] += 1;
                    }
                }
                clip_histogram(&mut hist, clip);
                luts.push(equalization_lut(&hist, tile_area));
            }
        }

        let tiles = tiles as usize;
        let inv_tw = 1.0 / tile_w as f32;
        let inv_th = 1.0 / tile_h as f32;

        GrayImage::from_fn(width, height, |x, y| {
            let (tx1, tx2, xa) = neighbours(x as f32 * inv_tw - 0.5, tiles);
            let (ty1, ty2, ya) = neighbours(y as f32 * inv_th - 0.5, tiles);
            let level = image.get_pixel(x, y)[0] as usize;
            let lut = |tx: usize, ty: usize| f32::from(luts[ty * tiles + tx][level]);

            let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
            let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
            let value = top * (1.0 - ya) + bottom * ya;
            Luma([value.round().clamp(0.0, 255.0) as u8])
        })
    }
}

/// The two tile indices surrounding a fractional tile coordinate and the
/// weight of the second one.
fn neighbours(position: f32, tiles: usize) -> (usize, usize, f32) {
    let first = position.floor();
    let weight = position - first;
    let first = first as i64;
    let second = (first + 1).min(tiles as i64 - 1).max(0) as usize;
    (first.max(0) as usize, second, weight)
}

/// Clip every bin at `limit` and spread the excess evenly over all bins.
fn clip_histogram(hist: &mut [u32; LEVELS], limit: u32) {
    let mut clipped = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            clipped += *count - limit;
            *count = limit;
        }
    }
    if clipped == 0 {
        return;
    }

    let batch = clipped / LEVELS as u32;
    let mut residual = clipped - batch * LEVELS as u32;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (LEVELS / residual as usize).max(1);
        let mut level = 0;
        while level < LEVELS && residual > 0 {
            hist[level] += 1;
            level += step;
            residual -= 1;
        }
    }
}

fn equalization_lut(hist: &[u32; LEVELS], total: usize) -> [u8; LEVELS] {
    let scale = (LEVELS - 1) as f32 / total as f32;
    let mut lut = [0u8; LEVELS];
    let mut sum = 0u32;
    for (level, &count) in hist.iter().enumerate() {
        sum += count;
        lut[level] = (sum as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Mirror an index into `0..len` without repeating the edge pixel.
fn reflect_101(index: u32, len: u32) -> u32 {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let index = index % period;
    if index < len {
        index
    } else {
        period - index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_to_luma601_weights() {
        let mut rgb = RgbImage::new(5, 1);
        for (x, color) in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 255], [20, 20, 160]]
            .into_iter()
            .enumerate()
        {
            rgb.put_pixel(x as u32, 0, Rgb(color));
        }
        let gray = to_luma601(&DynamicImage::ImageRgb8(rgb));
        let levels: Vec<u8> = gray.pixels().map(|p| p[0]).collect();
        assert_eq!(levels, vec![76, 150, 29, 255, 36]);
    }

    #[test]
    fn test_to_luma601_drops_alpha_and_keeps_gray() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 0]));
        let gray = to_luma601(&DynamicImage::ImageRgba8(rgba));
        assert!(gray.pixels().all(|p| p[0] == 76));

        let mut plain = GrayImage::new(3, 3);
        plain.put_pixel(1, 1, Luma([200]));
        assert_eq!(to_luma601(&DynamicImage::ImageLuma8(plain.clone())), plain);
    }

    #[test]
    fn test_background_level_dark() {
        let mut image = GrayImage::new(10, 10);
        image.put_pixel(3, 3, Luma([255]));
        assert_eq!(background_level(&image), 0);
    }

    #[test]
    fn test_normalize_polarity_inverts_light_background() {
        let mut image = GrayImage::from_pixel(10, 10, Luma([250]));
        image.put_pixel(5, 5, Luma([10]));

        assert!(normalize_polarity(&mut image));
        assert_eq!(image.get_pixel(0, 0)[0], 5);
        assert_eq!(image.get_pixel(5, 5)[0], 245);
    }

    #[test]
    fn test_normalize_polarity_keeps_dark_background() {
        let mut image = GrayImage::from_pixel(10, 10, Luma([20]));
        image.put_pixel(5, 5, Luma([200]));

        assert!(!normalize_polarity(&mut image));
        assert_eq!(image.get_pixel(5, 5)[0], 200);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(0, 5), 0);
        assert_eq!(reflect_101(4, 5), 4);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(7, 1), 0);
    }

    #[test]
    fn test_clip_histogram_preserves_mass() {
        let mut hist = [0u32; LEVELS];
        hist[0] = 1000;
        hist[255] = 24;
        clip_histogram(&mut hist, 10);

        assert_eq!(hist.iter().sum::<u32>(), 1024);
        assert!(hist[0] <= 10 + 1000 / 256 + 1);
    }

    #[test]
    fn test_clahe_uniform_image_stays_uniform() {
        let image = GrayImage::new(40, 40);
        let out = Clahe::new(2.0, 4).apply(&image);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
        assert!(first < 10);
    }

    #[test]
    fn test_clahe_keeps_strokes_bright() {
        let mut image = GrayImage::new(80, 80);
        for y in 20..60 {
            for x in 38..42 {
                image.put_pixel(x, y, Luma([255]));
            }
        }
        let out = Clahe::new(2.0, 4).apply(&image);

        assert!(out.get_pixel(40, 40)[0] > 200);
        assert!(out.get_pixel(5, 5)[0] < 20);
    }

    #[test]
    fn test_clahe_handles_tiny_images() {
        let image = GrayImage::from_pixel(3, 2, Luma([100]));
        let out = Clahe::new(2.0, 4).apply(&image);
        assert_eq!(out.dimensions(), (3, 2));
    }
}
