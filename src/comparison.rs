//! Before/after renderings of an upscale result

use crate::{error::Result, types::RasterImage};
use image::{imageops::FilterType, Rgba};

/// Bring `original` onto the upscaled image's pixel grid
fn aligned(original: &RasterImage, upscaled: &RasterImage) -> Result<RasterImage> {
    if original.dimensions() == upscaled.dimensions() {
        Ok(original.clone())
    } else {
        original.resized(upscaled.width(), upscaled.height(), FilterType::Triangle)
    }
}

/// Upscaled image left of `split` (fraction of the width), original right of it
///
/// A one-pixel white divider marks the split when it falls inside the image.
pub fn side_by_side(
    original: &RasterImage,
    upscaled: &RasterImage,
    split: f32,
) -> Result<RasterImage> {
    let base = aligned(original, upscaled)?;
    let split = if split.is_nan() { 0.5 } else { split.clamp(0.0, 1.0) };
    let boundary = (upscaled.width() as f32 * split).round() as u32;

    let mut canvas = base.to_rgba_image();
    let after = upscaled.to_rgba_image();
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        if x < boundary {
            *pixel = *after.get_pixel(x, y);
        } else if x == boundary && boundary > 0 {
            *pixel = Rgba([255, 255, 255, 255]);
        }
    }

    Ok(upscaled.derive_from_rgba(canvas))
}

/// Upscaled image blended over the original at `opacity`
pub fn overlay(
    original: &RasterImage,
    upscaled: &RasterImage,
    opacity: f32,
) -> Result<RasterImage> {
    let base = aligned(original, upscaled)?;
    let opacity = if opacity.is_nan() { 1.0 } else { opacity.clamp(0.0, 1.0) };

    let mut canvas = base.to_rgba_image();
    for (pixel, top) in canvas.pixels_mut().zip(upscaled.to_rgba_image().pixels()) {
        for c in 0..4 {
            let mixed = f32::from(top[c]) * opacity + f32::from(pixel[c]) * (1.0 - opacity);
            pixel[c] = mixed.round() as u8;
        }
    }

    Ok(upscaled.derive_from_rgba(canvas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn solid(width: u32, height: u32, value: u8) -> RasterImage {
        let pixel = Rgba([value, value, value, 255]);
        RasterImage::from_rgba(RgbaImage::from_pixel(width, height, pixel))
    }

    #[test]
    fn test_side_by_side_halves() {
        let result = side_by_side(&solid(5, 5, 10), &solid(10, 10, 200), 0.5).unwrap();
        assert_eq!(result.dimensions(), (10, 10));
        assert_eq!(result.pixel(0, 3), Some([200, 200, 200, 255]));
        assert_eq!(result.pixel(5, 3), Some([255, 255, 255, 255]));
        assert_eq!(result.pixel(9, 3), Some([10, 10, 10, 255]));
    }

    #[test]
    fn test_split_is_clamped() {
        let all_after = side_by_side(&solid(4, 4, 0), &solid(4, 4, 90), 7.0).unwrap();
        assert_eq!(all_after, solid(4, 4, 90));
        let all_before = side_by_side(&solid(4, 4, 0), &solid(4, 4, 90), -1.0).unwrap();
        assert_eq!(all_before, solid(4, 4, 0));
    }

    #[test]
    fn test_overlay_blend() {
        let result = overlay(&solid(4, 4, 0), &solid(4, 4, 200), 0.25).unwrap();
        assert_eq!(result.pixel(2, 2), Some([50, 50, 50, 255]));
        assert_eq!(overlay(&solid(4, 4, 0), &solid(4, 4, 200), 3.0).unwrap(), solid(4, 4, 200));
    }
}
