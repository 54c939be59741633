//! Box and lasso selections, and background fill
//!
//! Clipping zeroes alpha outside the selection and leaves every pixel inside
//! untouched. Filling composites whatever is still transparent over either a
//! solid color or a dimmed copy of the original photo. Clip first, then fill.

use crate::{
    config::FillPolicy,
    error::{Result, UpscaleError},
    types::{RasterImage, SelectionPath},
};
use image::{imageops::FilterType, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point as RasterPoint;
use imageproc::rect::Rect;
use tracing::{instrument, warn};

const INSIDE: Luma<u8> = Luma([255]);

/// Rasterize `path` into a coverage mask at `width` x `height`
fn coverage_mask(path: &SelectionPath, width: u32, height: u32) -> Result<GrayImage> {
    let mut mask = GrayImage::new(width, height);

    match path {
        SelectionPath::Rectangle { .. } => {
            let (min, max) = path
                .bounds()
                .ok_or_else(|| UpscaleError::invalid_selection("Rectangle has no corners"))?;
            if (max.x - min.x).abs() < 1.0 || (max.y - min.y).abs() < 1.0 {
                return Err(UpscaleError::invalid_selection(
                    "Rectangle selection is thinner than one pixel",
                ));
            }
            if let Some(rect) = path.pixel_bounds(width, height) {
                draw_filled_rect_mut(
                    &mut mask,
                    Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height),
                    INSIDE,
                );
            }
        },
        SelectionPath::Polygon(_) => {
            let mut points: Vec<RasterPoint<i32>> = Vec::new();
            for vertex in path.vertices() {
                let p = RasterPoint::new(vertex.x.round() as i32, vertex.y.round() as i32);
                if points.last() != Some(&p) {
                    points.push(p);
                }
            }
            while points.len() > 1 && points.first() == points.last() {
                points.pop();
            }
            if points.len() < 3 {
                return Err(UpscaleError::invalid_selection(format!(
                    "Lasso needs at least 3 distinct vertices, got {}",
                    points.len()
                )));
            }
            draw_polygon_mut(&mut mask, &points, INSIDE);
        },
    }

    Ok(mask)
}

/// Zero alpha outside `path`; pixels inside are unchanged
///
/// # Errors
/// - `InvalidSelection` for lassos with fewer than three distinct vertices
///   or rectangles thinner than a pixel
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn apply_clip(image: &RasterImage, path: &SelectionPath) -> Result<RasterImage> {
    if path.is_empty() {
        return Ok(image.clone());
    }

    let mask = coverage_mask(path, image.width(), image.height())?;
    let mut rgba = image.to_rgba_image();
    for (pixel, coverage) in rgba.pixels_mut().zip(mask.pixels()) {
        if coverage[0] == 0 {
            pixel[3] = 0;
        }
    }

    Ok(image.derive_from_rgba(rgba))
}

/// Crop to the bounding box of `path`, clamped to the image
pub fn crop_to_selection(image: &RasterImage, path: &SelectionPath) -> Result<RasterImage> {
    if path.is_empty() {
        return Ok(image.clone());
    }
    let rect = path
        .pixel_bounds(image.width(), image.height())
        .ok_or_else(|| UpscaleError::invalid_selection("Selection lies outside the image"))?;
    image.crop(rect)
}

#[inline]
fn blend(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(fg) * a + u32::from(bg) * (255 - a) + 127) / 255) as u8
}

fn darkened(original: &RasterImage, width: u32, height: u32, darkness: f32) -> Result<RgbaImage> {
    let base = original.resized(width, height, FilterType::Triangle)?;
    let keep = 1.0 - darkness.clamp(0.0, 1.0);
    let mut rgba = base.to_rgba_image();
    for pixel in rgba.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (f32::from(pixel[c]) * keep).round() as u8;
        }
        pixel[3] = 255;
    }
    Ok(rgba)
}

/// Composite transparent regions over the policy's background
///
/// A fully opaque image is returned unchanged. `Darken` needs the original
/// photo; without it the fill falls back to opaque white.
#[instrument(skip_all, fields(policy = ?policy))]
pub fn fill_background(
    image: &RasterImage,
    policy: FillPolicy,
    original: Option<&RasterImage>,
) -> Result<RasterImage> {
    if image.is_opaque() {
        return Ok(image.clone());
    }
    let (width, height) = image.dimensions();

    let background = match (policy, original) {
        (FillPolicy::Darken { darkness }, Some(original)) => {
            darkened(original, width, height, darkness)?
        },
        (FillPolicy::Darken { .. }, None) => {
            warn!("darkened fill requested without an original image; using white");
            RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
        },
        (FillPolicy::Solid { color }, _) => {
            RgbaImage::from_pixel(width, height, Rgba([color[0], color[1], color[2], 255]))
        },
    };

    let mut rgba = image.to_rgba_image();
    for (pixel, bg) in rgba.pixels_mut().zip(background.pixels()) {
        let alpha = pixel[3];
        for c in 0..3 {
            pixel[c] = blend(pixel[c], bg[c], alpha);
        }
        pixel[3] = 255;
    }

    Ok(image.derive_from_rgba(rgba))
}

/// Clip then fill in one step
pub fn compose(
    image: &RasterImage,
    path: &SelectionPath,
    policy: FillPolicy,
    original: Option<&RasterImage>,
) -> Result<RasterImage> {
    let clipped = apply_clip(image, path)?;
    fill_background(&clipped, policy, original)
}
