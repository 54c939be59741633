//! Core data types: rasters, selection paths and subject masks

use crate::error::{Result, UpscaleError};
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Byte order of the four channels in a [`RasterImage`] buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PixelLayout {
    /// R, G, B, A (decoded files, `image` crate buffers)
    #[default]
    Rgba8,
    /// B, G, R, A (camera capture buffers)
    Bgra8,
}

/// Display orientation tag, numbered as in EXIF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Orientation {
    #[default]
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    LeftMirrored,
    Right,
    RightMirrored,
    Left,
}

impl Orientation {
    /// Map an EXIF orientation value (1-8); unknown values read as `Up`
    #[must_use]
    pub fn from_exif(value: u8) -> Self {
        match value {
            2 => Self::UpMirrored,
            3 => Self::Down,
            4 => Self::DownMirrored,
            5 => Self::LeftMirrored,
            6 => Self::Right,
            7 => Self::RightMirrored,
            8 => Self::Left,
            _ => Self::Up,
        }
    }

    #[must_use]
    pub fn to_exif(self) -> u8 {
        match self {
            Self::Up => 1,
            Self::UpMirrored => 2,
            Self::Down => 3,
            Self::DownMirrored => 4,
            Self::LeftMirrored => 5,
            Self::Right => 6,
            Self::RightMirrored => 7,
            Self::Left => 8,
        }
    }
}

/// Rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rect lies fully inside a `width` x `height` frame
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// Rectangle in normalized [0, 1] image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Scale to a pixel rect in a `width` x `height` frame, clamped to the frame
    #[must_use]
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let (w, h) = (width as f32, height as f32);
        let x0 = (self.x * w).floor().clamp(0.0, w);
        let y0 = (self.y * h).floor().clamp(0.0, h);
        let x1 = ((self.x + self.width) * w).ceil().clamp(0.0, w);
        let y1 = ((self.y + self.height) * h).ceil().clamp(0.0, h);
        PixelRect::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0).max(0.0) as u32,
            (y1 - y0).max(0.0) as u32,
        )
    }
}

/// Owned pixel raster with orientation and display scale metadata
///
/// Buffers are row-major with four bytes per pixel. Rows may be padded:
/// `bytes_per_row >= width * 4` and `data.len() == height * bytes_per_row`.
/// Instances are never mutated; every transformation returns a new raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    bytes_per_row: usize,
    layout: PixelLayout,
    orientation: Orientation,
    scale: f32,
    data: Vec<u8>,
}

impl RasterImage {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Create a tightly packed raster
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let bytes_per_row = width as usize * Self::BYTES_PER_PIXEL;
        Self::with_stride(width, height, bytes_per_row, layout, data)
    }

    /// Create a raster whose rows may carry trailing padding
    pub fn with_stride(
        width: u32,
        height: u32,
        bytes_per_row: usize,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self> {
        let min_row = width as usize * Self::BYTES_PER_PIXEL;
        if bytes_per_row < min_row {
            return Err(UpscaleError::format_error(format!(
                "bytes_per_row {} is smaller than width {} x {} bytes",
                bytes_per_row,
                width,
                Self::BYTES_PER_PIXEL
            )));
        }
        let expected = (height as usize).checked_mul(bytes_per_row).ok_or_else(|| {
            UpscaleError::format_error(format!(
                "Raster {}x{} with stride {} overflows",
                width, height, bytes_per_row
            ))
        })?;
        if data.len() != expected {
            return Err(UpscaleError::format_error(format!(
                "Buffer length {} does not match height {} x bytes_per_row {}",
                data.len(),
                height,
                bytes_per_row
            )));
        }
        Ok(Self {
            width,
            height,
            bytes_per_row,
            layout,
            orientation: Orientation::Up,
            scale: 1.0,
            data,
        })
    }

    /// Wrap an `image` RGBA buffer without copying
    #[must_use]
    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            bytes_per_row: width as usize * Self::BYTES_PER_PIXEL,
            layout: PixelLayout::Rgba8,
            orientation: Orientation::Up,
            scale: 1.0,
            data: image.into_raw(),
        }
    }

    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::from_rgba(image.to_rgba8())
    }

    /// Decode file or capture bytes (JPEG, PNG)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| UpscaleError::decode(format!("Failed to decode image bytes: {}", e)))?;
        Ok(Self::from_dynamic(&image))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::decode(&bytes)
    }

    /// Replace orientation and scale metadata
    #[must_use]
    pub fn with_metadata(mut self, orientation: Orientation, scale: f32) -> Self {
        self.orientation = orientation;
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    #[must_use]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// False for zero-sized rasters, which have nothing to segment or upscale
    #[must_use]
    pub fn has_pixels(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.data.is_empty()
    }

    /// Pixel at (x, y) in RGBA order regardless of the buffer layout
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_row + x as usize * Self::BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + Self::BYTES_PER_PIXEL)?;
        Some(match self.layout {
            PixelLayout::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelLayout::Bgra8 => [px[2], px[1], px[0], px[3]],
        })
    }

    /// Whether every pixel has full alpha
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.rows()
            .all(|row| row.chunks_exact(Self::BYTES_PER_PIXEL).all(|px| px[3] == 255))
    }

    /// Iterate rows without their stride padding
    fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let row_len = self.width as usize * Self::BYTES_PER_PIXEL;
        self.data
            .chunks_exact(self.bytes_per_row.max(1))
            .take(self.height as usize)
            .map(move |row| &row[..row_len])
    }

    /// Tightly packed RGBA copy
    #[must_use]
    pub fn to_rgba_image(&self) -> RgbaImage {
        let row_len = self.width as usize * Self::BYTES_PER_PIXEL;
        let mut packed = Vec::with_capacity(row_len * self.height as usize);
        for row in self.rows() {
            match self.layout {
                PixelLayout::Rgba8 => packed.extend_from_slice(row),
                PixelLayout::Bgra8 => {
                    for px in row.chunks_exact(Self::BYTES_PER_PIXEL) {
                        packed.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                    }
                },
            }
        }
        RgbaImage::from_raw(self.width, self.height, packed)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    /// Build a raster from RGBA pixels, keeping this raster's layout and metadata
    #[must_use]
    pub fn derive_from_rgba(&self, rgba: RgbaImage) -> Self {
        Self::from_rgba(rgba)
            .into_layout(self.layout)
            .with_metadata(self.orientation, self.scale)
    }

    /// Repack into another channel order (tightly packed)
    #[must_use]
    pub fn into_layout(self, layout: PixelLayout) -> Self {
        if self.layout == layout && self.bytes_per_row == self.width as usize * 4 {
            return self;
        }
        let mut rgba = self.to_rgba_image().into_raw();
        if layout == PixelLayout::Bgra8 {
            for px in rgba.chunks_exact_mut(Self::BYTES_PER_PIXEL) {
                px.swap(0, 2);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            bytes_per_row: self.width as usize * Self::BYTES_PER_PIXEL,
            layout,
            orientation: self.orientation,
            scale: self.scale,
            data: rgba,
        }
    }

    /// Resize to exactly `width` x `height`, keeping layout and metadata
    pub fn resized(&self, width: u32, height: u32, filter: FilterType) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(UpscaleError::format_error(format!(
                "Cannot resize to empty size {}x{}",
                width, height
            )));
        }
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        let resized = image::imageops::resize(&self.to_rgba_image(), width, height, filter);
        Ok(self.derive_from_rgba(resized))
    }

    /// Copy out a sub-rectangle
    pub fn crop(&self, rect: PixelRect) -> Result<Self> {
        if rect.is_empty() || !rect.fits_within(self.width, self.height) {
            return Err(UpscaleError::format_error(format!(
                "Crop {:?} outside {}x{} raster",
                rect, self.width, self.height
            )));
        }
        let rgba = self.to_rgba_image();
        let cropped =
            image::imageops::crop_imm(&rgba, rect.x, rect.y, rect.width, rect.height).to_image();
        Ok(self.derive_from_rgba(cropped))
    }

    /// JPEG bytes at `quality` (1-100); alpha is dropped
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let rgb = DynamicImage::ImageRgba8(self.to_rgba_image()).to_rgb8();
        let mut buffer = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        rgb.write_with_encoder(encoder)?;
        Ok(buffer)
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.to_rgba_image()
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Save by file extension (`.jpg`/`.jpeg` at quality 90, anything else PNG)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
        let bytes = if is_jpeg {
            self.encode_jpeg(90)?
        } else {
            self.encode_png()?
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// 2D point in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// User-drawn selection: a box or a freehand (lasso) polygon
///
/// Polygons are implicitly closed; the last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectionPath {
    /// Two opposite corners
    Rectangle { start: Point, end: Point },
    /// Ordered freehand vertices
    Polygon(Vec<Point>),
}

impl SelectionPath {
    #[must_use]
    pub fn rectangle(start: Point, end: Point) -> Self {
        Self::Rectangle { start, end }
    }

    #[must_use]
    pub fn polygon(points: Vec<Point>) -> Self {
        Self::Polygon(points)
    }

    /// An empty lasso; clipping with it is a passthrough
    #[must_use]
    pub fn empty() -> Self {
        Self::Polygon(Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Polygon(points) if points.is_empty())
    }

    /// Vertices in drawing order, without a repeated closing point
    #[must_use]
    pub fn vertices(&self) -> Vec<Point> {
        match self {
            Self::Rectangle { start, end } => vec![
                *start,
                Point::new(end.x, start.y),
                *end,
                Point::new(start.x, end.y),
            ],
            Self::Polygon(points) => {
                let mut vertices = points.clone();
                while vertices.len() > 1 && vertices.first() == vertices.last() {
                    vertices.pop();
                }
                vertices
            },
        }
    }

    /// Axis-aligned bounds as (min, max)
    #[must_use]
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let vertices = self.vertices();
        let first = *vertices.first()?;
        Some(vertices.iter().fold((first, first), |(min, max), p| {
            (
                Point::new(min.x.min(p.x), min.y.min(p.y)),
                Point::new(max.x.max(p.x), max.y.max(p.y)),
            )
        }))
    }

    /// Bounds rounded outward and clamped to a `width` x `height` frame
    #[must_use]
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<PixelRect> {
        let (min, max) = self.bounds()?;
        let x0 = min.x.floor().clamp(0.0, width as f32) as u32;
        let y0 = min.y.floor().clamp(0.0, height as f32) as u32;
        let x1 = max.x.ceil().clamp(0.0, width as f32) as u32;
        let y1 = max.y.ceil().clamp(0.0, height as f32) as u32;
        let rect = PixelRect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0));
        (!rect.is_empty()).then_some(rect)
    }

    /// Shift every point by (-dx, -dy); used to move a path into a cropped frame
    #[must_use]
    pub fn relative_to(&self, origin_x: u32, origin_y: u32) -> Self {
        let (dx, dy) = (origin_x as f32, origin_y as f32);
        let shift = |p: &Point| Point::new(p.x - dx, p.y - dy);
        match self {
            Self::Rectangle { start, end } => Self::Rectangle {
                start: shift(start),
                end: shift(end),
            },
            Self::Polygon(points) => Self::Polygon(points.iter().map(shift).collect()),
        }
    }
}

/// Kind of selection being drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionKind {
    Box,
    Lasso,
}

/// Accumulates drag-gesture points into a [`SelectionPath`]
#[derive(Debug, Clone)]
pub struct SelectionPathBuilder {
    kind: SelectionKind,
    points: Vec<Point>,
}

impl SelectionPathBuilder {
    #[must_use]
    pub fn new(kind: SelectionKind) -> Self {
        Self {
            kind,
            points: Vec::new(),
        }
    }

    /// Record a drag location
    pub fn push(&mut self, point: Point) {
        match self.kind {
            SelectionKind::Box if self.points.len() >= 2 => {
                if let Some(last) = self.points.last_mut() {
                    *last = point;
                }
            },
            _ => self.points.push(point),
        }
    }

    /// Finish the gesture; a box with a single point collapses to an empty path
    #[must_use]
    pub fn finish(self) -> SelectionPath {
        match self.kind {
            SelectionKind::Box => match (self.points.first(), self.points.last()) {
                (Some(start), Some(end)) if self.points.len() >= 2 => {
                    SelectionPath::rectangle(*start, *end)
                },
                _ => SelectionPath::empty(),
            },
            SelectionKind::Lasso => SelectionPath::Polygon(self.points),
        }
    }
}

/// Alpha-matted cutout of the primary subject
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectMask {
    /// Cutout, transparent outside the subject
    pub image: RasterImage,
    /// Where the cutout sits in the source image
    pub extent: PixelRect,
}
