//! Raster buffer to float tensor conversion and back
//!
//! Every model boundary goes through here: the raster is resized to the
//! model's fixed input, its channels remapped to the model's order and
//! normalized into the trained value range. The inverse denormalizes,
//! clamps and rounds each channel and repacks opaque pixels.

use crate::{
    error::{Result, UpscaleError},
    models::{ChannelOrder, TensorLayout, TensorSpec},
    types::{Orientation, RasterImage},
};
use image::{Rgba, RgbaImage};
use ndarray::Array4;

/// A batch-1, three-channel float tensor in a model's layout
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceTensor {
    data: Array4<f32>,
    spec: TensorSpec,
}

impl InferenceTensor {
    /// Wrap a raw model tensor, checking it against the layout contract
    ///
    /// # Errors
    /// - `Format` when the shape is not (1, 3, H, W) for NCHW or (1, H, W, 3) for NHWC
    pub fn new(data: Array4<f32>, spec: TensorSpec) -> Result<Self> {
        let (n, a, b, c) = data.dim();
        let valid = n == 1
            && match spec.layout {
                TensorLayout::Nchw => a == 3 && b > 0 && c > 0,
                TensorLayout::Nhwc => c == 3 && a > 0 && b > 0,
            };
        if !valid {
            let expected = match spec.layout {
                TensorLayout::Nchw => "(1, 3, H, W)",
                TensorLayout::Nhwc => "(1, H, W, 3)",
            };
            return Err(UpscaleError::format_error(format!(
                "Tensor shape {:?} does not match {} contract {}",
                data.dim(),
                match spec.layout {
                    TensorLayout::Nchw => "NCHW",
                    TensorLayout::Nhwc => "NHWC",
                },
                expected
            )));
        }
        Ok(Self { data, spec })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        match self.spec.layout {
            TensorLayout::Nchw => self.data.dim().3,
            TensorLayout::Nhwc => self.data.dim().2,
        }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        match self.spec.layout {
            TensorLayout::Nchw => self.data.dim().2,
            TensorLayout::Nhwc => self.data.dim().1,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    #[must_use]
    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    #[must_use]
    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    #[inline]
    fn index(&self, y: usize, x: usize, c: usize) -> [usize; 4] {
        match self.spec.layout {
            TensorLayout::Nchw => [0, c, y, x],
            TensorLayout::Nhwc => [0, y, x, c],
        }
    }
}

/// Tensor channel slot for RGBA channel `rgb` (0=R, 1=G, 2=B)
#[inline]
fn channel_slot(order: ChannelOrder, rgb: usize) -> usize {
    match order {
        ChannelOrder::Rgb => rgb,
        ChannelOrder::Bgr => 2 - rgb,
    }
}

/// Resize `image` to `target` (width, height) and pack it into a model tensor
///
/// # Errors
/// - `Decode` when the image has no pixels
/// - `Format` when the target size is empty
pub fn to_tensor(
    image: &RasterImage,
    target: (u32, u32),
    spec: &TensorSpec,
) -> Result<InferenceTensor> {
    if !image.has_pixels() {
        return Err(UpscaleError::decode("Image has no addressable pixels"));
    }
    let resized = image.resized(target.0, target.1, spec.resize_filter.filter_type())?;
    let rgba = resized.to_rgba_image();

    let (width, height) = (target.0 as usize, target.1 as usize);
    let mut tensor = InferenceTensor {
        data: Array4::<f32>::zeros(spec.shape(width, height)),
        spec: *spec,
    };

    #[allow(clippy::indexing_slicing)]
    // Safe: tensor dimensions pre-allocated to match the resized raster
    for (y, row) in rgba.rows().enumerate() {
        for (x, pixel) in row.enumerate() {
            for rgb in 0..3 {
                let slot = channel_slot(spec.channel_order, rgb);
                let idx = tensor.index(y, x, slot);
                tensor.data[idx] = spec.normalization.normalize(pixel[rgb], rgb);
            }
        }
    }

    Ok(tensor)
}

/// Unpack a model tensor into an opaque RGBA raster
pub fn from_tensor(
    tensor: &InferenceTensor,
    scale: f32,
    orientation: Orientation,
) -> Result<RasterImage> {
    let width = u32::try_from(tensor.width())
        .map_err(|_| UpscaleError::format_error("Tensor width exceeds raster limits"))?;
    let height = u32::try_from(tensor.height())
        .map_err(|_| UpscaleError::format_error("Tensor height exceeds raster limits"))?;

    let spec = tensor.spec;
    let mut rgba = RgbaImage::new(width, height);
    #[allow(clippy::indexing_slicing)]
    // Safe: raster dimensions were derived from the tensor shape
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        let mut out = [0u8, 0, 0, 255];
        for (rgb, value) in out.iter_mut().take(3).enumerate() {
            let slot = channel_slot(spec.channel_order, rgb);
            let raw = tensor.data[tensor.index(y as usize, x as usize, slot)];
            let level = spec.normalization.denormalize(raw, rgb);
            *value = if level.is_nan() {
                0
            } else {
                level.round().clamp(0.0, 255.0) as u8
            };
        }
        *pixel = Rgba(out);
    }

    Ok(RasterImage::from_rgba(rgba).with_metadata(orientation, scale))
}

/// Validate a raw backend output and unpack it in one step
pub fn array_to_raster(
    array: Array4<f32>,
    spec: &TensorSpec,
    scale: f32,
    orientation: Orientation,
) -> Result<RasterImage> {
    let tensor = InferenceTensor::new(array, *spec)?;
    from_tensor(&tensor, scale, orientation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Normalization;
    use crate::types::PixelLayout;

    fn gradient(width: u32, height: u32) -> RasterImage {
        let rgba = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 13 % 256) as u8, (y * 7 % 256) as u8, ((x + y) * 5 % 256) as u8, 255])
        });
        RasterImage::from_rgba(rgba)
    }

    fn max_channel_diff(a: &RasterImage, b: &RasterImage) -> u8 {
        let (a, b) = (a.to_rgba_image(), b.to_rgba_image());
        a.pixels()
            .zip(b.pixels())
            .flat_map(|(p, q)| (0..3).map(move |c| p[c].abs_diff(q[c])))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_identity_round_trip_within_two_levels() {
        let image = gradient(37, 23);
        for normalization in [
            Normalization::UnitRange,
            Normalization::ByteRange,
            Normalization::imagenet(),
        ] {
            for layout in [TensorLayout::Nchw, TensorLayout::Nhwc] {
                for channel_order in [ChannelOrder::Rgb, ChannelOrder::Bgr] {
                    let spec = TensorSpec {
                        layout,
                        channel_order,
                        normalization,
                        ..TensorSpec::default()
                    };
                    let tensor = to_tensor(&image, (37, 23), &spec).unwrap();
                    let back = from_tensor(&tensor, 1.0, Orientation::Up).unwrap();
                    assert_eq!(back.dimensions(), (37, 23));
                    assert!(max_channel_diff(&image, &back) <= 2, "{spec:?}");
                }
            }
        }
    }

    #[test]
    fn test_bgra_source_matches_rgba_source() {
        let rgba = gradient(8, 8);
        let bgra = rgba.clone().into_layout(PixelLayout::Bgra8);
        let spec = TensorSpec::default();
        let a = to_tensor(&rgba, (8, 8), &spec).unwrap();
        let b = to_tensor(&bgra, (8, 8), &spec).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_channel_placement() {
        let image = RasterImage::from_rgba(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 51, 255])));

        let nchw = to_tensor(&image, (2, 2), &TensorSpec::default()).unwrap();
        assert!((nchw.as_array()[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!((nchw.as_array()[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);

        let bgr = TensorSpec {
            layout: TensorLayout::Nhwc,
            channel_order: ChannelOrder::Bgr,
            ..TensorSpec::default()
        };
        let nhwc = to_tensor(&image, (2, 2), &bgr).unwrap();
        assert_eq!(nhwc.as_array().dim(), (1, 2, 2, 3));
        assert!((nhwc.as_array()[[0, 0, 0, 2]] - 1.0).abs() < 1e-6);
        assert!((nhwc.as_array()[[0, 0, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_resize_to_target() {
        let tensor = to_tensor(&gradient(100, 50), (256, 256), &TensorSpec::default()).unwrap();
        assert_eq!(tensor.as_array().dim(), (1, 3, 256, 256));
        assert_eq!((tensor.width(), tensor.height()), (256, 256));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let mut data = Array4::<f32>::zeros((1, 3, 1, 2));
        data[[0, 0, 0, 0]] = 1.7;
        data[[0, 1, 0, 0]] = -0.4;
        data[[0, 2, 0, 1]] = f32::NAN;
        let raster =
            array_to_raster(data, &TensorSpec::default(), 2.0, Orientation::Right).unwrap();
        assert_eq!(raster.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(raster.pixel(1, 0), Some([0, 0, 0, 255]));
        assert_eq!(raster.orientation(), Orientation::Right);
        assert!((raster.scale() - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_shape_contract_violations() {
        let spec = TensorSpec::default();
        assert!(matches!(
            InferenceTensor::new(Array4::zeros((1, 4, 8, 8)), spec),
            Err(UpscaleError::Format(_))
        ));
        assert!(InferenceTensor::new(Array4::zeros((2, 3, 8, 8)), spec).is_err());

        let nhwc = TensorSpec {
            layout: TensorLayout::Nhwc,
            ..spec
        };
        assert!(InferenceTensor::new(Array4::zeros((1, 3, 8, 8)), nhwc).is_err());
        assert!(InferenceTensor::new(Array4::zeros((1, 8, 8, 3)), nhwc).is_ok());
    }

    #[test]
    fn test_empty_image_is_a_decode_error() {
        let empty = RasterImage::new(0, 0, PixelLayout::Rgba8, Vec::new()).unwrap();
        assert!(matches!(
            to_tensor(&empty, (8, 8), &TensorSpec::default()),
            Err(UpscaleError::Decode(_))
        ));
    }
}
