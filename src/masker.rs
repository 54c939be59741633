//! Foreground subject isolation
//!
//! A segmentation model proposes instance mattes with normalized bounding
//! boxes. The instance with the largest box wins (first one on ties); its
//! matte becomes the alpha channel and the result is cropped to its extent.

use crate::{
    bridge,
    error::{Result, UpscaleError},
    inference::{run_exclusive, SharedBackend},
    models::ModelSpec,
    types::{NormalizedRect, RasterImage, SubjectMask},
};
use image::{imageops::FilterType, GrayImage, Luma};
use ndarray::Array4;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Matte values above this count as foreground
pub const FOREGROUND_THRESHOLD: f32 = 0.5;

/// One candidate foreground instance
#[derive(Debug, Clone)]
pub struct SubjectInstance {
    /// Soft matte at any resolution; scaled to the image when applied
    pub matte: GrayImage,
    /// Normalized bounding box of the instance
    pub bounds: NormalizedRect,
}

/// Produces candidate foreground instances for an image
pub trait InstanceSegmenter: Send + Sync {
    fn segment(&self, image: &RasterImage) -> Result<Vec<SubjectInstance>>;
}

/// Segmenter backed by an instance segmentation model
///
/// The model emits one probability map per instance: output channel `k` of
/// a (1, K, H, W) tensor is instance `k`. Channels with no pixel above
/// [`FOREGROUND_THRESHOLD`] are not instances.
pub struct ModelInstanceSegmenter {
    backend: SharedBackend,
    spec: ModelSpec,
}

impl std::fmt::Debug for ModelInstanceSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstanceSegmenter")
            .field("model", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl ModelInstanceSegmenter {
    #[must_use]
    pub fn new(backend: SharedBackend, spec: ModelSpec) -> Self {
        Self { backend, spec }
    }

    fn instances_from_output(output: &Array4<f32>) -> Vec<SubjectInstance> {
        let (_, channels, height, width) = output.dim();
        if height == 0 || width == 0 {
            return Vec::new();
        }
        let mut instances = Vec::new();

        for k in 0..channels {
            let plane = output.slice(ndarray::s![0, k, .., ..]);
            let mut min = (usize::MAX, usize::MAX);
            let mut max = (0usize, 0usize);
            let mut found = false;
            let mut matte = GrayImage::new(width as u32, height as u32);

            for ((y, x), &value) in plane.indexed_iter() {
                let v = value.clamp(0.0, 1.0);
                matte.put_pixel(x as u32, y as u32, Luma([(v * 255.0).round() as u8]));
                if value > FOREGROUND_THRESHOLD {
                    found = true;
                    min = (min.0.min(x), min.1.min(y));
                    max = (max.0.max(x), max.1.max(y));
                }
            }

            if found {
                let (w, h) = (width as f32, height as f32);
                instances.push(SubjectInstance {
                    matte,
                    bounds: NormalizedRect::new(
                        min.0 as f32 / w,
                        min.1 as f32 / h,
                        (max.0 - min.0 + 1) as f32 / w,
                        (max.1 - min.1 + 1) as f32 / h,
                    ),
                });
            }
        }

        instances
    }
}

impl InstanceSegmenter for ModelInstanceSegmenter {
    fn segment(&self, image: &RasterImage) -> Result<Vec<SubjectInstance>> {
        let tensor = bridge::to_tensor(image, self.spec.input_size, &self.spec.tensor)?;
        let output = run_exclusive(&self.backend, tensor.as_array())
            .map_err(|e| UpscaleError::stage_failed("segmentation", e))?;
        if output.dim().0 != 1 {
            return Err(UpscaleError::format_error(format!(
                "Segmentation output {:?} is not a single batch",
                output.dim()
            )));
        }
        Ok(Self::instances_from_output(&output))
    }
}

/// Index of the instance with the largest bounding box; ties keep the earliest
#[must_use]
pub fn select_primary(instances: &[SubjectInstance]) -> Option<usize> {
    instances
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, instance)| {
            let area = instance.bounds.area();
            match best {
                Some((_, best_area)) if area <= best_area => best,
                _ => Some((i, area)),
            }
        })
        .map(|(i, _)| i)
}

/// Isolates the primary subject of a photo
#[derive(Clone)]
pub struct SubjectMasker {
    segmenter: Arc<dyn InstanceSegmenter>,
}

impl std::fmt::Debug for SubjectMasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectMasker").finish_non_exhaustive()
    }
}

impl SubjectMasker {
    pub fn new(segmenter: Arc<dyn InstanceSegmenter>) -> Self {
        Self { segmenter }
    }

    /// Cut out the primary subject and crop to its extent
    ///
    /// # Errors
    /// - `Decode` when the image has no pixels
    /// - `NoSubjectFound` when the model proposes no instance
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn mask(&self, image: &RasterImage) -> Result<SubjectMask> {
        let (cutout, instance) = self.cutout(image)?;
        let extent = instance.bounds.to_pixels(image.width(), image.height());
        if extent.is_empty() {
            return Err(UpscaleError::NoSubjectFound);
        }
        debug!(?extent, "cropping to subject extent");
        Ok(SubjectMask {
            image: cutout.crop(extent)?,
            extent,
        })
    }

    /// Cut out the primary subject without cropping
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn mask_full_frame(&self, image: &RasterImage) -> Result<RasterImage> {
        self.cutout(image).map(|(cutout, _)| cutout)
    }

    fn cutout(&self, image: &RasterImage) -> Result<(RasterImage, SubjectInstance)> {
        if !image.has_pixels() {
            return Err(UpscaleError::decode("Image has no addressable pixels"));
        }

        let mut instances = self.segmenter.segment(image)?;
        let primary = select_primary(&instances).ok_or(UpscaleError::NoSubjectFound)?;
        debug!(
            candidates = instances.len(),
            primary,
            "selected primary subject instance"
        );
        let instance = instances.swap_remove(primary);

        let (width, height) = image.dimensions();
        let matte = if instance.matte.dimensions() == (width, height) {
            instance.matte.clone()
        } else {
            image::imageops::resize(&instance.matte, width, height, FilterType::Triangle)
        };

        let mut rgba = image.to_rgba_image();
        for (pixel, weight) in rgba.pixels_mut().zip(matte.pixels()) {
            let alpha = u16::from(pixel[3]) * u16::from(weight[0]);
            pixel[3] = ((alpha + 127) / 255) as u8;
        }

        Ok((image.derive_from_rgba(rgba), instance))
    }
}
