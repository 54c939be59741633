//! On-device two-stage upscaling
//!
//! ```text
//! image -> [letterbox] -> restoration (256x256) -> super-resolution (512 -> 2048)
//!       -> [crop padding] -> resize to the input size
//! ```
//!
//! Each stage resizes to its model's fixed input through the bridge. A
//! failure in any stage aborts the run; nothing partial is returned.

use crate::{
    backends::BackendKind,
    bridge,
    config::{AspectMode, BackendConfig},
    error::{Result, UpscaleError},
    inference::{run_exclusive, SharedBackend},
    models::ModelSpec,
    session_cache::SessionCache,
    types::{PixelRect, RasterImage},
};
use image::{imageops::FilterType, Rgba, RgbaImage};
use instant::Instant;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Padding color for letterboxed inputs
const LETTERBOX_FILL: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Which stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Restoration (deblur) followed by super-resolution
    RestoreThenUpscale,
    /// Super-resolution only
    UpscaleOnly,
}

/// One fixed-shape model in the chain
#[derive(Clone)]
pub struct ModelStage {
    name: String,
    backend: SharedBackend,
    spec: ModelSpec,
}

impl std::fmt::Debug for ModelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStage")
            .field("name", &self.name)
            .field("input_size", &self.spec.input_size)
            .field("output_size", &self.spec.output_size)
            .finish_non_exhaustive()
    }
}

impl ModelStage {
    pub fn new<S: Into<String>>(name: S, backend: SharedBackend, spec: ModelSpec) -> Self {
        Self {
            name: name.into(),
            backend,
            spec,
        }
    }

    /// Load (or reuse) the model through `cache`
    pub fn load(
        name: &str,
        cache: &SessionCache,
        kind: BackendKind,
        config: &BackendConfig,
        spec: ModelSpec,
    ) -> Result<Self> {
        let backend = cache.get_or_load(&spec, kind, config)?;
        Ok(Self::new(name, backend, spec))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Run the model on `image`; any failure is reported as this stage failing
    pub fn run(&self, image: &RasterImage) -> Result<RasterImage> {
        self.run_inner(image)
            .map_err(|e| UpscaleError::stage_failed(&self.name, e))
    }

    fn run_inner(&self, image: &RasterImage) -> Result<RasterImage> {
        let start = Instant::now();
        let tensor = bridge::to_tensor(image, self.spec.input_size, &self.spec.tensor)?;
        let output = run_exclusive(&self.backend, tensor.as_array())?;

        let expected = self.spec.output_shape();
        if output.dim() != expected {
            return Err(UpscaleError::format_error(format!(
                "expected output {:?}, got {:?}",
                expected,
                output.dim()
            )));
        }

        let raster =
            bridge::array_to_raster(output, &self.spec.tensor, image.scale(), image.orientation())?;
        debug!(
            stage = %self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "stage complete"
        );
        Ok(raster)
    }
}

/// Pad `image` to a centered square; returns the square and where the content sits
fn letterbox(image: &RasterImage) -> (RasterImage, PixelRect) {
    let (width, height) = image.dimensions();
    let side = width.max(height);
    let content = PixelRect::new((side - width) / 2, (side - height) / 2, width, height);
    if width == height {
        return (image.clone(), content);
    }

    let mut canvas = RgbaImage::from_pixel(side, side, LETTERBOX_FILL);
    image::imageops::overlay(
        &mut canvas,
        &image.to_rgba_image(),
        i64::from(content.x),
        i64::from(content.y),
    );
    (image.derive_from_rgba(canvas), content)
}

/// Cut the content region back out of an upscaled letterboxed square
fn crop_letterbox(output: &RasterImage, content: PixelRect, side: u32) -> Result<RasterImage> {
    if content.width == side && content.height == side {
        return Ok(output.clone());
    }
    let sx = output.width() as f32 / side as f32;
    let sy = output.height() as f32 / side as f32;
    let x = ((content.x as f32 * sx).round() as u32).min(output.width().saturating_sub(1));
    let y = ((content.y as f32 * sy).round() as u32).min(output.height().saturating_sub(1));
    let w = ((content.width as f32 * sx).round() as u32).clamp(1, output.width() - x);
    let h = ((content.height as f32 * sy).round() as u32).clamp(1, output.height() - y);
    output.crop(PixelRect::new(x, y, w, h))
}

/// Chained restoration and super-resolution on device
#[derive(Debug, Clone)]
pub struct LocalUpscalePipeline {
    restoration: Option<ModelStage>,
    super_resolution: ModelStage,
    aspect: AspectMode,
}

impl LocalUpscalePipeline {
    /// Super-resolution only
    #[must_use]
    pub fn new(super_resolution: ModelStage) -> Self {
        Self {
            restoration: None,
            super_resolution,
            aspect: AspectMode::default(),
        }
    }

    /// Restoration then super-resolution
    #[must_use]
    pub fn with_restoration(mut self, restoration: ModelStage) -> Self {
        self.restoration = Some(restoration);
        self
    }

    #[must_use]
    pub fn with_aspect_mode(mut self, aspect: AspectMode) -> Self {
        self.aspect = aspect;
        self
    }

    /// Assemble the stages `variant` asks for
    ///
    /// # Errors
    /// - `InvalidConfig` when `RestoreThenUpscale` has no restoration stage
    pub fn for_variant(
        variant: PipelineVariant,
        restoration: Option<ModelStage>,
        super_resolution: ModelStage,
    ) -> Result<Self> {
        let pipeline = Self::new(super_resolution);
        match (variant, restoration) {
            (PipelineVariant::RestoreThenUpscale, Some(stage)) => {
                Ok(pipeline.with_restoration(stage))
            },
            (PipelineVariant::RestoreThenUpscale, None) => Err(UpscaleError::invalid_config(
                "Restore-then-upscale needs a restoration model",
            )),
            (PipelineVariant::UpscaleOnly, restoration) => {
                if restoration.is_some() {
                    debug!("upscale-only variant; restoration stage unused");
                }
                Ok(pipeline)
            },
        }
    }

    /// Load the stages `variant` asks for, sharing sessions through `cache`
    ///
    /// The variant is checked before any model is loaded.
    pub fn from_specs(
        cache: &SessionCache,
        kind: BackendKind,
        config: &BackendConfig,
        variant: PipelineVariant,
        restoration: Option<ModelSpec>,
        super_resolution: ModelSpec,
    ) -> Result<Self> {
        let restoration = match (variant, restoration) {
            (PipelineVariant::RestoreThenUpscale, None) => {
                return Err(UpscaleError::invalid_config(
                    "Restore-then-upscale needs a restoration model",
                ));
            },
            (PipelineVariant::RestoreThenUpscale, Some(spec)) => {
                Some(ModelStage::load("restoration", cache, kind, config, spec)?)
            },
            (PipelineVariant::UpscaleOnly, _) => None,
        };
        let sr = ModelStage::load("super_resolution", cache, kind, config, super_resolution)?;
        Self::for_variant(variant, restoration, sr)
    }

    #[must_use]
    pub fn variant(&self) -> PipelineVariant {
        if self.restoration.is_some() {
            PipelineVariant::RestoreThenUpscale
        } else {
            PipelineVariant::UpscaleOnly
        }
    }

    #[must_use]
    pub fn aspect_mode(&self) -> AspectMode {
        self.aspect
    }

    /// Upscale `image`; the result has the input's size, layout and metadata
    pub fn run(&self, image: &RasterImage) -> Result<RasterImage> {
        self.run_cancellable(image, &CancellationToken::new())
    }

    /// Like [`run`](Self::run), checking `cancel` between stages
    ///
    /// # Errors
    /// - `Decode` when the image has no pixels
    /// - `StageFailed` naming the stage that failed
    /// - `Cancelled` when `cancel` fires between stages
    #[instrument(
        skip_all,
        fields(width = image.width(), height = image.height(), variant = ?self.variant())
    )]
    pub fn run_cancellable(
        &self,
        image: &RasterImage,
        cancel: &CancellationToken,
    ) -> Result<RasterImage> {
        if !image.has_pixels() {
            return Err(UpscaleError::decode("Image has no addressable pixels"));
        }
        let start = Instant::now();
        let checkpoint = || {
            if cancel.is_cancelled() {
                Err(UpscaleError::Cancelled)
            } else {
                Ok(())
            }
        };

        let (prepared, content) = match self.aspect {
            AspectMode::Letterbox => {
                let (square, content) = letterbox(image);
                (square, Some(content))
            },
            AspectMode::Stretch => (image.clone(), None),
        };
        let side = prepared.width();

        checkpoint()?;
        let restored = match &self.restoration {
            Some(stage) => stage.run(&prepared)?,
            None => prepared,
        };

        checkpoint()?;
        let upscaled = self.super_resolution.run(&restored)?;

        checkpoint()?;
        let framed = match content {
            Some(content) => crop_letterbox(&upscaled, content, side)
                .map_err(|e| UpscaleError::stage_failed("postprocess", e))?,
            None => upscaled,
        };
        let result = framed
            .resized(image.width(), image.height(), FilterType::Lanczos3)
            .map_err(|e| UpscaleError::stage_failed("postprocess", e))?
            .into_layout(image.layout())
            .with_metadata(image.orientation(), image.scale());

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "local upscale complete"
        );
        Ok(result)
    }
}
