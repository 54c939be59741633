#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Damoon Upscale
//!
//! Subject masking, box/lasso selection compositing and two-stage neural
//! upscaling for photos, with a remote upscaling service and on-device
//! fallback.
//!
//! ## Pipeline
//!
//! ```text
//! photo -> [SubjectMasker] -> [selection::compose] -> UpscaleOrchestrator
//!                                                      |-> RemoteUpscaleClient
//!                                                      '-> LocalUpscalePipeline (fallback)
//! ```
//!
//! - **Masking**: an instance segmentation model proposes subjects; the one
//!   with the largest bounding box is cut out and cropped to its extent.
//! - **Selection**: a box or lasso clips the image, then transparent regions
//!   are filled with a solid color or a dimmed copy of the photo.
//! - **Local upscaling**: a 256x256 restoration model followed by a
//!   512 -> 2048 super-resolution model, run through ONNX Runtime or Tract.
//! - **Remote upscaling**: JPEG upload to an HTTP endpoint; failures fall
//!   back to the local models.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use damoon_upscale::{
//!     BackendKind, LocalUpscalePipeline, ModelSpec, PipelineVariant, RasterImage, SessionCache,
//!     UpscaleConfig, UpscaleOrchestrator, UpscaleRequest,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpscaleConfig::builder().local_only(true).build()?;
//! let cache = SessionCache::new();
//! let local = LocalUpscalePipeline::from_specs(
//!     &cache,
//!     BackendKind::Onnx,
//!     &config.backend,
//!     PipelineVariant::RestoreThenUpscale,
//!     Some(ModelSpec::restoration("models/deblur.onnx")),
//!     ModelSpec::super_resolution("models/sr.onnx"),
//! )?;
//! let orchestrator = UpscaleOrchestrator::from_config(&config, local, None)?;
//!
//! let photo = RasterImage::open("photo.jpg")?;
//! let upscaled = orchestrator
//!     .upscale(UpscaleRequest::configured(photo, &config))
//!     .await?;
//! upscaled.save("photo_upscaled.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML providers
//! - `tract` (default): pure Rust backend
//! - `cli` (default): the `damoon-upscale` binary
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
pub mod bridge;
#[cfg(feature = "cli")]
pub mod cli;
pub mod comparison;
pub mod config;
pub mod error;
pub mod inference;
pub mod masker;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod remote;
pub mod selection;
pub mod session_cache;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

pub use backends::{create_backend, BackendKind};
pub use bridge::{from_tensor, to_tensor, InferenceTensor};
pub use config::{
    AspectMode, BackendConfig, ExecutionProvider, FillPolicy, Preferences, RemoteConfig,
    RequestEnvelope, RoutingPreference, UpscaleConfig, UpscaleConfigBuilder,
};
pub use error::{Result, UpscaleError};
pub use inference::{InferenceBackend, SharedBackend};
pub use masker::{InstanceSegmenter, ModelInstanceSegmenter, SubjectInstance, SubjectMasker};
pub use models::{ModelInfo, ModelSource, ModelSpec, Normalization, TensorLayout, TensorSpec};
pub use orchestrator::{
    BusyIndicator, PipelineEvent, PipelineState, UpscaleHandle, UpscaleOrchestrator,
    UpscaleRequest,
};
pub use pipeline::{LocalUpscalePipeline, ModelStage, PipelineVariant};
pub use remote::{RemoteUpscaleClient, RemoteUpscaler};
pub use selection::{apply_clip, compose, crop_to_selection, fill_background};
pub use session_cache::{SessionCache, SessionCacheStats};
pub use types::{
    NormalizedRect, Orientation, PixelLayout, PixelRect, Point, RasterImage, SelectionKind,
    SelectionPath, SelectionPathBuilder, SubjectMask,
};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat, TracingOutput};
