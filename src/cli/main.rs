//! Photo upscaling CLI
//!
//! Loads a photo, optionally cuts out the subject and applies a box or lasso
//! selection, then upscales it remotely (falling back to the on-device
//! models) or locally only.

use super::config::{tracing_config_from_cli, CliConfigBuilder, CliSettings};
use crate::{
    comparison,
    error::UpscaleError,
    masker::{ModelInstanceSegmenter, SubjectMasker},
    orchestrator::{PipelineEvent, UpscaleOrchestrator, UpscaleRequest},
    pipeline::LocalUpscalePipeline,
    session_cache::SessionCache,
    tracing_config::{spans, TracingGuard},
    types::RasterImage,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};

/// Subject masking, selection and neural upscaling for photos
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "damoon-upscale")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image
    #[arg(value_name = "INPUT", required_unless_present = "show_providers")]
    pub input: Option<PathBuf>,

    /// Output file [default: <INPUT>_upscaled.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// JSON configuration file; flags take precedence
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Super-resolution model (ONNX, 512x512 in, 2048x2048 out)
    #[arg(long, value_name = "PATH", env = "DAMOON_SR_MODEL")]
    pub sr_model: Option<PathBuf>,

    /// Restoration model (ONNX, 256x256); omit to run super-resolution only
    #[arg(long, value_name = "PATH", env = "DAMOON_DEBLUR_MODEL")]
    pub deblur_model: Option<PathBuf>,

    /// Instance segmentation model used by --mask
    #[arg(long, value_name = "PATH", env = "DAMOON_SEGMENTATION_MODEL")]
    pub segmentation_model: Option<PathBuf>,

    /// Square input size of the segmentation model
    #[arg(long, default_value_t = 320)]
    pub segmentation_size: u32,

    /// Cut out the primary subject before upscaling
    #[arg(long)]
    pub mask: bool,

    /// Box selection in pixels: x0,y0,x1,y1
    #[arg(long = "box", value_name = "X0,Y0,X1,Y1", conflicts_with = "lasso")]
    pub selection_box: Option<String>,

    /// Lasso selection in pixels: x,y;x,y;...
    #[arg(long, value_name = "X,Y;X,Y;...")]
    pub lasso: Option<String>,

    /// Fill outside the selection with the dimmed photo instead of a solid color
    #[arg(long)]
    pub darken: bool,

    /// How much to dim the background (0.0-1.0) [default: 0.3]
    #[arg(long)]
    pub darkness: Option<f32>,

    /// Solid fill color as RRGGBB [default: ffffff]
    #[arg(long, value_name = "RRGGBB")]
    pub fill_color: Option<String>,

    /// Never contact the remote service
    #[arg(long)]
    pub local_only: bool,

    /// Remote upscaling endpoint
    #[arg(long, value_name = "URL", env = "DAMOON_ENDPOINT")]
    pub endpoint: Option<String>,

    /// API key sent to the remote endpoint
    #[arg(long, env = "DAMOON_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Remote request timeout in milliseconds [default: 15000]
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Send a JSON body with a base64 photo instead of multipart
    #[arg(long)]
    pub legacy_envelope: bool,

    /// Which local stages run [default: restore-then-upscale when --deblur-model is set]
    #[arg(long, value_enum)]
    pub variant: Option<CliVariant>,

    /// How non-square photos are fed to the square models
    #[arg(long, value_enum)]
    pub aspect: Option<CliAspectMode>,

    /// Inference backend and provider, e.g. onnx:auto, onnx:cuda, tract:cpu
    #[arg(short, long, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Inference threads (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Write a before/after comparison instead of the plain result
    #[arg(long, value_enum)]
    pub compare: Option<CompareMode>,

    /// Split position for side-by-side, or opacity for overlay (0.0-1.0)
    #[arg(long, default_value_t = 0.5)]
    pub compare_amount: f32,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Write logs to this file instead of the terminal
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Verbose logging (-v: debug for this crate, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliAspectMode {
    Letterbox,
    Stretch,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliVariant {
    RestoreThenUpscale,
    UpscaleOnly,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    /// Needs the `tracing-json` feature
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CompareMode {
    SideBySide,
    Overlay,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli)?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let settings = CliConfigBuilder::from_cli(&cli).context("Invalid arguments")?;
    let session_id = uuid::Uuid::new_v4().to_string();
    let span = spans::session(
        &session_id,
        &settings.backend.to_string(),
        &format!("{:?}", settings.config.routing()),
    );

    run(&cli, settings).instrument(span).await
}

fn init_tracing(cli: &Cli) -> Result<TracingGuard> {
    tracing_config_from_cli(cli)?
        .init()
        .context("Failed to initialize tracing subscriber")
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn build_orchestrator(settings: &CliSettings) -> Result<UpscaleOrchestrator> {
    let cache = SessionCache::new();
    let backend_config = &settings.config.backend;

    let local = {
        let _span = spans::model_loading("local", &settings.super_resolution.name).entered();
        LocalUpscalePipeline::from_specs(
            &cache,
            settings.backend,
            backend_config,
            settings.variant,
            settings.restoration.clone(),
            settings.super_resolution.clone(),
        )
        .context("Failed to load upscaling models")?
        .with_aspect_mode(settings.config.aspect_mode)
    };

    let masker = match &settings.segmentation {
        Some(spec) if settings.mask => {
            let _span = spans::model_loading("segmentation", &spec.name).entered();
            let backend = cache
                .get_or_load(spec, settings.backend, backend_config)
                .context("Failed to load segmentation model")?;
            Some(SubjectMasker::new(Arc::new(ModelInstanceSegmenter::new(
                backend,
                spec.clone(),
            ))))
        },
        _ => None,
    };

    UpscaleOrchestrator::from_config(&settings.config, local, masker)
        .context("Invalid configuration")
}

async fn run(cli: &Cli, settings: CliSettings) -> Result<()> {
    let start = Instant::now();
    let image = RasterImage::open(&settings.input)
        .with_context(|| format!("Failed to read {}", settings.input.display()))?;
    info!(
        input = %settings.input.display(),
        width = image.width(),
        height = image.height(),
        "loaded photo"
    );

    let orchestrator = build_orchestrator(&settings)?;
    let mut request = UpscaleRequest::configured(image.clone(), &settings.config);
    let mut reference = image.clone();

    if settings.mask {
        let pb = spinner("Finding subject...");
        let masked = orchestrator.mask_subject(image.clone()).await;
        pb.finish_and_clear();
        match masked {
            Ok(mask) => {
                reference = image.crop(mask.extent)?;
                request = request.with_mask(mask);
            },
            Err(UpscaleError::NoSubjectFound) => {
                warn!("no subject found; upscaling the whole photo");
            },
            Err(e) => anyhow::bail!("{}", e.user_message()),
        }
    }
    if let Some(selection) = settings.selection.clone() {
        request = request.with_selection(selection);
    }

    let pb = spinner("Upscaling...");
    let mut events = orchestrator.subscribe();
    let notifier = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    PipelineEvent::FallbackOccurred { .. } => {
                        pb.set_message("Service unavailable, upscaling on this device...");
                    },
                    PipelineEvent::Succeeded { .. }
                    | PipelineEvent::Failed { .. }
                    | PipelineEvent::Discarded => break,
                    _ => {},
                }
            }
        })
    };

    let outcome = orchestrator.upscale(request).await;
    pb.finish_and_clear();
    notifier.abort();
    let upscaled = outcome.map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;

    let output = match cli.compare {
        Some(CompareMode::SideBySide) => {
            comparison::side_by_side(&reference, &upscaled, cli.compare_amount)?
        },
        Some(CompareMode::Overlay) => {
            comparison::overlay(&reference, &upscaled, cli.compare_amount)?
        },
        None => upscaled,
    };
    output
        .save(&settings.output)
        .with_context(|| format!("Failed to write {}", settings.output.display()))?;

    info!(
        output = %settings.output.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "done"
    );
    println!("Saved {}", settings.output.display());
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores");
    println!();
    println!("Backends:");
    println!("  onnx   ONNX Runtime (default), hardware acceleration where available");
    println!("  tract  pure Rust, CPU only");

    #[cfg(feature = "onnx")]
    {
        println!();
        println!("ONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name:<8} {status:<14} {description}");
        }
    }

    println!();
    println!("Examples:");
    println!("  --execution-provider onnx:auto");
    println!("  --execution-provider onnx:cuda");
    println!("  --execution-provider tract:cpu");
}
