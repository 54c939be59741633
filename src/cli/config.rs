//! Turn command-line arguments into library configuration

use crate::cli::main_impl::{Cli, CliAspectMode, CliLogFormat, CliVariant};
use crate::{
    backends::BackendKind,
    config::{AspectMode, ExecutionProvider, RemoteConfig, RequestEnvelope, UpscaleConfig},
    models::ModelSpec,
    pipeline::PipelineVariant,
    tracing_config::{TracingConfig, TracingFormat, TracingOutput},
    types::{Point, SelectionPath},
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Everything a run needs, resolved from flags and the optional config file
#[derive(Debug)]
pub(crate) struct CliSettings {
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,
    pub(crate) config: UpscaleConfig,
    pub(crate) backend: BackendKind,
    pub(crate) variant: PipelineVariant,
    pub(crate) super_resolution: ModelSpec,
    pub(crate) restoration: Option<ModelSpec>,
    pub(crate) segmentation: Option<ModelSpec>,
    pub(crate) mask: bool,
    pub(crate) selection: Option<SelectionPath>,
}

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_cli(cli: &Cli) -> Result<CliSettings> {
        let input = cli.input.clone().context("An input image is required")?;
        let output = cli.output.clone().unwrap_or_else(|| default_output(&input));
        let sr_model = cli
            .sr_model
            .clone()
            .context("A super-resolution model is required (--sr-model)")?;
        if cli.mask && cli.segmentation_model.is_none() {
            bail!("--mask needs a segmentation model (--segmentation-model)");
        }

        let variant = match cli.variant {
            Some(CliVariant::RestoreThenUpscale) => PipelineVariant::RestoreThenUpscale,
            Some(CliVariant::UpscaleOnly) => PipelineVariant::UpscaleOnly,
            None if cli.deblur_model.is_some() => PipelineVariant::RestoreThenUpscale,
            None => PipelineVariant::UpscaleOnly,
        };
        if variant == PipelineVariant::RestoreThenUpscale && cli.deblur_model.is_none() {
            bail!("--variant restore-then-upscale needs a restoration model (--deblur-model)");
        }

        let (backend, execution_provider) = parse_provider_string(&cli.execution_provider)?;

        let mut config = match &cli.config {
            Some(path) => UpscaleConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => UpscaleConfig::default(),
        };
        config.backend.execution_provider = execution_provider;
        config.backend.intra_threads = cli.threads;
        config.backend.inter_threads = cli.threads;
        config.preferences.local_only |= cli.local_only;
        config.preferences.darken_background |= cli.darken;
        if let Some(darkness) = cli.darkness {
            config.preferences.darkness = darkness;
        }
        if let Some(color) = &cli.fill_color {
            config.fill_color = parse_color(color)?;
        }
        if let Some(aspect) = cli.aspect {
            config.aspect_mode = match aspect {
                CliAspectMode::Letterbox => AspectMode::Letterbox,
                CliAspectMode::Stretch => AspectMode::Stretch,
            };
        }
        if let Some(endpoint) = &cli.endpoint {
            let mut remote = RemoteConfig::new(endpoint.clone());
            if let Some(key) = &cli.api_key {
                remote = remote.with_credential(key.clone());
            }
            if let Some(ms) = cli.timeout_ms {
                remote = remote.with_timeout(Duration::from_millis(ms));
            }
            if cli.legacy_envelope {
                remote = remote.with_envelope(RequestEnvelope::JsonBase64);
            }
            config.remote = Some(remote);
        }
        config.validate().context("Invalid configuration")?;

        let selection = match (&cli.selection_box, &cli.lasso) {
            (Some(spec), _) => Some(parse_box(spec)?),
            (None, Some(spec)) => Some(parse_lasso(spec)?),
            (None, None) => None,
        };

        Ok(CliSettings {
            input,
            output,
            config,
            backend,
            variant,
            super_resolution: ModelSpec::super_resolution(sr_model),
            restoration: cli.deblur_model.clone().map(ModelSpec::restoration),
            segmentation: cli
                .segmentation_model
                .clone()
                .map(|path| ModelSpec::segmentation(path, cli.segmentation_size)),
            mask: cli.mask,
            selection,
        })
    }
}

/// Subscriber settings from `--log-format`, `--log-file` and `-v`
pub(crate) fn tracing_config_from_cli(cli: &Cli) -> Result<TracingConfig> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
        #[cfg(not(feature = "tracing-json"))]
        CliLogFormat::Json => bail!("--log-format json needs the tracing-json feature"),
    };
    let output = match &cli.log_file {
        None => TracingOutput::Console,
        #[cfg(feature = "tracing-files")]
        Some(path) => TracingOutput::File(path.clone()),
        #[cfg(not(feature = "tracing-files"))]
        Some(path) => bail!(
            "--log-file {} needs the tracing-files feature",
            path.display()
        ),
    };

    Ok(TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .with_output(output))
}

fn default_output(input: &std::path::Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".into(), |s| s.to_string_lossy());
    input.with_file_name(format!("{stem}_upscaled.png"))
}

/// `backend` or `backend:provider`, e.g. `onnx:cuda`, `tract`
pub(crate) fn parse_provider_string(value: &str) -> Result<(BackendKind, ExecutionProvider)> {
    let (backend, provider) = value.split_once(':').unwrap_or((value, ""));
    let backend: BackendKind = backend.parse()?;
    let provider = match (backend, provider) {
        (BackendKind::Onnx, "" | "auto") => ExecutionProvider::Auto,
        (_, "cpu") | (BackendKind::Tract, "") => ExecutionProvider::Cpu,
        (BackendKind::Onnx, "cuda") => ExecutionProvider::Cuda,
        (BackendKind::Onnx, "coreml") => ExecutionProvider::CoreMl,
        (BackendKind::Onnx, other) => {
            bail!("Unknown ONNX provider '{other}'. Supported: auto, cpu, cuda, coreml")
        },
        (BackendKind::Tract, other) => {
            bail!("Unknown Tract provider '{other}'. Tract only supports 'cpu'")
        },
    };
    Ok((backend, provider))
}

fn parse_point(value: &str) -> Result<Point> {
    let (x, y) = value
        .split_once(',')
        .with_context(|| format!("Expected 'x,y', got '{value}'"))?;
    Ok(Point::new(
        x.trim().parse().with_context(|| format!("Bad x coordinate '{x}'"))?,
        y.trim().parse().with_context(|| format!("Bad y coordinate '{y}'"))?,
    ))
}

/// `x0,y0,x1,y1`
pub(crate) fn parse_box(value: &str) -> Result<SelectionPath> {
    let numbers: Vec<&str> = value.split(',').collect();
    let [x0, y0, x1, y1] = numbers.as_slice() else {
        bail!("--box expects x0,y0,x1,y1, got '{value}'");
    };
    Ok(SelectionPath::rectangle(
        parse_point(&format!("{x0},{y0}"))?,
        parse_point(&format!("{x1},{y1}"))?,
    ))
}

/// `x,y;x,y;...`
pub(crate) fn parse_lasso(value: &str) -> Result<SelectionPath> {
    let points = value
        .split(';')
        .filter(|p| !p.trim().is_empty())
        .map(parse_point)
        .collect::<Result<Vec<_>>>()?;
    Ok(SelectionPath::polygon(points))
}

/// `RRGGBB` or `#RRGGBB`
pub(crate) fn parse_color(value: &str) -> Result<[u8; 4]> {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        bail!("Colors are written RRGGBB, got '{value}'");
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).with_context(|| format!("Bad color '{value}'"))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?, 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("damoon-upscale").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_provider_strings() {
        assert_eq!(
            parse_provider_string("onnx").unwrap(),
            (BackendKind::Onnx, ExecutionProvider::Auto)
        );
        assert_eq!(
            parse_provider_string("onnx:coreml").unwrap(),
            (BackendKind::Onnx, ExecutionProvider::CoreMl)
        );
        assert_eq!(
            parse_provider_string("tract").unwrap(),
            (BackendKind::Tract, ExecutionProvider::Cpu)
        );
        assert!(parse_provider_string("tract:cuda").is_err());
        assert!(parse_provider_string("mock:cpu").is_err());
    }

    #[test]
    fn test_selection_parsing() {
        let rect = parse_box("10, 20,30,40").unwrap();
        assert_eq!(
            rect,
            SelectionPath::rectangle(Point::new(10.0, 20.0), Point::new(30.0, 40.0))
        );
        assert!(parse_box("1,2,3").is_err());

        let lasso = parse_lasso("0,0;10,0;5,8;").unwrap();
        assert_eq!(lasso.vertices().len(), 3);
        assert!(parse_lasso("0,0;x,1").is_err());
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_color("#ff8000").unwrap(), [255, 128, 0, 255]);
        assert_eq!(parse_color("000000").unwrap(), [0, 0, 0, 255]);
        assert!(parse_color("fff").is_err());
        assert!(parse_color("gg0000").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let settings = CliConfigBuilder::from_cli(&cli(&[
            "photo.jpg",
            "--sr-model",
            "sr.onnx",
            "--deblur-model",
            "deblur.onnx",
            "--local-only",
            "--darken",
            "--darkness",
            "0.5",
            "--box",
            "0,0,10,10",
            "--endpoint",
            "http://127.0.0.1:8080/run_inference",
            "--legacy-envelope",
        ]))
        .unwrap();

        assert_eq!(settings.output, PathBuf::from("photo_upscaled.png"));
        assert!(settings.config.preferences.local_only);
        assert_eq!(settings.config.fill_policy(), crate::config::FillPolicy::darken(0.5));
        assert_eq!(settings.variant, PipelineVariant::RestoreThenUpscale);
        assert_eq!(settings.restoration.map(|s| s.input_size), Some((256, 256)));
        assert_eq!(settings.super_resolution.output_size, (2048, 2048));
        assert!(settings.selection.is_some());
        assert_eq!(
            settings.config.remote.map(|r| r.envelope),
            Some(RequestEnvelope::JsonBase64)
        );
    }

    #[test]
    fn test_missing_requirements() {
        assert!(CliConfigBuilder::from_cli(&cli(&["photo.jpg"])).is_err());
        assert!(
            CliConfigBuilder::from_cli(&cli(&["photo.jpg", "--sr-model", "sr.onnx", "--mask"]))
                .is_err()
        );
        assert!(CliConfigBuilder::from_cli(&cli(&[
            "photo.jpg",
            "--sr-model",
            "sr.onnx",
            "--darkness",
            "2.0"
        ]))
        .is_err());
    }

    #[test]
    fn test_variant_selection() {
        let settings =
            CliConfigBuilder::from_cli(&cli(&["photo.jpg", "--sr-model", "sr.onnx"])).unwrap();
        assert_eq!(settings.variant, PipelineVariant::UpscaleOnly);

        let settings = CliConfigBuilder::from_cli(&cli(&[
            "photo.jpg",
            "--sr-model",
            "sr.onnx",
            "--deblur-model",
            "deblur.onnx",
            "--variant",
            "upscale-only",
        ]))
        .unwrap();
        assert_eq!(settings.variant, PipelineVariant::UpscaleOnly);

        assert!(CliConfigBuilder::from_cli(&cli(&[
            "photo.jpg",
            "--sr-model",
            "sr.onnx",
            "--variant",
            "restore-then-upscale",
        ]))
        .is_err());
    }

    #[test]
    fn test_log_flags() {
        let config = tracing_config_from_cli(&cli(&["photo.jpg", "-vv", "--log-format", "compact"]))
            .unwrap();
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.output, TracingOutput::Console);
        assert_eq!(config.verbosity, 2);

        let json = tracing_config_from_cli(&cli(&["photo.jpg", "--log-format", "json"]));
        #[cfg(feature = "tracing-json")]
        assert_eq!(json.unwrap().format, TracingFormat::Json);
        #[cfg(not(feature = "tracing-json"))]
        assert!(json.is_err());

        let file = tracing_config_from_cli(&cli(&["photo.jpg", "--log-file", "run.log"]));
        #[cfg(feature = "tracing-files")]
        assert_eq!(file.unwrap().output, TracingOutput::File(PathBuf::from("run.log")));
        #[cfg(not(feature = "tracing-files"))]
        assert!(file.is_err());
    }
}
