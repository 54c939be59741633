//! Subscriber setup for the command-line tool
//!
//! The library only emits events; binaries decide where they go.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Colored, human-readable
    #[default]
    Console,
    /// Plain text for CI logs
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    #[default]
    Console,
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
}

/// Keeps buffered file output flushing; hold it until exit
#[cfg(feature = "tracing-files")]
pub type TracingGuard = Option<tracing_appender::non_blocking::WorkerGuard>;
#[cfg(not(feature = "tracing-files"))]
pub type TracingGuard = ();

#[derive(Debug, Default)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug for this crate, 2+ = trace everywhere
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Overrides `verbosity` when set
    pub env_filter: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "info,damoon_upscale=debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match (self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_target(false).compact())
                    .try_init()?;
            },
            (TracingFormat::Compact, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(false).with_target(false).compact())
                    .try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().json().with_current_span(true).with_span_list(true))
                    .try_init()?;
            },
            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::File(path)) => {
                let appender = tracing_appender::rolling::never(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("damoon-upscale.log")),
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_ansi(false).with_writer(writer);

                #[cfg(feature = "tracing-json")]
                if format == TracingFormat::Json {
                    registry.with(layer.json()).try_init()?;
                    return Ok(Some(guard));
                }
                #[cfg(not(feature = "tracing-json"))]
                let _ = format;

                registry.with(layer.compact()).try_init()?;
                return Ok(Some(guard));
            },
        }

        Ok(TracingGuard::default())
    }
}

/// Spans shared by the command-line entry points
pub mod spans {
    use tracing::{Level, Span};

    /// Root span for one CLI invocation
    pub fn session(session_id: &str, backend: &str, routing: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            backend = %backend,
            routing = %routing
        )
    }

    pub fn model_loading(stage: &str, model: &str) -> Span {
        tracing::span!(Level::INFO, "model_loading", stage = %stage, model = %model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        let filter = |v| TracingConfig::new().with_verbosity(v).verbosity_to_filter();
        assert_eq!(filter(0), "info");
        assert_eq!(filter(1), "info,damoon_upscale=debug");
        assert_eq!(filter(2), "trace");
        assert_eq!(filter(9), "trace");
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new()
            .with_format(TracingFormat::Compact)
            .with_env_filter("warn");
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.output, TracingOutput::Console);
        assert_eq!(config.env_filter.as_deref(), Some("warn"));
        let debug = TracingConfig::new().with_verbosity(1);
        assert!(EnvFilter::try_new(debug.verbosity_to_filter()).is_ok());
    }
}
