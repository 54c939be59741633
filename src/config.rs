//! Configuration types for masking, compositing and upscaling

use crate::error::{Result, UpscaleError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default animation cycle length of the busy indicator
pub const DEFAULT_BUSY_CYCLE_MS: u64 = 1500;

/// Default remote request timeout
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 15_000;

/// Default background dimming
pub const DEFAULT_DARKNESS: f32 = 0.3;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Where an upscale request may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoutingPreference {
    /// Never contact the remote service
    LocalOnly,
    /// Try the remote service first, fall back to the local pipeline
    #[default]
    RemoteAllowed,
}

/// How transparent regions are filled before upscaling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FillPolicy {
    /// Composite over an opaque color
    Solid { color: [u8; 4] },
    /// Composite over the original image dimmed by `darkness` (0.0-1.0)
    Darken { darkness: f32 },
}

impl FillPolicy {
    #[must_use]
    pub fn white() -> Self {
        Self::Solid {
            color: [255, 255, 255, 255],
        }
    }

    #[must_use]
    pub fn darken(darkness: f32) -> Self {
        Self::Darken { darkness }
    }
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self::white()
    }
}

/// How the local pipeline maps non-square inputs onto square model inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectMode {
    /// Pad to square before inference and crop the padding afterwards
    #[default]
    Letterbox,
    /// Stretch to the model size and stretch back
    Stretch,
}

/// Request body encoding for the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RequestEnvelope {
    /// `multipart/form-data` with a binary JPEG part named `file`
    #[default]
    Multipart,
    /// Legacy `application/json` body with a base64 `user_photo` field
    JsonBase64,
}

/// Remote inference endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Full URL the image is POSTed to
    pub endpoint: String,
    /// API credential, sent in `credential_header`
    pub credential: Option<String>,
    /// Header carrying the credential
    pub credential_header: String,
    /// Upper bound for the whole request
    pub timeout_ms: u64,
    /// Transport JPEG quality (1-100)
    pub jpeg_quality: u8,
    pub envelope: RequestEnvelope,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credential: None,
            credential_header: "X-API-Key".to_string(),
            timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            jpeg_quality: 80,
            envelope: RequestEnvelope::default(),
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_credential<S: Into<String>>(mut self, credential: S) -> Self {
        self.credential = Some(credential.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_envelope(mut self, envelope: RequestEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            UpscaleError::invalid_config(format!(
                "Invalid remote endpoint '{}': {}",
                self.endpoint, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpscaleError::invalid_config(format!(
                "Remote endpoint must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(UpscaleError::config_value_error(
                "remote timeout (ms)",
                self.timeout_ms,
                "> 0",
                Some(DEFAULT_REMOTE_TIMEOUT_MS),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(UpscaleError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(80),
            ));
        }
        Ok(())
    }
}

/// The user-facing settings the core consumes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub local_only: bool,
    pub darken_background: bool,
    pub darkness: f32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            local_only: false,
            darken_background: false,
            darkness: DEFAULT_DARKNESS,
        }
    }
}

impl Preferences {
    #[must_use]
    pub fn routing(&self) -> RoutingPreference {
        if self.local_only {
            RoutingPreference::LocalOnly
        } else {
            RoutingPreference::RemoteAllowed
        }
    }

    /// Fill policy; `solid_color` applies when darkening is off
    #[must_use]
    pub fn fill_policy(&self, solid_color: [u8; 4]) -> FillPolicy {
        if self.darken_background {
            FillPolicy::darken(self.darkness)
        } else {
            FillPolicy::Solid { color: solid_color }
        }
    }
}

/// Inference backend runtime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleConfig {
    pub preferences: Preferences,
    /// Solid fill color when darkening is off
    pub fill_color: [u8; 4],
    pub aspect_mode: AspectMode,
    /// Busy indicator animation cycle; completion waits for a cycle boundary
    pub busy_cycle_ms: u64,
    pub remote: Option<RemoteConfig>,
    pub backend: BackendConfig,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            preferences: Preferences::default(),
            fill_color: [255, 255, 255, 255],
            aspect_mode: AspectMode::default(),
            busy_cycle_ms: DEFAULT_BUSY_CYCLE_MS,
            remote: None,
            backend: BackendConfig::default(),
        }
    }
}

impl UpscaleConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use damoon_upscale::config::{RemoteConfig, UpscaleConfig};
    ///
    /// let config = UpscaleConfig::builder()
    ///     .darken_background(true)
    ///     .darkness(0.4)
    ///     .remote(RemoteConfig::new("http://127.0.0.1:8080/run_inference"))
    ///     .build()
    ///     .unwrap();
    /// assert!(config.preferences.darken_background);
    /// ```
    #[must_use]
    pub fn builder() -> UpscaleConfigBuilder {
        UpscaleConfigBuilder::default()
    }

    /// Load from a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| UpscaleError::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    #[must_use]
    pub fn routing(&self) -> RoutingPreference {
        self.preferences.routing()
    }

    #[must_use]
    pub fn fill_policy(&self) -> FillPolicy {
        self.preferences.fill_policy(self.fill_color)
    }

    #[must_use]
    pub fn busy_cycle(&self) -> Duration {
        Duration::from_millis(self.busy_cycle_ms)
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - darkness: 0.0-1.0 (inclusive), finite
    /// - busy cycle: > 0 ms
    /// - remote endpoint, when present: valid http(s) URL, timeout > 0,
    ///   JPEG quality 1-100
    pub fn validate(&self) -> Result<()> {
        let darkness = self.preferences.darkness;
        if !darkness.is_finite() || !(0.0..=1.0).contains(&darkness) {
            return Err(UpscaleError::config_value_error(
                "darkness",
                darkness,
                "0.0-1.0",
                Some(DEFAULT_DARKNESS),
            ));
        }
        if self.busy_cycle_ms == 0 {
            return Err(UpscaleError::config_value_error(
                "busy cycle (ms)",
                self.busy_cycle_ms,
                "> 0",
                Some(DEFAULT_BUSY_CYCLE_MS),
            ));
        }
        if let Some(remote) = &self.remote {
            remote.validate()?;
        }
        Ok(())
    }
}

/// Builder for [`UpscaleConfig`]
#[derive(Debug, Default)]
pub struct UpscaleConfigBuilder {
    config: UpscaleConfig,
}

impl UpscaleConfigBuilder {
    #[must_use]
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.config.preferences.local_only = local_only;
        self
    }

    #[must_use]
    pub fn darken_background(mut self, darken: bool) -> Self {
        self.config.preferences.darken_background = darken;
        self
    }

    #[must_use]
    pub fn darkness(mut self, darkness: f32) -> Self {
        self.config.preferences.darkness = darkness;
        self
    }

    #[must_use]
    pub fn preferences(mut self, preferences: Preferences) -> Self {
        self.config.preferences = preferences;
        self
    }

    #[must_use]
    pub fn fill_color(mut self, color: [u8; 4]) -> Self {
        self.config.fill_color = color;
        self
    }

    #[must_use]
    pub fn aspect_mode(mut self, mode: AspectMode) -> Self {
        self.config.aspect_mode = mode;
        self
    }

    #[must_use]
    pub fn busy_cycle(mut self, cycle: Duration) -> Self {
        self.config.busy_cycle_ms = u64::try_from(cycle.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.config.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.backend.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn threads(mut self, intra: usize, inter: usize) -> Self {
        self.config.backend.intra_threads = intra;
        self.config.backend.inter_threads = inter;
        self
    }

    pub fn build(self) -> Result<UpscaleConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
