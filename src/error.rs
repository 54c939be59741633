//! Error types for masking, selection and upscaling operations

use thiserror::Error;

/// Result type alias for upscaling operations
pub type Result<T> = std::result::Result<T, UpscaleError>;

/// Generic text shown to the user for internal failures
pub const GENERIC_FAILURE_MESSAGE: &str = "An unexpected error occurred.";

/// Error taxonomy for the upscaling pipeline
#[derive(Error, Debug)]
pub enum UpscaleError {
    /// Segmentation found no foreground instance
    #[error("No subjects were found in the photo")]
    NoSubjectFound,

    /// Input image has no addressable pixel backing
    #[error("Image decode error: {0}")]
    Decode(String),

    /// Tensor or raster shape/layout mismatch between stages
    #[error("Format error: {0}")]
    Format(String),

    /// Remote service failed (network, timeout, bad status, bad body)
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// A local inference stage failed; no partial output exists
    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// Selection path cannot be rasterized
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// A submission arrived while another request was in flight
    #[error("Another request is already running")]
    Busy,

    /// The caller abandoned the request before it finished
    #[error("Request was cancelled")]
    Cancelled,

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpscaleError {
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn format_error<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    pub fn remote<S: Into<String>>(msg: S) -> Self {
        Self::RemoteUnavailable(msg.into())
    }

    pub fn stage_failed<S: Into<String>, R: std::fmt::Display>(stage: S, reason: R) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_selection<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSelection(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create a remote error from a transport failure
    pub fn network_error(context: &str, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            "timed out"
        } else if error.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::RemoteUnavailable(format!("{}: {} ({})", context, kind, error))
    }

    /// Whether the user may retry or the orchestrator may recover
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoSubjectFound | Self::RemoteUnavailable(_) | Self::Busy | Self::Cancelled
        )
    }

    /// Text safe to show to the user
    ///
    /// Internal shape and configuration details never leave the crate; they
    /// collapse to [`GENERIC_FAILURE_MESSAGE`] and are expected to be logged.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoSubjectFound => "No subjects were found in the photo.",
            Self::Decode(_) => "The photo could not be read.",
            Self::RemoteUnavailable(_) => "The upscaling service could not be reached.",
            Self::InvalidSelection(_) => "The selection is too small to use.",
            Self::Busy => "Please wait for the current upscale to finish.",
            Self::Cancelled => "The upscale was cancelled.",
            Self::Format(_)
            | Self::StageFailed { .. }
            | Self::Io(_)
            | Self::Image(_)
            | Self::Inference(_)
            | Self::Model(_)
            | Self::InvalidConfig(_)
            | Self::Internal(_) => GENERIC_FAILURE_MESSAGE,
        }
    }
}
