//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (high performance, GPU acceleration)
//! - Tract backend (pure Rust, no external dependencies)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

use crate::error::{Result, UpscaleError};
use crate::inference::InferenceBackend;
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};

/// Inference engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Onnx,
    Tract,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = UpscaleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(UpscaleError::invalid_config(format!(
                "Unknown backend '{other}'. Valid backends: onnx, tract"
            ))),
        }
    }
}

/// Create an uninitialized backend for `spec`
///
/// # Errors
/// - The requested backend was not compiled in
pub fn create_backend(
    kind: BackendKind,
    spec: ModelSpec,
) -> Result<Box<dyn InferenceBackend + Send>> {
    match kind {
        #[cfg(feature = "onnx")]
        BackendKind::Onnx => Ok(Box::new(OnnxBackend::new(spec))),
        #[cfg(feature = "tract")]
        BackendKind::Tract => Ok(Box::new(TractBackend::new(spec))),
        #[allow(unreachable_patterns)]
        other => {
            let _ = spec;
            Err(UpscaleError::invalid_config(format!(
                "Backend '{other}' is not available in this build"
            )))
        },
    }
}
