//! Inference backend abstraction

use crate::{
    config::BackendConfig,
    error::{Result, UpscaleError},
    models::ModelInfo,
};
use ndarray::Array4;
use std::sync::{Arc, Mutex};

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
pub trait InferenceBackend {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time, or `None` when already initialized.
    ///
    /// # Errors
    /// - Model loading or validation errors
    /// - Session creation failures
    fn initialize(&mut self, config: &BackendConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not 4-dimensional
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Expected output shape for this backend
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// Model information for this backend
    ///
    /// # Errors
    /// - Model metadata unavailable
    fn model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;
}

impl std::fmt::Debug for dyn InferenceBackend + Send {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceBackend")
            .field("input_shape", &self.input_shape())
            .field("output_shape", &self.output_shape())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// An initialized backend shared between requests; one inference at a time
pub type SharedBackend = Arc<Mutex<Box<dyn InferenceBackend + Send>>>;

/// Wrap a backend for shared, serialized use
#[must_use]
pub fn share(backend: Box<dyn InferenceBackend + Send>) -> SharedBackend {
    Arc::new(Mutex::new(backend))
}

/// Run one inference while holding the model lock
pub fn run_exclusive(backend: &SharedBackend, input: &Array4<f32>) -> Result<Array4<f32>> {
    let mut guard = backend
        .lock()
        .map_err(|_| UpscaleError::internal("Model lock poisoned by a previous panic"))?;
    guard.infer(input)
}
