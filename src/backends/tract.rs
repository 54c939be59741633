//! Tract backend: pure Rust ONNX inference with no native dependencies
//!
//! Slower than ONNX Runtime for the 2048x2048 super-resolution output but
//! runs anywhere the crate compiles.

use crate::config::BackendConfig;
use crate::error::{Result, UpscaleError};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelSpec};
use log;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for one model
#[derive(Debug)]
pub struct TractBackend {
    spec: ModelSpec,
    model: Option<TractModel>,
    size_bytes: usize,
    initialized: bool,
}

impl TractBackend {
    /// Tract only runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            model: None,
            size_bytes: 0,
            initialized: false,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn load_model(&mut self, _config: &BackendConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        self.spec.validate()?;
        let model_data = self.spec.load_bytes()?;

        log::info!(
            "Initializing Tract backend for '{}' ({})",
            self.spec.name,
            self.spec.source.display_name()
        );

        let (n, c, h, w) = self.spec.input_shape();
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(&model_data))
            .map_err(|e| UpscaleError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([n, c, h, w]).into())
            .map_err(|e| UpscaleError::model(format!("Failed to pin input shape: {e}")))?
            .into_optimized()
            .map_err(|e| UpscaleError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| UpscaleError::model(format!("Failed to create runnable model: {e}")))?;

        self.size_bytes = model_data.len();
        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {:.2}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &BackendConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| UpscaleError::inference("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| UpscaleError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| UpscaleError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            UpscaleError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape();
        if output_shape.len() != 4 {
            return Err(UpscaleError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output_array = Array4::from_shape_vec(
            (
                output_shape.first().copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_data.to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| UpscaleError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {:.2}ms, output {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            output_array.shape()
        );

        Ok(output_array)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.spec.input_shape()
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.spec.output_shape()
    }

    fn model_info(&self) -> Result<ModelInfo> {
        Ok(self.spec.info(self.size_bytes))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
