//! ONNX Runtime backend for the restoration, super-resolution and segmentation models
//!
//! Supports the CPU, CUDA and `CoreML` execution providers; unavailable
//! providers fall back to CPU with a warning.

use crate::config::{BackendConfig, ExecutionProvider};
use crate::error::{Result, UpscaleError};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelSpec};
use log;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::{self, value::Value};

/// ONNX Runtime backend for one model
#[derive(Debug)]
pub struct OnnxBackend {
    spec: ModelSpec,
    session: Option<Session>,
    size_bytes: usize,
    initialized: bool,
}

impl OnnxBackend {
    /// List all ONNX Runtime execution providers with availability status and descriptions
    ///
    /// # Examples
    /// ```rust
    /// use damoon_upscale::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{}: {} - {}", name, available, description);
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {} ({}), CPU cores: {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    #[must_use]
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            session: None,
            size_bytes: 0,
            initialized: false,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn with_providers(
        session_builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let cuda_provider = CUDAExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        let providers = match provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(cuda_provider.build());
                }
                if coreml_available {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::warn!("No hardware acceleration available, falling back to CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda if cuda_available => {
                log::info!("Using CUDA execution provider");
                vec![cuda_provider.build()]
            },
            ExecutionProvider::CoreMl if coreml_available => {
                log::info!("Using CoreML execution provider");
                vec![CoreMLExecutionProvider::default().with_subgraphs(true).build()]
            },
            ExecutionProvider::Cuda | ExecutionProvider::CoreMl => {
                log::warn!(
                    "{} execution provider requested but not available, falling back to CPU",
                    provider
                );
                Vec::new()
            },
        };

        if providers.is_empty() {
            return Ok(session_builder);
        }
        session_builder.with_execution_providers(providers).map_err(|e| {
            UpscaleError::inference(format!("Failed to set execution providers: {e}"))
        })
    }

    /// Load and initialize the ONNX model
    fn load_model(&mut self, config: &BackendConfig) -> Result<std::time::Duration> {
        let model_load_start = std::time::Instant::now();
        self.spec.validate()?;
        let model_data = self.spec.load_bytes()?;

        let session_builder = Session::builder()
            .map_err(|e| {
                UpscaleError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                UpscaleError::inference(format!("Failed to set optimization level: {e}"))
            })?;
        let session_builder = Self::with_providers(session_builder, config.execution_provider)?;

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| {
                UpscaleError::inference(format!("Failed to enable parallel execution: {e}"))
            })?
            .with_intra_threads(intra_threads)
            .map_err(|e| UpscaleError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| UpscaleError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                UpscaleError::model(format!(
                    "Failed to create session for '{}': {e}",
                    self.spec.name
                ))
            })?;

        self.size_bytes = model_data.len();
        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::debug!(
            "Session for {} ready: {intra_threads} intra-op / {inter_threads} inter-op, {:.2} MB",
            self.spec.source.display_name(),
            self.size_bytes as f64 / (1024.0 * 1024.0)
        );
        log::info!(
            "Model '{}' loaded in {:.0}ms",
            self.spec.name,
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &BackendConfig) -> Result<Option<std::time::Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| UpscaleError::internal("ONNX session not initialized"))?;

        let inference_start = std::time::Instant::now();
        log::debug!("Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            UpscaleError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs and outputs; tensor names differ between exports
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| UpscaleError::inference(format!("ONNX inference failed: {e}")))?;

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| UpscaleError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| UpscaleError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    UpscaleError::inference(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output_shape = output_tensor.shape().to_vec();
        if output_shape.len() != 4 {
            return Err(UpscaleError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output_data = output_tensor.view().to_owned();
        let result = Array4::from_shape_vec(
            (
                output_shape.first().copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_data.into_raw_vec_and_offset().0,
        )
        .map_err(|e| UpscaleError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Inference for '{}' complete: {:.2}ms",
            self.spec.name,
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(result)
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
