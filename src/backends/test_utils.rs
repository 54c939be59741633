//! Mock backends for exercising the pipeline without model files

use crate::{
    config::BackendConfig,
    error::{Result, UpscaleError},
    inference::InferenceBackend,
    models::ModelInfo,
};
use instant::Duration;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What the mock produces from an input tensor
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return the input unchanged
    Identity,
    /// Nearest-neighbour resample of the input to the output shape
    Upscale,
    /// Always return this tensor
    Fixed(Array4<f32>),
    /// Fail every inference
    Fail,
}

/// Configurable mock implementing `InferenceBackend`
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    should_fail_init: bool,
    model_info: ModelInfo,
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    fn with(
        input_shape: (usize, usize, usize, usize),
        output_shape: (usize, usize, usize, usize),
        behavior: MockBehavior,
    ) -> Self {
        Self {
            initialized: false,
            should_fail_init: false,
            model_info: ModelInfo {
                name: "mock-model".to_string(),
                source: "memory:mock".to_string(),
                size_bytes: 1024,
                input_shape,
                output_shape,
            },
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn identity(shape: (usize, usize, usize, usize)) -> Self {
        Self::with(shape, shape, MockBehavior::Identity)
    }

    #[must_use]
    pub fn upscaler(
        input_shape: (usize, usize, usize, usize),
        output_shape: (usize, usize, usize, usize),
    ) -> Self {
        Self::with(input_shape, output_shape, MockBehavior::Upscale)
    }

    #[must_use]
    pub fn fixed(input_shape: (usize, usize, usize, usize), output: Array4<f32>) -> Self {
        Self::with(input_shape, output.dim(), MockBehavior::Fixed(output))
    }

    #[must_use]
    pub fn failing(shape: (usize, usize, usize, usize)) -> Self {
        Self::with(shape, shape, MockBehavior::Fail)
    }

    #[must_use]
    pub fn failing_init(shape: (usize, usize, usize, usize)) -> Self {
        let mut backend = Self::identity(shape);
        backend.should_fail_init = true;
        backend
    }

    /// Initialized copy, ready for `infer`
    #[must_use]
    pub fn ready(mut self) -> Self {
        self.initialized = true;
        self
    }

    /// Shared counter of `infer` calls
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn resample(input: &Array4<f32>, shape: (usize, usize, usize, usize)) -> Array4<f32> {
        let (_, _, ih, iw) = input.dim();
        let (_, _, oh, ow) = shape;
        Array4::from_shape_fn(shape, |(b, c, y, x)| {
            let sy = (y * ih / oh.max(1)).min(ih.saturating_sub(1));
            let sx = (x * iw / ow.max(1)).min(iw.saturating_sub(1));
            input[[b, c, sy, sx]]
        })
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &BackendConfig) -> Result<Option<Duration>> {
        if self.should_fail_init {
            return Err(UpscaleError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.initialized {
            return Err(UpscaleError::inference("Mock backend not initialized"));
        }
        if input.dim() != self.model_info.input_shape {
            return Err(UpscaleError::inference(format!(
                "Mock expected input {:?}, got {:?}",
                self.model_info.input_shape,
                input.dim()
            )));
        }

        match &self.behavior {
            MockBehavior::Identity => Ok(input.clone()),
            MockBehavior::Upscale => Ok(Self::resample(input, self.model_info.output_shape)),
            MockBehavior::Fixed(output) => Ok(output.clone()),
            MockBehavior::Fail => Err(UpscaleError::inference("Mock inference failed")),
        }
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_upscale_resamples() {
        let mut backend = MockBackend::upscaler((1, 3, 2, 2), (1, 3, 4, 4)).ready();
        let input = Array4::from_shape_fn((1, 3, 2, 2), |(_, c, y, x)| (c * 4 + y * 2 + x) as f32);
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 3, 4, 4));
        assert_eq!(output[[0, 1, 3, 3]], input[[0, 1, 1, 1]]);
        assert_eq!(output[[0, 2, 0, 1]], input[[0, 2, 0, 0]]);
    }

    #[test]
    fn test_mock_rejects_wrong_shape() {
        let mut backend = MockBackend::identity((1, 3, 4, 4)).ready();
        let input = Array4::<f32>::zeros((1, 3, 5, 5));
        assert!(backend.infer(&input).is_err());
    }

    #[test]
    fn test_mock_failing_init() {
        let mut backend = MockBackend::failing_init((1, 3, 4, 4));
        assert!(backend.initialize(&BackendConfig::default()).is_err());
        assert!(!backend.is_initialized());
    }
}
