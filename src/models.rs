//! Model descriptors: where a model lives and what tensors it speaks

use crate::error::{Result, UpscaleError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Model source specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path
    External(PathBuf),
    /// Model bytes already in memory (bundled or fetched by the caller)
    #[serde(skip)]
    Memory { label: String, bytes: Arc<Vec<u8>> },
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Memory { label, .. } => format!("memory:{}", label),
        }
    }
}

/// Tensor memory layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TensorLayout {
    /// Planar (1, 3, H, W)
    #[default]
    Nchw,
    /// Packed (1, H, W, 3)
    Nhwc,
}

/// Channel order of the three color planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Value range the model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Normalization {
    /// byte / 255
    #[default]
    UnitRange,
    /// byte as-is
    ByteRange,
    /// (byte / 255 - mean) / std
    MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    #[must_use]
    pub fn imagenet() -> Self {
        Self::MeanStd {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    /// Byte value to model value for channel `c`
    #[inline]
    #[must_use]
    pub fn normalize(&self, value: u8, c: usize) -> f32 {
        let v = f32::from(value);
        match self {
            Self::UnitRange => v / 255.0,
            Self::ByteRange => v,
            Self::MeanStd { mean, std } => {
                let m = mean.get(c).copied().unwrap_or(0.0);
                let s = std.get(c).copied().unwrap_or(1.0);
                (v / 255.0 - m) / s
            },
        }
    }

    /// Model value back to byte scale (unclamped)
    #[inline]
    #[must_use]
    pub fn denormalize(&self, value: f32, c: usize) -> f32 {
        match self {
            Self::UnitRange => value * 255.0,
            Self::ByteRange => value,
            Self::MeanStd { mean, std } => {
                let m = mean.get(c).copied().unwrap_or(0.0);
                let s = std.get(c).copied().unwrap_or(1.0);
                (value * s + m) * 255.0
            },
        }
    }
}

/// Interpolation used when resizing to the model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Bilinear,
}

impl ResizeFilter {
    #[must_use]
    pub fn filter_type(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Bilinear => image::imageops::FilterType::Triangle,
        }
    }
}

/// How raster pixels map onto a model tensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TensorSpec {
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
    pub normalization: Normalization,
    pub resize_filter: ResizeFilter,
}

impl TensorSpec {
    /// Full tensor shape for a `width` x `height` image
    #[must_use]
    pub fn shape(&self, width: usize, height: usize) -> (usize, usize, usize, usize) {
        match self.layout {
            TensorLayout::Nchw => (1, 3, height, width),
            TensorLayout::Nhwc => (1, height, width, 3),
        }
    }
}

/// Complete model specification: source plus fixed tensor contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub source: ModelSource,
    /// Fixed input (width, height)
    pub input_size: (u32, u32),
    /// Fixed output (width, height)
    pub output_size: (u32, u32),
    #[serde(default)]
    pub tensor: TensorSpec,
}

impl ModelSpec {
    pub fn new<S: Into<String>>(
        name: S,
        source: ModelSource,
        input_size: (u32, u32),
        output_size: (u32, u32),
    ) -> Self {
        Self {
            name: name.into(),
            source,
            input_size,
            output_size,
            tensor: TensorSpec::default(),
        }
    }

    /// Restoration (deblur) network: 256x256 in, 256x256 out
    pub fn restoration<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(
            "restoration",
            ModelSource::External(path.into()),
            (256, 256),
            (256, 256),
        )
    }

    /// Super-resolution network: 512x512 in, 2048x2048 out
    pub fn super_resolution<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(
            "super_resolution",
            ModelSource::External(path.into()),
            (512, 512),
            (2048, 2048),
        )
    }

    /// Instance segmentation network with a square `size` input
    pub fn segmentation<P: Into<PathBuf>>(path: P, size: u32) -> Self {
        Self {
            tensor: TensorSpec {
                normalization: Normalization::imagenet(),
                ..TensorSpec::default()
            },
            ..Self::new(
                "segmentation",
                ModelSource::External(path.into()),
                (size, size),
                (size, size),
            )
        }
    }

    #[must_use]
    pub fn with_tensor_spec(mut self, tensor: TensorSpec) -> Self {
        self.tensor = tensor;
        self
    }

    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.tensor
            .shape(self.input_size.0 as usize, self.input_size.1 as usize)
    }

    #[must_use]
    pub fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.tensor
            .shape(self.output_size.0 as usize, self.output_size.1 as usize)
    }

    /// Load model data as bytes
    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        match &self.source {
            ModelSource::External(path) => std::fs::read(path).map_err(|e| {
                UpscaleError::model(format!(
                    "Failed to read model '{}' from {}: {}",
                    self.name,
                    path.display(),
                    e
                ))
            }),
            ModelSource::Memory { bytes, .. } => Ok(bytes.as_ref().clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size.0 == 0 || self.input_size.1 == 0 {
            return Err(UpscaleError::model(format!(
                "Model '{}' has an empty input size",
                self.name
            )));
        }
        if self.output_size.0 == 0 || self.output_size.1 == 0 {
            return Err(UpscaleError::model(format!(
                "Model '{}' has an empty output size",
                self.name
            )));
        }
        if let ModelSource::External(path) = &self.source {
            if !path.exists() {
                return Err(UpscaleError::model(format!(
                    "Model file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn info(&self, size_bytes: usize) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            source: self.source.display_name(),
            size_bytes,
            input_shape: self.input_shape(),
            output_shape: self.output_shape(),
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub source: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize),
    pub output_shape: (usize, usize, usize, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let a = ModelSpec::restoration("a.onnx");
        assert_eq!(a.input_shape(), (1, 3, 256, 256));
        assert_eq!(a.output_shape(), (1, 3, 256, 256));

        let b = ModelSpec::super_resolution("b.onnx");
        assert_eq!(b.input_shape(), (1, 3, 512, 512));
        assert_eq!(b.output_shape(), (1, 3, 2048, 2048));
    }

    #[test]
    fn test_nhwc_shape() {
        let spec = ModelSpec::restoration("a.onnx").with_tensor_spec(TensorSpec {
            layout: TensorLayout::Nhwc,
            ..TensorSpec::default()
        });
        assert_eq!(spec.input_shape(), (1, 256, 256, 3));
    }

    #[test]
    fn test_normalization_inverse() {
        for norm in [
            Normalization::UnitRange,
            Normalization::ByteRange,
            Normalization::imagenet(),
        ] {
            for c in 0..3 {
                let back = norm.denormalize(norm.normalize(200, c), c);
                assert!((back - 200.0).abs() < 0.01, "{norm:?} channel {c}: {back}");
            }
        }
    }

    #[test]
    fn test_load_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"onnx").unwrap();

        let spec = ModelSpec::restoration(&path);
        assert!(spec.validate().is_ok());
        assert_eq!(spec.load_bytes().unwrap(), b"onnx");

        let missing = ModelSpec::restoration(dir.path().join("missing.onnx"));
        assert!(missing.validate().is_err());
        assert!(matches!(missing.load_bytes(), Err(UpscaleError::Model(_))));
    }

    #[test]
    fn test_memory_source_display() {
        let source = ModelSource::Memory {
            label: "sr".into(),
            bytes: Arc::new(vec![1, 2, 3]),
        };
        assert_eq!(source.display_name(), "memory:sr");
    }
}
