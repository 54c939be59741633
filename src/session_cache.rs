//! In-memory cache of initialized inference sessions
//!
//! Loading a 2048x2048 super-resolution model takes seconds; each model is
//! initialized once per process and then handed out as a [`SharedBackend`].
//! Keys are SHA-256 digests over everything that affects the compiled
//! session: model identity, tensor contract, backend and runtime settings.

use crate::backends::{create_backend, BackendKind};
use crate::config::BackendConfig;
use crate::error::{Result, UpscaleError};
use crate::inference::{share, InferenceBackend, SharedBackend};
use crate::models::{ModelSource, ModelSpec};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Session cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCacheStats {
    pub total_sessions: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl SessionCacheStats {
    /// Cache hit ratio as a percentage
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    sessions: HashMap<String, SharedBackend>,
    stats: SessionCacheStats,
}

/// Process-wide cache of initialized backends
#[derive(Debug, Default, Clone)]
pub struct SessionCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate SHA256 hash of model data
    #[must_use]
    pub fn calculate_model_hash(model_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_data);
        format!("{:x}", hasher.finalize())
    }

    /// Unique key for a model/backend/runtime combination
    #[must_use]
    pub fn generate_cache_key(
        spec: &ModelSpec,
        kind: BackendKind,
        config: &BackendConfig,
    ) -> String {
        let mut hasher = Sha256::new();

        hasher.update(spec.name.as_bytes());
        match &spec.source {
            ModelSource::External(path) => hasher.update(path.to_string_lossy().as_bytes()),
            ModelSource::Memory { bytes, .. } => {
                hasher.update(Self::calculate_model_hash(bytes).as_bytes());
            },
        }
        hasher.update(format!("{:?}{:?}", spec.input_size, spec.output_size).as_bytes());
        hasher.update(format!("{:?}", spec.tensor).as_bytes());
        hasher.update(kind.to_string().as_bytes());
        hasher.update(
            format!(
                "{}:{}:{}",
                config.execution_provider, config.intra_threads, config.inter_threads
            )
            .as_bytes(),
        );

        format!("{:x}", hasher.finalize())
    }

    /// Fetch the cached session for `spec`, creating and initializing it on a miss
    ///
    /// # Errors
    /// - Backend creation or model initialization failed; nothing is cached
    pub fn get_or_load(
        &self,
        spec: &ModelSpec,
        kind: BackendKind,
        config: &BackendConfig,
    ) -> Result<SharedBackend> {
        self.get_or_insert_with(spec, kind, config, || create_backend(kind, spec.clone()))
    }

    /// Like [`get_or_load`](Self::get_or_load) with a caller-supplied factory
    pub fn get_or_insert_with<F>(
        &self,
        spec: &ModelSpec,
        kind: BackendKind,
        config: &BackendConfig,
        factory: F,
    ) -> Result<SharedBackend>
    where
        F: FnOnce() -> Result<Box<dyn InferenceBackend + Send>>,
    {
        let key = Self::generate_cache_key(spec, kind, config);

        // The lock is held across initialization so concurrent callers never
        // load the same model twice.
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| UpscaleError::internal("Session cache lock poisoned"))?;

        if let Some(backend) = inner.sessions.get(&key) {
            let backend = Arc::clone(backend);
            inner.stats.cache_hits += 1;
            tracing::debug!(model = %spec.name, key = %key, "session cache hit");
            return Ok(backend);
        }

        inner.stats.cache_misses += 1;
        let mut backend = factory()?;
        if let Some(load_time) = backend.initialize(config)? {
            tracing::info!(
                model = %spec.name,
                backend = %kind,
                load_ms = load_time.as_millis() as u64,
                "model session initialized"
            );
        }

        let shared = share(backend);
        inner.sessions.insert(key, Arc::clone(&shared));
        inner.stats.total_sessions = inner.sessions.len();
        Ok(shared)
    }

    #[must_use]
    pub fn stats(&self) -> SessionCacheStats {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }

    /// Drop every cached session; returns how many were removed
    pub fn clear(&self) -> usize {
        self.inner.lock().map_or(0, |mut inner| {
            let removed = inner.sessions.len();
            inner.sessions.clear();
            inner.stats.total_sessions = 0;
            removed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;

    fn mock_factory() -> Result<Box<dyn InferenceBackend + Send>> {
        Ok(Box::new(MockBackend::identity((1, 3, 256, 256))))
    }

    #[test]
    fn test_cache_key_generation() {
        let spec = ModelSpec::restoration("deblur.onnx");
        let config = BackendConfig::default();

        let key1 = SessionCache::generate_cache_key(&spec, BackendKind::Onnx, &config);
        let key2 = SessionCache::generate_cache_key(&spec, BackendKind::Onnx, &config);
        assert_eq!(key1, key2);
        assert!(key1.chars().all(|c| c.is_ascii_hexdigit()));

        let key3 = SessionCache::generate_cache_key(&spec, BackendKind::Tract, &config);
        assert_ne!(key1, key3);

        let other = ModelSpec::restoration("other.onnx");
        let key4 = SessionCache::generate_cache_key(&other, BackendKind::Onnx, &config);
        assert_ne!(key1, key4);
    }

    #[test]
    fn test_model_hash_calculation() {
        let hash1 = SessionCache::calculate_model_hash(b"test model data");
        let hash2 = SessionCache::calculate_model_hash(b"test model data");
        let hash3 = SessionCache::calculate_model_hash(b"different data");
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_sessions_are_reused() {
        let cache = SessionCache::new();
        let spec = ModelSpec::restoration("deblur.onnx");
        let config = BackendConfig::default();

        let first = cache
            .get_or_insert_with(&spec, BackendKind::Onnx, &config, mock_factory)
            .unwrap();
        let second = cache
            .get_or_insert_with(&spec, BackendKind::Onnx, &config, || {
                panic!("factory must not run on a cache hit")
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.lock().unwrap().is_initialized());

        let stats = cache.stats();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.hit_ratio() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_initialization_is_not_cached() {
        let cache = SessionCache::new();
        let spec = ModelSpec::restoration("deblur.onnx");
        let config = BackendConfig::default();

        let result = cache.get_or_insert_with(&spec, BackendKind::Onnx, &config, || {
            Ok(Box::new(MockBackend::failing_init((1, 3, 256, 256))))
        });
        assert!(result.is_err());
        assert_eq!(cache.stats().total_sessions, 0);

        assert!(cache
            .get_or_insert_with(&spec, BackendKind::Onnx, &config, mock_factory)
            .is_ok());
        assert_eq!(cache.clear(), 1);
    }
}
