//! Core data types for model caching.

use chrono::{DateTime, Utc};
use nexus_abstraction::ModelHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// A resident model entry with metadata.
#[derive(Clone)]
pub struct CachedModel {
    /// The loaded model. Owned by exactly this entry.
    pub handle: Arc<dyn ModelHandle>,
    /// Recency token; larger means more recently used.
    pub recency: u64,
    /// Number of times this model has been accessed. Instrumentation only.
    pub access_count: u64,
    /// Timestamp of last access.
    pub last_accessed: Instant,
    /// Wall-clock time the model entered the cache.
    pub loaded_at: DateTime<Utc>,
}

impl CachedModel {
    /// Create a new cached model entry.
    ///
    /// # Arguments
    /// * `handle` - The model handle to cache
    /// * `recency` - The cache clock value at insertion
    pub fn new(handle: Arc<dyn ModelHandle>, recency: u64) -> Self {
        Self {
            handle,
            recency,
            access_count: 1,
            last_accessed: Instant::now(),
            loaded_at: Utc::now(),
        }
    }

    /// Record an access at cache clock value `recency`.
    pub fn touch(&mut self, recency: u64) {
        self.recency = recency;
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

impl std::fmt::Debug for CachedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedModel")
            .field("model", &self.handle.model_name())
            .field("recency", &self.recency)
            .field("access_count", &self.access_count)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one resident model, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResidentModel {
    /// The model name (cache key).
    pub name: String,
    /// Number of accesses since the model was loaded.
    pub access_count: u64,
    /// Recency token at the time of the snapshot.
    pub recency: u64,
    /// When the model entered the cache.
    pub loaded_at: DateTime<Utc>,
    /// Milliseconds since the model was last accessed.
    pub idle_ms: u64,
}

impl ResidentModel {
    pub(crate) fn from_entry(name: &str, cached: &CachedModel) -> Self {
        Self {
            name: name.to_string(),
            access_count: cached.access_count,
            recency: cached.recency,
            loaded_at: cached.loaded_at,
            idle_ms: u64::try_from(cached.last_accessed.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub total_hits: u64,
    /// Total number of cache misses.
    pub total_misses: u64,
    /// Total number of LRU evictions.
    pub total_evictions: u64,
    /// Total number of handle releases (evicted, replaced, unloaded or cleared).
    pub total_releases: u64,
    /// Releases that reported an error. The entry was dropped regardless.
    pub release_failures: u64,
    /// Current number of models in cache.
    pub cache_size: usize,
}

impl CacheStats {
    /// Hit rate in the range `0.0..=1.0`; `0.0` before any lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.total_hits + self.total_misses;
        if lookups == 0 { 0.0 } else { self.total_hits as f64 / lookups as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::MockEngine;
    use nexus_abstraction::{EngineLoader, LoadParams};
    use std::path::Path;

    fn handle(name: &str) -> Arc<dyn ModelHandle> {
        MockEngine::new().load(Path::new(name), &LoadParams::default()).unwrap()
    }

    #[test]
    fn test_cached_model_touch() {
        let mut cached = CachedModel::new(handle("test.gguf"), 1);

        let initial_count = cached.access_count;
        let initial_time = cached.last_accessed;

        // Wait a tiny bit to ensure time difference
        std::thread::sleep(std::time::Duration::from_millis(10));

        cached.touch(7);

        assert_eq!(cached.access_count, initial_count + 1);
        assert_eq!(cached.recency, 7);
        assert!(cached.last_accessed > initial_time);
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.total_misses, 0);
        assert_eq!(stats.total_evictions, 0);
        assert_eq!(stats.cache_size, 0);
        assert!(stats.hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats { total_hits: 3, total_misses: 1, ..CacheStats::default() };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resident_model_snapshot() {
        let cached = CachedModel::new(handle("snap.gguf"), 4);
        let resident = ResidentModel::from_entry("snap.gguf", &cached);
        assert_eq!(resident.name, "snap.gguf");
        assert_eq!(resident.access_count, 1);
        assert_eq!(resident.recency, 4);
    }
}
