//! ModelCache implementation with strict LRU eviction and explicit release.

use nexus_abstraction::ModelHandle;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::lru::LruList;
use super::types::{CacheStats, CachedModel, ResidentModel};

/// Why a handle is leaving the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    Evicted,
    Replaced,
    Removed,
    Cleared,
    Closed,
}

impl Retirement {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::Replaced => "replaced",
            Self::Removed => "removed",
            Self::Cleared => "cleared",
            Self::Closed => "closed",
        }
    }
}

/// Handles taken out of the cache whose release has not run yet.
#[must_use = "retired handles must be passed to `ModelCache::release_retired`"]
pub(crate) struct Retired(Vec<(String, Arc<dyn ModelHandle>, Retirement)>);

#[derive(Debug, Default)]
struct CacheState {
    entries: LruList<CachedModel>,
    clock: u64,
    closed: bool,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded, least-recently-used store of loaded models.
///
/// The cache is the sole owner of every handle it holds: whenever an entry
/// leaves (eviction, replacement, removal or clear) its handle's
/// [`release`](ModelHandle::release) is called exactly once. Releases run
/// after the map lock is dropped, and a failing release never keeps an entry
/// in the map.
#[derive(Debug)]
pub struct ModelCache {
    /// Entries, clock and statistics behind one short-lived lock.
    state: Mutex<CacheState>,
    /// Cache configuration.
    config: CacheConfig,
}

impl ModelCache {
    /// Create a new model cache with the given configuration.
    ///
    /// # Arguments
    /// * `config` - Cache configuration
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, CacheConfigError> {
        config.validate()?;

        Ok(Self { state: Mutex::new(CacheState::default()), config })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("Cache lock poisoned")
    }

    /// Look up a resident model, marking it most recently used.
    ///
    /// Never triggers a load.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelHandle>> {
        self.lookup(name, true)
    }

    /// Like [`get`](Self::get), but neither a hit nor a miss is counted in
    /// the statistics. Used for the second look taken after winning a load
    /// ticket, whose caller has already recorded a miss.
    pub(crate) fn recheck(&self, name: &str) -> Option<Arc<dyn ModelHandle>> {
        self.lookup(name, false)
    }

    fn lookup(&self, name: &str, record: bool) -> Option<Arc<dyn ModelHandle>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let tick = state.tick();

        if let Some(cached) = state.entries.get_mut(name) {
            cached.touch(tick);
            if record {
                state.stats.total_hits += 1;
            }
            debug!(model = %name, access_count = cached.access_count, "Cache hit");
            return Some(Arc::clone(&cached.handle));
        }

        if record {
            state.stats.total_misses += 1;
            debug!(model = %name, "Cache miss");
        }
        None
    }

    /// Insert or replace a model.
    ///
    /// Replacing keeps the size unchanged and bumps recency; the displaced
    /// handle is released unless it is the same instance. Inserting a new
    /// name into a full cache first evicts and releases the least recently
    /// used entry.
    pub fn put(&self, name: &str, handle: Arc<dyn ModelHandle>) {
        self.try_put(name, handle);
    }

    /// Same as [`put`](Self::put), returning `false` when the cache has been
    /// closed, in which case the handle is released instead of stored.
    pub(crate) fn try_put(&self, name: &str, handle: Arc<dyn ModelHandle>) -> bool {
        let (inserted, retired) = self.insert_deferred(name, handle);
        self.release_retired(retired);
        inserted
    }

    /// Inserts like [`try_put`](Self::try_put) but hands back the handles it
    /// displaced (or the offered one, if closed) instead of releasing them.
    /// The caller must pass them to [`release_retired`](Self::release_retired).
    pub(crate) fn insert_deferred(
        &self,
        name: &str,
        handle: Arc<dyn ModelHandle>,
    ) -> (bool, Retired) {
        let mut retired: Vec<(String, Arc<dyn ModelHandle>, Retirement)> = Vec::new();

        let inserted = {
            let mut guard = self.lock();
            let state = &mut *guard;

            if state.closed {
                retired.push((name.to_string(), handle, Retirement::Closed));
                false
            } else {
                let tick = state.tick();

                if let Some(cached) = state.entries.get_mut(name) {
                    let previous = std::mem::replace(&mut cached.handle, handle);
                    cached.touch(tick);
                    if !Arc::ptr_eq(&previous, &cached.handle) {
                        retired.push((name.to_string(), previous, Retirement::Replaced));
                    }
                    debug!(model = %name, "Replaced cached model");
                } else {
                    if state.entries.len() >= self.config.max_cache_size {
                        if let Some((lru_name, lru)) = state.entries.pop_lru() {
                            state.stats.total_evictions += 1;
                            info!(
                                model = %lru_name,
                                access_count = lru.access_count,
                                "Evicted LRU model from cache"
                            );
                            retired.push((lru_name, lru.handle, Retirement::Evicted));
                        }
                    }
                    state.entries.insert(name.to_string(), CachedModel::new(handle, tick));
                    info!(model = %name, cache_size = state.entries.len(), "Model cached");
                }

                state.stats.cache_size = state.entries.len();
                true
            }
        };

        (inserted, Retired(retired))
    }

    /// Release handles returned by [`insert_deferred`](Self::insert_deferred).
    pub(crate) fn release_retired(&self, retired: Retired) {
        self.release_all(retired.0);
    }

    /// Remove a specific model from the cache, releasing it.
    ///
    /// # Returns
    /// `true` if the model was removed, `false` if it was not resident.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let removed = state.entries.remove(name);
            state.stats.cache_size = state.entries.len();
            removed
        };

        match removed {
            Some(cached) => {
                info!(model = %name, "Removed model from cache");
                self.release_all(vec![(name.to_string(), cached.handle, Retirement::Removed)]);
                true
            }
            None => false,
        }
    }

    /// Clear all models from the cache, releasing each one.
    ///
    /// # Returns
    /// The number of models that were released.
    pub fn clear(&self) -> usize {
        self.drain(Retirement::Cleared)
    }

    /// Clear the cache and refuse further inserts. Handles offered to a
    /// closed cache are released immediately.
    pub(crate) fn close(&self) -> usize {
        self.lock().closed = true;
        self.drain(Retirement::Closed)
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn drain(&self, reason: Retirement) -> usize {
        let drained = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let drained = state.entries.drain();
            state.stats.cache_size = 0;
            drained
        };

        let cleared_count = drained.len();
        self.release_all(
            drained.into_iter().map(|(name, cached)| (name, cached.handle, reason)).collect(),
        );
        info!(cleared_count, reason = reason.as_str(), "Cleared all models from cache");
        cleared_count
    }

    /// Release retired handles. Must be called without the state lock held.
    fn release_all(&self, retired: Vec<(String, Arc<dyn ModelHandle>, Retirement)>) {
        if retired.is_empty() {
            return;
        }

        let released = retired.len() as u64;
        let mut failures = 0_u64;
        for (name, handle, reason) in retired {
            match handle.release() {
                Ok(()) => debug!(model = %name, reason = reason.as_str(), "Released model handle"),
                Err(error) => {
                    failures += 1;
                    warn!(
                        model = %name,
                        reason = reason.as_str(),
                        error = %error,
                        "Error releasing model handle; entry dropped anyway"
                    );
                }
            }
        }

        let mut state = self.lock();
        state.stats.total_releases += released;
        state.stats.release_failures += failures;
    }

    /// Returns `true` if `name` is resident. Does not affect recency.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.contains(name)
    }

    /// Current number of resident models.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no model is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of resident models.
    pub fn capacity(&self) -> usize {
        self.config.max_cache_size
    }

    /// Snapshot of resident models from least to most recently used.
    pub fn resident(&self) -> Vec<ResidentModel> {
        self.lock()
            .entries
            .iter()
            .map(|(name, cached)| ResidentModel::from_entry(name, cached))
            .collect()
    }

    /// Access count of a resident model, without touching it.
    pub fn access_count(&self, name: &str) -> Option<u64> {
        self.lock().entries.peek(name).map(|cached| cached.access_count)
    }

    /// Get current cache statistics.
    ///
    /// # Returns
    /// A snapshot of current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let mut result = state.stats.clone();
        result.cache_size = state.entries.len();
        result
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
