//! The model lifecycle facade used by request handlers.

use nexus_abstraction::{EngineLoader, ModelHandle};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::{CacheStats, ModelCache, ResidentModel};
use crate::catalog::{ModelCatalog, ModelInfo};
use crate::coordinator::{CoordinatorStats, LoadCoordinator};
use crate::error::{ModelError, Result};
use crate::settings::Settings;

/// Combined cache and load statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Maximum number of resident models.
    pub capacity: usize,
    /// Cache counters.
    pub cache: CacheStats,
    /// Load counters.
    pub loads: CoordinatorStats,
    /// Models currently being loaded.
    pub in_flight: Vec<String>,
}

/// Owns the cache, the catalog and the load coordinator, and hands out
/// loaded models by name.
///
/// One instance is created at startup and shared (usually behind an `Arc`)
/// by every request handler.
pub struct ModelManager {
    settings: Settings,
    catalog: ModelCatalog,
    engine: Arc<dyn EngineLoader>,
    cache: Arc<ModelCache>,
    coordinator: LoadCoordinator,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("engine", &self.engine.engine_id())
            .field("model_path", &self.catalog.root())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    /// Creates a manager over `engine` with the given settings.
    ///
    /// # Errors
    /// Returns `ModelError::Settings` if the settings are invalid.
    pub fn new(settings: Settings, engine: Arc<dyn EngineLoader>) -> Result<Self> {
        settings.validate().map_err(|e| ModelError::Settings(e.to_string()))?;
        let cache = ModelCache::new(settings.cache_config())
            .map_err(|e| ModelError::Settings(e.to_string()))?;

        info!(
            engine = engine.engine_id(),
            model_path = %settings.model_path.display(),
            max_cached_models = settings.max_cached_models,
            "Model manager initialized"
        );

        Ok(Self {
            catalog: ModelCatalog::new(settings.model_path.clone()),
            settings,
            engine,
            cache: Arc::new(cache),
            coordinator: LoadCoordinator::new(),
        })
    }

    /// Returns the loaded model `name`, loading it if it is not resident.
    ///
    /// Concurrent calls for the same absent model share a single load.
    ///
    /// # Errors
    /// - `ModelError::ModelNotFound` if no model file exists for `name`
    /// - `ModelError::LoadFailed` if the engine could not load it
    /// - `ModelError::ShutDown` after [`shutdown`](Self::shutdown)
    pub async fn acquire(&self, name: &str) -> Result<Arc<dyn ModelHandle>> {
        if self.cache.is_closed() {
            return Err(ModelError::ShutDown);
        }

        if let Some(handle) = self.cache.get(name) {
            return Ok(handle);
        }

        let path = self.catalog.resolve(name)?;
        debug!(model = %name, path = %path.display(), "Resolved model file");

        let engine = Arc::clone(&self.engine);
        let params = self.settings.load_params();
        let model = name.to_string();
        self.coordinator
            .load_or_wait(name, &self.cache, move || {
                engine
                    .load(&path, &params)
                    .map_err(|source| ModelError::LoadFailed { name: model, source })
            })
            .await
    }

    /// Acquires the configured default model.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_default(&self) -> Result<Arc<dyn ModelHandle>> {
        self.acquire(&self.settings.default_model).await
    }

    /// Runs a cache operation that releases handles on the blocking pool, so
    /// a slow engine release never stalls the async workers.
    async fn releasing<T, F>(&self, op: F) -> T
    where
        F: FnOnce(&ModelCache) -> T + Send + 'static,
        T: Default + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || op(&cache)).await {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "Release task did not complete");
                T::default()
            }
        }
    }

    /// Removes `name` from memory. Unloading a model that is not resident is
    /// a no-op.
    ///
    /// # Returns
    /// `true` if the model was resident.
    pub async fn unload(&self, name: &str) -> bool {
        let model = name.to_string();
        let removed = self.releasing(move |cache| cache.remove(&model)).await;
        if removed {
            info!(model = %name, "Model unloaded");
        } else {
            debug!(model = %name, "Unload requested for model that is not resident");
        }
        removed
    }

    /// Releases every resident model and keeps serving.
    ///
    /// # Returns
    /// The number of models released.
    pub async fn clear_all(&self) -> usize {
        self.releasing(ModelCache::clear).await
    }

    /// Releases every resident model and stops loading new ones.
    ///
    /// Loads still in flight finish, but their models are released instead
    /// of cached. Calling this more than once is harmless.
    ///
    /// # Returns
    /// The number of models released by this call.
    pub async fn shutdown(&self) -> usize {
        let released = self.releasing(ModelCache::close).await;
        info!(released, "Model manager shut down");
        released
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.cache.is_closed()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            capacity: self.cache.capacity(),
            cache: self.cache.stats(),
            loads: self.coordinator.stats(),
            in_flight: self.coordinator.in_flight(),
        }
    }

    /// Resident models from least to most recently used.
    pub fn resident_models(&self) -> Vec<ResidentModel> {
        self.cache.resident()
    }

    /// Model files available in the model directory.
    ///
    /// # Errors
    /// Returns an I/O error if the model directory cannot be read.
    pub fn available_models(&self) -> std::io::Result<Vec<ModelInfo>> {
        self.catalog.list()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Identifier of the engine models are loaded with.
    pub fn engine_id(&self) -> &str {
        self.engine.engine_id()
    }
}
