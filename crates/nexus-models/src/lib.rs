//! Model lifecycle core for the Nexus GGUF inference server.
//!
//! This crate decides which models are resident in memory and makes sure each
//! one is loaded once and released once:
//!
//! - [`ModelCache`]: bounded LRU store that releases every handle it drops
//! - [`LoadCoordinator`]: single-flight loading, one load per model name
//! - [`ModelManager`]: the facade request handlers call
//! - [`ModelCatalog`]: maps model names to `*.gguf` files
//! - [`Settings`]: startup configuration from TOML and `NEXUS_*` variables
//!
//! Engines implement [`nexus_abstraction::EngineLoader`]; [`MockEngine`] is
//! always available, `LlamaEngine` with the `llama` feature.

pub mod cache;
pub mod catalog;
pub mod coordinator;
pub mod engines;
pub mod error;
pub mod manager;
pub mod settings;

pub use cache::{CacheConfig, CacheConfigError, CacheStats, ModelCache, ResidentModel};
pub use catalog::{ModelCatalog, ModelInfo};
pub use coordinator::{CoordinatorStats, LoadCoordinator, LoadOutcome};
#[cfg(feature = "llama")]
pub use engines::LlamaEngine;
pub use engines::{MockEngine, MockHandle};
pub use error::{ModelError, Result};
pub use manager::{ManagerStats, ModelManager};
pub use settings::{Settings, SettingsError};

pub use nexus_abstraction::{
    Completion, EngineError, EngineLoader, GenerationParams, LoadParams, ModelHandle,
};
