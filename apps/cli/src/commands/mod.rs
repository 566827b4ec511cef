//! Command implementations for the Nexus CLI.

pub mod config;
pub mod models;
pub mod types;

pub use types::{ConfigCommand, ModelsCommand};

use anyhow::{Context, Result};
use nexus_models::{EngineLoader, Settings};
use std::path::Path;
use std::sync::Arc;

/// Load settings the way the server does: file, then `NEXUS_*` overrides.
pub fn load_settings(config: Option<&Path>) -> Result<Settings> {
    Settings::load(config).context("Failed to load settings")
}

/// The engine models are loaded with in this build.
#[cfg(feature = "llama")]
pub fn build_engine() -> Result<Arc<dyn EngineLoader>> {
    let engine = nexus_models::LlamaEngine::new().context("Failed to initialise llama.cpp")?;
    Ok(Arc::new(engine))
}

/// The engine models are loaded with in this build.
#[cfg(not(feature = "llama"))]
pub fn build_engine() -> Result<Arc<dyn EngineLoader>> {
    tracing::warn!("Built without the `llama` feature; using the mock engine");
    Ok(Arc::new(nexus_models::MockEngine::new()))
}
