//! Server settings.
//!
//! Settings are read once at startup and are immutable afterwards.
//!
//! Precedence:
//! 1. Environment variables (`NEXUS_*`)
//! 2. TOML config file (`nexus.toml` by default)
//! 3. Defaults

use nexus_abstraction::LoadParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cache::CacheConfig;

/// Default config file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "nexus.toml";

/// Errors that can occur during settings loading.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O error reading the settings file.
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// An environment variable held an unparsable value.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Settings validation error.
    #[error("Settings validation error: {0}")]
    Validation(String),
}

/// Static configuration for the inference server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Directory containing GGUF models.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Maximum models kept in memory simultaneously.
    #[serde(default = "default_max_cached_models")]
    pub max_cached_models: usize,

    /// Layers offloaded to the GPU (0 = CPU only).
    #[serde(default)]
    pub n_gpu_layers: u32,

    /// CPU threads for inference.
    #[serde(default = "default_n_threads")]
    pub n_threads: u32,

    /// Maximum context window.
    #[serde(default = "default_context_length")]
    pub context_length: u32,

    /// Token batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Lock model pages in RAM.
    #[serde(default = "default_true")]
    pub use_mlock: bool,

    /// Memory-map model files.
    #[serde(default = "default_true")]
    pub use_mmap: bool,

    /// Enable engine diagnostics.
    #[serde(default)]
    pub verbose: bool,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("./models")
}

fn default_model() -> String {
    "DeepSeek-Coder-V2-Lite-Instruct-Q4_K_M.gguf".to_string()
}

fn default_max_cached_models() -> usize {
    2
}

fn default_n_threads() -> u32 {
    4
}

fn default_context_length() -> u32 {
    2048
}

fn default_batch_size() -> u32 {
    512
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            default_model: default_model(),
            max_cached_models: default_max_cached_models(),
            n_gpu_layers: 0,
            n_threads: default_n_threads(),
            context_length: default_context_length(),
            batch_size: default_batch_size(),
            use_mlock: true,
            use_mmap: true,
            verbose: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv { var, value })
}

fn parse_bool_env(var: &'static str, value: String) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidEnv { var, value }),
    }
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;

        Ok(toml::from_str(&content)?)
    }

    /// Load settings the way the server does at startup.
    ///
    /// Reads `path` if given (it must exist), otherwise `nexus.toml` in the
    /// working directory if present, then applies `NEXUS_*` environment
    /// overrides and validates the result.
    ///
    /// # Errors
    /// Returns error if a file cannot be read or parsed, an environment value
    /// is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let local = Path::new(DEFAULT_SETTINGS_FILE);
                if local.exists() { Self::load_from_file(local)? } else { Self::default() }
            }
        };

        settings.apply_env_overrides(|var| std::env::var(var).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides from environment-style variables.
    ///
    /// `lookup` returns the value of a variable, if set.
    ///
    /// # Errors
    /// Returns `SettingsError::InvalidEnv` if a value cannot be parsed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NEXUS_MODEL_PATH") {
            self.model_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("NEXUS_DEFAULT_MODEL") {
            self.default_model = value;
        }
        if let Some(value) = lookup("NEXUS_MAX_CACHED_MODELS") {
            self.max_cached_models = parse_env("NEXUS_MAX_CACHED_MODELS", value)?;
        }
        if let Some(value) = lookup("NEXUS_N_GPU_LAYERS") {
            self.n_gpu_layers = parse_env("NEXUS_N_GPU_LAYERS", value)?;
        }
        if let Some(value) = lookup("NEXUS_N_THREADS") {
            self.n_threads = parse_env("NEXUS_N_THREADS", value)?;
        }
        if let Some(value) = lookup("NEXUS_CONTEXT_LENGTH") {
            self.context_length = parse_env("NEXUS_CONTEXT_LENGTH", value)?;
        }
        if let Some(value) = lookup("NEXUS_BATCH_SIZE") {
            self.batch_size = parse_env("NEXUS_BATCH_SIZE", value)?;
        }
        if let Some(value) = lookup("NEXUS_VERBOSE") {
            self.verbose = parse_bool_env("NEXUS_VERBOSE", value)?;
        }
        Ok(())
    }

    /// Validate the settings.
    ///
    /// # Errors
    /// Returns `SettingsError::Validation` describing the first invalid value.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_cached_models == 0 {
            return Err(SettingsError::Validation(
                "max_cached_models must be at least 1".to_string(),
            ));
        }
        if self.n_threads == 0 {
            return Err(SettingsError::Validation("n_threads must be at least 1".to_string()));
        }
        if self.context_length == 0 {
            return Err(SettingsError::Validation(
                "context_length must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SettingsError::Validation("batch_size must be greater than 0".to_string()));
        }
        if self.default_model.trim().is_empty() {
            return Err(SettingsError::Validation("default_model must not be empty".to_string()));
        }
        Ok(())
    }

    /// Engine load parameters derived from these settings.
    #[must_use]
    pub fn load_params(&self) -> LoadParams {
        LoadParams {
            n_gpu_layers: self.n_gpu_layers,
            n_threads: self.n_threads,
            context_length: self.context_length,
            batch_size: self.batch_size,
            use_mlock: self.use_mlock,
            use_mmap: self.use_mmap,
            verbose: self.verbose,
        }
    }

    /// Cache configuration derived from these settings.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::with_capacity(self.max_cached_models)
    }
}
