//! Configuration for the model cache.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the model cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of models to keep resident at once (default: 2).
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
}

fn default_max_cache_size() -> usize {
    2
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid max cache size (must be > 0).
    #[error("Invalid max cache size: must be greater than 0")]
    InvalidMaxCacheSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_cache_size: default_max_cache_size() }
    }
}

impl CacheConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub const fn with_capacity(max_cache_size: usize) -> Self {
        Self { max_cache_size }
    }

    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.max_cache_size == 0 {
            return Err(CacheConfigError::InvalidMaxCacheSize);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.max_cache_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_validation_invalid_max_size() {
        let config = CacheConfig::with_capacity(0);

        assert_eq!(config.validate(), Err(CacheConfigError::InvalidMaxCacheSize));
    }

    #[test]
    fn test_cache_config_deserialize_missing_field_uses_default() {
        let config: CacheConfig = toml::from_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
    }
}
