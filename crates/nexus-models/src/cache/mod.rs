//! Model caching system for the model lifecycle.
//!
//! This module keeps loaded models resident up to a fixed capacity, evicting
//! the least recently used model when a new one is inserted and releasing
//! every handle that leaves the cache.

#[allow(clippy::module_inception)]
pub mod cache;
pub mod config;
mod lru;
pub mod types;

pub use cache::ModelCache;
pub use config::{CacheConfig, CacheConfigError};
pub use types::{CacheStats, CachedModel, ResidentModel};
