//! Error types for the model lifecycle core.

use nexus_abstraction::EngineError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for model lifecycle operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors returned by [`ModelManager`](crate::ModelManager) and its parts.
///
/// Errors are `Clone` because one failed load is delivered to every caller
/// waiting on the same ticket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// No model file exists for the requested name.
    #[error("Model file not found: {}", path.display())]
    ModelNotFound {
        /// The requested model name.
        name: String,
        /// Where the file was expected.
        path: PathBuf,
    },

    /// The engine failed to load the model.
    #[error("Model loading failed for '{name}': {source}")]
    LoadFailed {
        /// The requested model name.
        name: String,
        /// The underlying engine error.
        #[source]
        source: EngineError,
    },

    /// The load task ended without producing a result (it panicked or the
    /// runtime shut down under it).
    #[error("Model loading for '{name}' was aborted")]
    LoadAborted {
        /// The requested model name.
        name: String,
    },

    /// The manager has been shut down and no longer loads models.
    #[error("Model manager is shut down")]
    ShutDown,

    /// Invalid settings.
    #[error("Invalid settings: {0}")]
    Settings(String),
}

impl ModelError {
    /// Returns `true` for errors the HTTP layer should surface as "not found".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound { .. })
    }

    /// Returns the model name the error refers to, if any.
    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Self::ModelNotFound { name, .. }
            | Self::LoadFailed { name, .. }
            | Self::LoadAborted { name } => Some(name),
            Self::ShutDown | Self::Settings(_) => None,
        }
    }
}
