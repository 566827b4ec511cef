//! Engine abstraction layer for NexusLLM.
//!
//! This crate defines the seam between the model lifecycle core and the
//! inference engine that actually reads GGUF files and runs generation.
//! The engine is treated as a black box: it produces opaque [`ModelHandle`]s
//! through an [`EngineLoader`] and frees them through [`ModelHandle::release`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Represents an error raised by the inference engine.
///
/// Errors are `Clone` so a single failed load can be handed to every caller
/// that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// The model file could not be read.
    #[error("I/O Error: {0}")]
    Io(String),

    /// The engine ran out of host or device memory.
    #[error("Resource Exhausted: {0}")]
    ResourceExhausted(String),

    /// The file is not a model the engine understands (corrupt or wrong format).
    #[error("Unsupported Format: {0}")]
    UnsupportedFormat(String),

    /// The handle was used after its resources were released.
    #[error("Model Released: {0}")]
    Released(String),

    /// Tokenization or decoding failed during generation.
    #[error("Generation Error: {0}")]
    Generation(String),

    /// Other unexpected errors.
    #[error("Other Engine Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Parameters forwarded verbatim to the engine when a model is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadParams {
    /// Number of layers to offload to the GPU (0 = CPU only).
    pub n_gpu_layers: u32,

    /// CPU threads used for evaluation.
    pub n_threads: u32,

    /// Maximum context window in tokens.
    pub context_length: u32,

    /// Token batch size for prompt processing.
    pub batch_size: u32,

    /// Lock model pages in RAM.
    pub use_mlock: bool,

    /// Memory-map the model file instead of reading it.
    pub use_mmap: bool,

    /// Let the engine print its own diagnostics.
    pub verbose: bool,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_threads: 4,
            context_length: 2048,
            batch_size: 512,
            use_mlock: true,
            use_mmap: true,
            verbose: false,
        }
    }
}

/// Sampling parameters for a single generation request.
///
/// The core never interprets these; they are handed to the engine as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,

    /// Sampling temperature, between 0 and 2.
    pub temperature: f32,

    /// Nucleus sampling probability mass.
    pub top_p: f32,

    /// Top-K sampling (0 = disabled).
    pub top_k: i32,

    /// Penalty applied to repeated tokens (1.0 = none).
    pub repeat_penalty: f32,

    /// Sequences that end generation when produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            stop_sequences: None,
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced an end-of-generation token or a stop sequence.
    Stop,
    /// `max_tokens` was reached.
    Length,
}

/// Usage statistics for a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

impl CompletionUsage {
    /// Builds usage counters, deriving the total.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens }
    }
}

/// The result of a completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text.
    pub text: String,

    /// Why generation stopped.
    pub finish_reason: FinishReason,

    /// Token accounting for the request.
    pub usage: CompletionUsage,
}

/// An opaque, resource-bearing reference to a loaded model.
///
/// Handles may represent gigabytes of resident memory or GPU allocations, so
/// they are never reclaimed implicitly: whoever owns the handle must call
/// [`release`](Self::release) when it is retired. Implementations must make
/// `release` idempotent, and every other method must fail with
/// [`EngineError::Released`] once the handle has been released.
pub trait ModelHandle: Send + Sync + fmt::Debug {
    /// Returns the name the model was loaded under.
    fn model_name(&self) -> &str;

    /// Runs a blocking text completion against the model.
    ///
    /// # Errors
    /// Returns an `EngineError` if the handle was released or generation fails.
    fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Completion, EngineError>;

    /// Counts the tokens `text` encodes to without generating anything.
    ///
    /// # Errors
    /// Returns an `EngineError` if the handle was released or tokenization fails.
    fn count_tokens(&self, text: &str) -> Result<u32, EngineError>;

    /// Frees the engine resources held by this handle.
    ///
    /// # Errors
    /// Returns an `EngineError` if cleanup was imperfect. The handle must be
    /// considered released regardless.
    fn release(&self) -> Result<(), EngineError>;

    /// Returns `true` once [`release`](Self::release) has been called.
    fn is_released(&self) -> bool;
}

/// Loads model files into [`ModelHandle`]s.
///
/// Loading is synchronous and expensive (seconds of disk I/O and large
/// allocations); callers are expected to run it off the async executor.
pub trait EngineLoader: Send + Sync {
    /// Returns a short identifier for the engine (e.g. "llama", "mock").
    fn engine_id(&self) -> &str;

    /// Loads the model stored at `path`.
    ///
    /// # Errors
    /// Returns an `EngineError` if the file cannot be read, is not a valid
    /// model, or the engine runs out of resources.
    fn load(&self, path: &Path, params: &LoadParams) -> Result<Arc<dyn ModelHandle>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_params_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 128);
        assert!((params.temperature - 0.7).abs() < f32::EPSILON);
        assert!((params.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(params.top_k, 40);
        assert!((params.repeat_penalty - 1.1).abs() < f32::EPSILON);
        assert!(params.stop_sequences.is_none());
    }

    #[test]
    fn test_generation_params_deserialize_partial_stop() {
        let json = r#"{"max_tokens":16,"temperature":0.0,"top_p":1.0,"top_k":0,"repeat_penalty":1.0}"#;
        let params: GenerationParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.max_tokens, 16);
        assert!(params.stop_sequences.is_none());
    }

    #[test]
    fn test_load_params_defaults() {
        let params = LoadParams::default();
        assert_eq!(params.n_gpu_layers, 0);
        assert_eq!(params.n_threads, 4);
        assert_eq!(params.context_length, 2048);
        assert_eq!(params.batch_size, 512);
        assert!(params.use_mlock);
        assert!(params.use_mmap);
    }

    #[test]
    fn test_usage_total() {
        let usage = CompletionUsage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn test_engine_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = EngineError::from(io);
        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(err.to_string(), "I/O Error: missing");
    }

    #[test]
    fn test_finish_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FinishReason::Length).unwrap();
        assert_eq!(json, "\"length\"");
    }
}
