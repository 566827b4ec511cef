//! Engine loader implementations.
//!
//! - **Mock**: deterministic in-process engine for tests and development
//! - **Llama**: GGUF models through llama.cpp (`llama` feature)

#[cfg(feature = "llama")]
pub mod llama;
pub mod mock;

#[cfg(feature = "llama")]
pub use llama::{LlamaEngine, LlamaHandle};
pub use mock::{MockEngine, MockHandle};
