//! GGUF engine backed by llama.cpp.
//!
//! Sampling is delegated entirely to llama.cpp's sampler chain; the request's
//! parameters are forwarded as given.

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use nexus_abstraction::{
    Completion, CompletionUsage, EngineError, EngineLoader, FinishReason, GenerationParams,
    LoadParams, ModelHandle,
};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Tokens considered by the repeat penalty.
const PENALTY_LAST_N: i32 = 64;

/// Loads GGUF files through llama.cpp.
///
/// The llama.cpp backend can only be initialised once per process, so create
/// one `LlamaEngine` at startup and share it.
pub struct LlamaEngine {
    backend: Arc<LlamaBackend>,
}

impl LlamaEngine {
    /// Initialises the llama.cpp backend.
    ///
    /// # Errors
    /// Returns an `EngineError` if the backend was already initialised or
    /// failed to start.
    pub fn new() -> Result<Self, EngineError> {
        let backend = LlamaBackend::init().map_err(|e| EngineError::Other(e.to_string()))?;
        Ok(Self { backend: Arc::new(backend) })
    }
}

impl std::fmt::Debug for LlamaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaEngine").finish_non_exhaustive()
    }
}

impl EngineLoader for LlamaEngine {
    fn engine_id(&self) -> &str {
        "llama"
    }

    fn load(&self, path: &Path, params: &LoadParams) -> Result<Arc<dyn ModelHandle>, EngineError> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        if !path.is_file() {
            return Err(EngineError::Io(format!("model file not found: {}", path.display())));
        }

        let model_params = LlamaModelParams::default()
            .with_n_gpu_layers(params.n_gpu_layers)
            .with_use_mlock(params.use_mlock);

        let model = LlamaModel::load_from_file(&self.backend, path, &model_params)
            .map_err(|e| EngineError::UnsupportedFormat(format!("{}: {e}", path.display())))?;

        info!(
            model = %name,
            n_gpu_layers = params.n_gpu_layers,
            n_ctx_train = model.n_ctx_train(),
            "llama.cpp model loaded"
        );

        Ok(Arc::new(LlamaHandle {
            name,
            backend: Arc::clone(&self.backend),
            model: RwLock::new(Some(model)),
            params: params.clone(),
            seed: AtomicU32::new(seed_from_clock()),
        }))
    }
}

fn seed_from_clock() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.subsec_nanos())
}

/// A loaded llama.cpp model.
///
/// Releasing drops the `LlamaModel`, which frees its host and device memory.
/// Generations hold the read lock, so release waits for in-flight requests on
/// this handle to finish.
pub struct LlamaHandle {
    name: String,
    backend: Arc<LlamaBackend>,
    model: RwLock<Option<LlamaModel>>,
    params: LoadParams,
    seed: AtomicU32,
}

impl std::fmt::Debug for LlamaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaHandle")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

fn generation_error(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Generation(format!("{context}: {err}"))
}

impl LlamaHandle {
    fn with_model<T>(
        &self,
        f: impl FnOnce(&LlamaModel) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let guard = self.model.read().map_err(|e| EngineError::Other(e.to_string()))?;
        let model = guard.as_ref().ok_or_else(|| EngineError::Released(self.name.clone()))?;
        f(model)
    }

    fn sampler(&self, params: &GenerationParams) -> LlamaSampler {
        if params.temperature <= 0.0 {
            return LlamaSampler::chain_simple([
                LlamaSampler::penalties(PENALTY_LAST_N, params.repeat_penalty, 0.0, 0.0),
                LlamaSampler::greedy(),
            ]);
        }

        let seed = self.seed.fetch_add(1, Ordering::Relaxed);
        LlamaSampler::chain_simple([
            LlamaSampler::penalties(PENALTY_LAST_N, params.repeat_penalty, 0.0, 0.0),
            LlamaSampler::top_k(params.top_k),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(seed),
        ])
    }
}

impl ModelHandle for LlamaHandle {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Completion, EngineError> {
        self.with_model(|model| {
            let n_ctx = NonZeroU32::new(self.params.context_length);
            let ctx_params = LlamaContextParams::default()
                .with_n_ctx(n_ctx)
                .with_n_batch(self.params.batch_size)
                .with_n_threads(self.params.n_threads as i32)
                .with_n_threads_batch(self.params.n_threads as i32);

            let mut ctx = model
                .new_context(&self.backend, ctx_params)
                .map_err(|e| EngineError::ResourceExhausted(format!("context creation: {e}")))?;

            let tokens = model
                .str_to_token(prompt, AddBos::Always)
                .map_err(|e| generation_error("tokenize", e))?;
            if tokens.is_empty() {
                return Err(EngineError::Generation("prompt produced no tokens".to_string()));
            }
            let prompt_tokens = tokens.len() as u32;
            let needed = prompt_tokens.checked_add(params.max_tokens);
            if needed.is_none_or(|needed| needed > self.params.context_length) {
                return Err(EngineError::Generation(format!(
                    "prompt of {prompt_tokens} tokens plus {} new tokens exceeds context of {}",
                    params.max_tokens, self.params.context_length
                )));
            }

            let batch_size = self.params.batch_size.max(1) as usize;
            let mut batch = LlamaBatch::new(batch_size, 1);
            for (chunk_idx, chunk) in tokens.chunks(batch_size).enumerate() {
                batch.clear();
                let base = chunk_idx * batch_size;
                for (i, token) in chunk.iter().enumerate() {
                    let pos = base + i;
                    let is_last = pos == tokens.len() - 1;
                    batch
                        .add(*token, pos as i32, &[0], is_last)
                        .map_err(|e| generation_error("batch", e))?;
                }
                ctx.decode(&mut batch).map_err(|e| generation_error("decode prompt", e))?;
            }

            let mut sampler = self.sampler(params);
            let mut bytes: Vec<u8> = Vec::new();
            let mut completion_tokens = 0_u32;
            let mut finish_reason = FinishReason::Length;
            let mut n_cur = tokens.len() as i32;

            while completion_tokens < params.max_tokens {
                let token = sampler.sample(&ctx, batch.n_tokens() - 1);
                sampler.accept(token);

                if model.is_eog_token(token) {
                    finish_reason = FinishReason::Stop;
                    break;
                }

                let piece = model
                    .token_to_bytes(token, Special::Tokenize)
                    .map_err(|e| generation_error("detokenize", e))?;
                bytes.extend_from_slice(&piece);
                completion_tokens += 1;

                if let Some(stops) = params.stop_sequences.as_deref() {
                    let text = String::from_utf8_lossy(&bytes);
                    if let Some(cut) = stops.iter().filter_map(|s| text.find(s.as_str())).min() {
                        bytes.truncate(cut);
                        finish_reason = FinishReason::Stop;
                        break;
                    }
                }

                batch.clear();
                batch.add(token, n_cur, &[0], true).map_err(|e| generation_error("batch", e))?;
                ctx.decode(&mut batch).map_err(|e| generation_error("decode", e))?;
                n_cur += 1;
            }

            debug!(
                model = %self.name,
                prompt_tokens,
                completion_tokens,
                "llama.cpp generation finished"
            );

            Ok(Completion {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                finish_reason,
                usage: CompletionUsage::new(prompt_tokens, completion_tokens),
            })
        })
    }

    fn count_tokens(&self, text: &str) -> Result<u32, EngineError> {
        self.with_model(|model| {
            model
                .str_to_token(text, AddBos::Always)
                .map(|tokens| tokens.len() as u32)
                .map_err(|e| generation_error("tokenize", e))
        })
    }

    fn release(&self) -> Result<(), EngineError> {
        // A panicked generation must not keep the weights alive
        let mut guard = self.model.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            info!(model = %self.name, "llama.cpp model released");
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.model.read().map_or(true, |guard| guard.is_none())
    }
}
