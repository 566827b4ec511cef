//! In-process engine used for tests and development.
//!
//! `MockEngine` never touches the file system. It hands out [`MockHandle`]s
//! named after the file stem it was asked to load, records how often each
//! model was loaded and released, and can inject load and release delays and
//! failures.

use nexus_abstraction::{
    Completion, CompletionUsage, EngineError, EngineLoader, FinishReason, GenerationParams,
    LoadParams, ModelHandle,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Per-model counters shared between the engine and its handles.
#[derive(Debug, Default)]
struct Ledger {
    loads: HashMap<String, usize>,
    releases: HashMap<String, usize>,
    failing_loads: HashMap<String, EngineError>,
    failing_releases: HashSet<String>,
}

/// A deterministic stand-in for a real inference engine.
#[derive(Debug, Default)]
pub struct MockEngine {
    ledger: Arc<Mutex<Ledger>>,
    load_delay: Duration,
    release_delay: Duration,
    next_id: AtomicU64,
}

impl MockEngine {
    /// Creates a mock engine with no delay and no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every load block for `delay`, so concurrent callers overlap.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Makes every release of a live handle block for `delay`, like an engine
    /// waiting for in-flight generations before freeing weights.
    #[must_use]
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("Mock ledger lock poisoned")
    }

    /// Makes loads of `name` fail with `error` until
    /// [`clear_load_failure`](Self::clear_load_failure).
    pub fn fail_loads_for(&self, name: &str, error: EngineError) {
        self.ledger().failing_loads.insert(name.to_string(), error);
    }

    /// Lets loads of `name` succeed again.
    pub fn clear_load_failure(&self, name: &str) {
        self.ledger().failing_loads.remove(name);
    }

    /// Makes releasing handles of `name` report an error.
    pub fn fail_releases_for(&self, name: &str) {
        self.ledger().failing_releases.insert(name.to_string());
    }

    /// Number of load attempts for `name`, successful or not.
    pub fn load_count(&self, name: &str) -> usize {
        self.ledger().loads.get(name).copied().unwrap_or(0)
    }

    /// Number of load attempts across all models.
    pub fn total_loads(&self) -> usize {
        self.ledger().loads.values().sum()
    }

    /// Number of release calls that freed a handle of `name`.
    pub fn release_count(&self, name: &str) -> usize {
        self.ledger().releases.get(name).copied().unwrap_or(0)
    }

    /// Number of release calls across all models.
    pub fn total_releases(&self) -> usize {
        self.ledger().releases.values().sum()
    }
}

impl EngineLoader for MockEngine {
    fn engine_id(&self) -> &str {
        "mock"
    }

    fn load(&self, path: &Path, params: &LoadParams) -> Result<Arc<dyn ModelHandle>, EngineError> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let failure = {
            let mut ledger = self.ledger();
            *ledger.loads.entry(name.clone()).or_insert(0) += 1;
            ledger.failing_loads.get(&name).cloned()
        };

        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }

        if let Some(error) = failure {
            debug!(model = %name, error = %error, "MockEngine failing load");
            return Err(error);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            model = %name,
            id,
            context_length = params.context_length,
            "MockEngine loaded model"
        );

        Ok(Arc::new(MockHandle {
            name,
            id,
            context_length: params.context_length,
            release_delay: self.release_delay,
            released: AtomicBool::new(false),
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

/// Handle produced by [`MockEngine`].
#[derive(Debug)]
pub struct MockHandle {
    name: String,
    id: u64,
    context_length: u32,
    release_delay: Duration,
    released: AtomicBool,
    ledger: Arc<Mutex<Ledger>>,
}

impl MockHandle {
    /// Unique id of this load, increasing per engine.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.released.load(Ordering::Acquire) {
            return Err(EngineError::Released(self.name.clone()));
        }
        Ok(())
    }
}

/// Whitespace token count; good enough for a mock.
fn count_words(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

impl ModelHandle for MockHandle {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Completion, EngineError> {
        self.ensure_live()?;

        let prompt_tokens = count_words(prompt);
        let needed = prompt_tokens.checked_add(params.max_tokens);
        if needed.is_none_or(|needed| needed > self.context_length) {
            return Err(EngineError::Generation(format!(
                "prompt of {prompt_tokens} tokens plus {} new tokens exceeds context of {}",
                params.max_tokens, self.context_length
            )));
        }

        let full = format!("Mock completion from {} for: {prompt}", self.name);
        let words: Vec<&str> = full.split_whitespace().collect();
        let limit = params.max_tokens as usize;
        let (text, finish_reason) = if words.len() > limit {
            (words[..limit].join(" "), FinishReason::Length)
        } else {
            (words.join(" "), FinishReason::Stop)
        };

        let text = match params.stop_sequences.as_deref() {
            Some(stops) => stops
                .iter()
                .filter_map(|stop| text.find(stop.as_str()))
                .min()
                .map_or(text.clone(), |cut| text[..cut].to_string()),
            None => text,
        };

        let usage = CompletionUsage::new(prompt_tokens, count_words(&text));
        Ok(Completion { text, finish_reason, usage })
    }

    fn count_tokens(&self, text: &str) -> Result<u32, EngineError> {
        self.ensure_live()?;
        Ok(count_words(text))
    }

    fn release(&self) -> Result<(), EngineError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if !self.release_delay.is_zero() {
            std::thread::sleep(self.release_delay);
        }

        let mut ledger = self.ledger.lock().expect("Mock ledger lock poisoned");
        *ledger.releases.entry(self.name.clone()).or_insert(0) += 1;
        if ledger.failing_releases.contains(&self.name) {
            return Err(EngineError::Other(format!("simulated release failure for {}", self.name)));
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}
