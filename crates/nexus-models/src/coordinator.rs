//! Single-flight loading.
//!
//! The coordinator keeps one ticket per model name that is currently being
//! loaded. The first caller for an absent name runs the load; everybody who
//! arrives while it is in flight subscribes to the ticket and receives the
//! same outcome, success or failure.

use nexus_abstraction::ModelHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cache::ModelCache;
use crate::error::ModelError;

/// Outcome of one load, shared by every caller waiting on it.
pub type LoadOutcome = Result<Arc<dyn ModelHandle>, ModelError>;

type Ticket = watch::Receiver<Option<LoadOutcome>>;
type TicketTable = Arc<Mutex<HashMap<String, Ticket>>>;

fn lock_tickets(
    tickets: &Mutex<HashMap<String, Ticket>>,
) -> MutexGuard<'_, HashMap<String, Ticket>> {
    tickets.lock().expect("Ticket lock poisoned")
}

/// Load counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Loads actually run by the engine.
    pub loads: u64,
    /// Loads that ended in an error.
    pub load_failures: u64,
    /// Callers that joined a load already in flight.
    pub coalesced_waits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicU64,
    load_failures: AtomicU64,
    coalesced_waits: AtomicU64,
}

/// What a caller does after consulting the ticket table.
enum Role {
    Waiter(Ticket),
    Loader(watch::Sender<Option<LoadOutcome>>, Ticket),
}

/// Removes the ticket when the load task finishes, including by panic.
struct TicketGuard {
    tickets: TicketTable,
    name: String,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        // Only the task that inserted a ticket removes it, so the entry here is ours.
        let mut tickets = self.tickets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tickets.remove(&self.name);
    }
}

/// Ensures at most one load per model name is in flight.
#[derive(Debug, Default)]
pub struct LoadCoordinator {
    tickets: TicketTable,
    counters: Arc<Counters>,
}

impl LoadCoordinator {
    /// Creates a coordinator with no loads in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `name`, running `loader` if nobody else
    /// is loading it already.
    ///
    /// The load runs on the blocking pool in a detached task which inserts a
    /// successful result into `cache` before publishing it. Handles the insert
    /// evicts are released only after the outcome is published. Dropping the
    /// returned future stops waiting but never cancels the load.
    ///
    /// # Errors
    /// Returns the loader's error (identically to every waiter),
    /// `ModelError::ShutDown` if the cache was closed while loading, or
    /// `ModelError::LoadAborted` if the load task died without an outcome.
    pub async fn load_or_wait<F>(
        &self,
        name: &str,
        cache: &Arc<ModelCache>,
        loader: F,
    ) -> LoadOutcome
    where
        F: FnOnce() -> LoadOutcome + Send + 'static,
    {
        let role = {
            let mut tickets = lock_tickets(&self.tickets);
            if let Some(existing) = tickets.get(name) {
                Role::Waiter(existing.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                tickets.insert(name.to_string(), rx.clone());
                Role::Loader(tx, rx)
            }
        };

        let (tx, rx) = match role {
            Role::Waiter(existing) => {
                self.counters.coalesced_waits.fetch_add(1, Ordering::Relaxed);
                debug!(model = %name, "Joining in-flight load");
                return Self::wait(name, existing).await;
            }
            Role::Loader(tx, rx) => (tx, rx),
        };

        let guard = TicketGuard { tickets: Arc::clone(&self.tickets), name: name.to_string() };

        // Someone may have finished loading between the caller's cache miss
        // and our ticket insert.
        if let Some(handle) = cache.recheck(name) {
            debug!(model = %name, "Model became resident while acquiring ticket");
            drop(guard);
            tx.send_replace(Some(Ok(Arc::clone(&handle))));
            return Ok(handle);
        }

        let cache = Arc::clone(cache);
        let counters = Arc::clone(&self.counters);
        let task_name = name.to_string();
        counters.loads.fetch_add(1, Ordering::Relaxed);
        info!(model = %name, "Loading model");

        // Detached: the load outlives callers that stop waiting
        tokio::task::spawn_blocking(move || {
            let (outcome, retired) = match loader() {
                Ok(handle) => {
                    let (inserted, retired) =
                        cache.insert_deferred(&task_name, Arc::clone(&handle));
                    let outcome = if inserted {
                        info!(model = %task_name, "Model loaded");
                        Ok(handle)
                    } else {
                        info!(model = %task_name, "Cache closed during load; releasing model");
                        Err(ModelError::ShutDown)
                    };
                    (outcome, Some(retired))
                }
                Err(err) => {
                    counters.load_failures.fetch_add(1, Ordering::Relaxed);
                    error!(model = %task_name, error = %err, "Model loading failed");
                    (Err(err), None)
                }
            };

            // Callers arriving from here on see the cache entry or start a
            // fresh load; they never join a finished ticket.
            drop(guard);
            tx.send_replace(Some(outcome));

            // Waiters already have their handle; displaced models are freed after.
            if let Some(retired) = retired {
                cache.release_retired(retired);
            }
        });

        Self::wait(name, rx).await
    }

    async fn wait(name: &str, mut rx: Ticket) -> LoadOutcome {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| Err(ModelError::LoadAborted { name: name.to_string() })),
            Err(_) => {
                error!(model = %name, "Load task ended without an outcome");
                Err(ModelError::LoadAborted { name: name.to_string() })
            }
        }
    }

    /// Names of models currently being loaded, sorted.
    pub fn in_flight(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_tickets(&self.tickets).keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the load counters.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            loads: self.counters.loads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
            coalesced_waits: self.counters.coalesced_waits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::engines::MockEngine;
    use nexus_abstraction::{EngineError, EngineLoader, LoadParams};
    use std::path::PathBuf;
    use std::time::Duration;

    fn cache(capacity: usize) -> Arc<ModelCache> {
        Arc::new(ModelCache::new(CacheConfig::with_capacity(capacity)).unwrap())
    }

    /// Polls `check` until it holds, failing after two seconds.
    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 2s");
    }

    fn loader(
        engine: &Arc<MockEngine>,
        name: &str,
    ) -> impl FnOnce() -> LoadOutcome + Send + 'static {
        let engine = Arc::clone(engine);
        let name = name.to_string();
        move || {
            engine
                .load(&PathBuf::from(&name), &LoadParams::default())
                .map_err(|source| ModelError::LoadFailed { name, source })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_load() {
        let engine = Arc::new(MockEngine::new().with_load_delay(Duration::from_millis(100)));
        let cache = cache(1);
        let coordinator = Arc::new(LoadCoordinator::new());

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let engine = Arc::clone(&engine);
            let cache = Arc::clone(&cache);
            let coordinator = Arc::clone(&coordinator);
            tasks.push(tokio::spawn(async move {
                coordinator.load_or_wait("m.gguf", &cache, loader(&engine, "m.gguf")).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(engine.load_count("m.gguf"), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(cache.contains("m.gguf"));
        assert_eq!(coordinator.stats().loads, 1);
        assert_eq!(coordinator.stats().coalesced_waits, 4);
        assert!(coordinator.in_flight().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_is_shared_and_ticket_cleared() {
        let engine = Arc::new(MockEngine::new().with_load_delay(Duration::from_millis(50)));
        engine.fail_loads_for("bad.gguf", EngineError::ResourceExhausted("oom".to_string()));
        let cache = cache(1);
        let coordinator = Arc::new(LoadCoordinator::new());

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let engine = Arc::clone(&engine);
            let cache = Arc::clone(&cache);
            let coordinator = Arc::clone(&coordinator);
            tasks.push(tokio::spawn(async move {
                coordinator.load_or_wait("bad.gguf", &cache, loader(&engine, "bad.gguf")).await
            }));
        }

        let expected = ModelError::LoadFailed {
            name: "bad.gguf".to_string(),
            source: EngineError::ResourceExhausted("oom".to_string()),
        };
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap_err(), expected);
        }
        assert_eq!(engine.load_count("bad.gguf"), 1);
        assert!(coordinator.in_flight().is_empty());
        assert!(cache.is_empty());

        // A later caller may retry
        engine.clear_load_failure("bad.gguf");
        let handle = coordinator
            .load_or_wait("bad.gguf", &cache, loader(&engine, "bad.gguf"))
            .await
            .unwrap();
        assert_eq!(handle.model_name(), "bad.gguf");
        assert_eq!(engine.load_count("bad.gguf"), 2);
        assert_eq!(coordinator.stats().load_failures, 1);
    }

    #[tokio::test]
    async fn test_recheck_hit_skips_load() {
        let engine = Arc::new(MockEngine::new());
        let cache = cache(2);
        let resident = engine.load(&PathBuf::from("a.gguf"), &LoadParams::default()).unwrap();
        cache.put("a.gguf", Arc::clone(&resident));

        let coordinator = LoadCoordinator::new();
        let handle = coordinator
            .load_or_wait("a.gguf", &cache, || panic!("loader must not run on a resident model"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&handle, &resident));
        assert_eq!(coordinator.stats().loads, 0);
        assert_eq!(cache.stats().total_hits, 0);
        assert!(coordinator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_loader_aborts_waiters() {
        let cache = cache(1);
        let coordinator = LoadCoordinator::new();

        let err = coordinator
            .load_or_wait("boom.gguf", &cache, || panic!("engine crashed"))
            .await
            .unwrap_err();

        assert_eq!(err, ModelError::LoadAborted { name: "boom.gguf".to_string() });
        assert!(coordinator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_loaded_handle() {
        let engine = Arc::new(MockEngine::new());
        let cache = cache(1);
        cache.close();

        let coordinator = LoadCoordinator::new();
        let err = coordinator
            .load_or_wait("a.gguf", &cache, loader(&engine, "a.gguf"))
            .await
            .unwrap_err();

        assert_eq!(err, ModelError::ShutDown);
        eventually(|| engine.release_count("a.gguf") == 1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eviction_release_does_not_delay_waiters() {
        let engine = Arc::new(MockEngine::new().with_release_delay(Duration::from_millis(500)));
        let cache = cache(1);
        let coordinator = LoadCoordinator::new();

        let a =
            coordinator.load_or_wait("a.gguf", &cache, loader(&engine, "a.gguf")).await.unwrap();

        let started = std::time::Instant::now();
        coordinator.load_or_wait("b.gguf", &cache, loader(&engine, "b.gguf")).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(cache.contains("b.gguf"));

        eventually(|| a.is_released() && cache.stats().total_releases == 1).await;
        assert_eq!(engine.release_count("a.gguf"), 1);
    }

    #[tokio::test]
    async fn test_ticket_cleared_before_outcome_is_seen() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_loads_for("bad.gguf", EngineError::Io("disk".to_string()));
        let cache = cache(1);
        let coordinator = LoadCoordinator::new();

        let err = coordinator
            .load_or_wait("bad.gguf", &cache, loader(&engine, "bad.gguf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::LoadFailed { .. }));

        // The failed ticket is gone by the time anyone observes the error,
        // so the very next caller runs a fresh load instead of joining it.
        assert!(coordinator.in_flight().is_empty());
        engine.clear_load_failure("bad.gguf");
        coordinator.load_or_wait("bad.gguf", &cache, loader(&engine, "bad.gguf")).await.unwrap();
        assert_eq!(engine.load_count("bad.gguf"), 2);
        assert_eq!(coordinator.stats().coalesced_waits, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_caller_does_not_cancel_load() {
        let engine = Arc::new(MockEngine::new().with_load_delay(Duration::from_millis(100)));
        let cache = cache(1);
        let coordinator = Arc::new(LoadCoordinator::new());

        let pending = {
            let engine = Arc::clone(&engine);
            let cache = Arc::clone(&cache);
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator.load_or_wait("slow.gguf", &cache, loader(&engine, "slow.gguf")).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pending.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.contains("slow.gguf"));
        assert_eq!(engine.load_count("slow.gguf"), 1);
        assert!(coordinator.in_flight().is_empty());
    }
}
