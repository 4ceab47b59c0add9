//! Integration tests for the offline mutation queue.
//!
//! Executors are scripted in-process; no network is touched. Each test
//! builds its own in-memory tiers, so a "reload" is simulated by opening
//! a second queue over the same tiered store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatvault_storage::backend::PrimaryStore;
use chatvault_storage::{CookieJar, MemoryStore, TieredStore};
use chatvault_sync::{
    ConnectivityMonitor, Method, MutationExecutor, MutationOutcome, MutationRequest,
    OfflineQueue, QueueWorker, QueuedMutation,
};
use chatvault_types::config::VaultConfig;
use chatvault_types::{Result, VaultError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tiered_store() -> Arc<TieredStore> {
    let config = VaultConfig::default();
    let primary = Arc::new(MemoryStore::new(config.primary_capacity_bytes));
    let secondary = Arc::new(CookieJar::in_memory(config.secondary_record_limit));
    Arc::new(TieredStore::new(primary, secondary, &config).unwrap())
}

/// Primary store that records the key of every write, in order.
struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(VaultConfig::default().primary_capacity_bytes),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn last_write_ending_with(&self, suffix: &str) -> Option<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rposition(|key| key.ends_with(suffix))
    }
}

impl PrimaryStore for RecordingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.lock().unwrap().push(key.to_string());
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }
}

fn post(url: &str) -> MutationRequest {
    MutationRequest::new(Method::Post, url).with_body(serde_json::json!({ "url": url }))
}

/// Records calls in order; fails every URL listed in `failing`.
///
/// At each call it also records how many mutations were persisted at
/// that moment, to observe persist-before-execute.
#[derive(Clone)]
struct ScriptedExecutor {
    calls: Arc<Mutex<Vec<String>>>,
    persisted_at_call: Arc<Mutex<Vec<usize>>>,
    failing: Arc<HashSet<String>>,
    store: Option<Arc<TieredStore>>,
}

impl ScriptedExecutor {
    fn new(failing: &[&str]) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            persisted_at_call: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(failing.iter().map(|s| s.to_string()).collect()),
            store: None,
        }
    }

    fn observing(mut self, store: &Arc<TieredStore>) -> Self {
        self.store = Some(Arc::clone(store));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MutationExecutor for ScriptedExecutor {
    fn execute(&self, mutation: &QueuedMutation) -> impl Future<Output = Result<u16>> + Send {
        self.calls.lock().unwrap().push(mutation.url.clone());
        if let Some(store) = &self.store {
            let persisted: Vec<QueuedMutation> = store.get("offline_queue", Vec::new());
            self.persisted_at_call.lock().unwrap().push(persisted.len());
        }
        let result = if self.failing.contains(&mutation.url) {
            Err(VaultError::NetworkError {
                reason: format!("{} unreachable", mutation.url),
            })
        } else {
            Ok(201)
        };
        async move { result }
    }
}

/// Blocks inside `execute` until released.
#[derive(Clone)]
struct GatedExecutor {
    entered: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
}

impl MutationExecutor for GatedExecutor {
    fn execute(&self, _mutation: &QueuedMutation) -> impl Future<Output = Result<u16>> + Send {
        let entered = Arc::clone(&self.entered);
        let release = Arc::clone(&self.release);
        async move {
            entered.notify_one();
            release.notified().await;
            Ok(200)
        }
    }
}

/// Logs in as another actor in the middle of execution, then fails.
#[derive(Clone)]
struct LoginDuringExecute {
    store: Arc<TieredStore>,
}

impl MutationExecutor for LoginDuringExecute {
    fn execute(&self, mutation: &QueuedMutation) -> impl Future<Output = Result<u16>> + Send {
        let login = self.store.identity().login("carol-session-token");
        let url = mutation.url.clone();
        async move {
            login?;
            Err(VaultError::NetworkError {
                reason: format!("{url} unreachable"),
            })
        }
    }
}

fn open_queue<E: MutationExecutor>(
    store: &Arc<TieredStore>,
    executor: E,
    online: bool,
) -> OfflineQueue<E> {
    OfflineQueue::open(
        Arc::clone(store),
        executor,
        ConnectivityMonitor::new(online),
        &VaultConfig::default(),
    )
    .unwrap()
}

// ===========================================================================
// 1. Persistence
// ===========================================================================

#[test]
fn offline_enqueues_survive_reload_in_order() {
    let store = tiered_store();
    let first_id;
    let second_id;
    {
        let queue = open_queue(&store, ScriptedExecutor::new(&[]), false);
        first_id = queue.enqueue(post("/chats"));
        second_id = queue.enqueue(post("/chats/1/messages"));
        assert_ne!(first_id, second_id);
    }

    let reloaded = open_queue(&store, ScriptedExecutor::new(&[]), false);
    let pending = reloaded.pending();

    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first_id);
    assert_eq!(pending[0].url, "/chats");
    assert_eq!(pending[1].id, second_id);
    assert_eq!(pending[1].options.method, Method::Post);
}

#[test]
fn stats_report_count_and_oldest() {
    let store = tiered_store();
    let queue = open_queue(&store, ScriptedExecutor::new(&[]), false);
    assert_eq!(queue.stats().pending, 0);
    assert_eq!(queue.stats().oldest, None);

    queue.enqueue(post("/a"));
    queue.enqueue(post("/b"));

    let stats = queue.stats();
    let pending = queue.pending();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.oldest, Some(pending[0].timestamp.clone()));
}

#[test]
fn clear_discards_without_executing() {
    let store = tiered_store();
    let executor = ScriptedExecutor::new(&[]);
    let queue = open_queue(&store, executor.clone(), false);
    queue.enqueue(post("/a"));
    queue.enqueue(post("/b"));

    assert_eq!(queue.clear().unwrap(), 2);
    assert!(queue.is_empty());
    assert!(executor.calls().is_empty());

    let reloaded = open_queue(&store, ScriptedExecutor::new(&[]), false);
    assert!(reloaded.is_empty());
}

// ===========================================================================
// 2. Drain
// ===========================================================================

#[tokio::test]
async fn drain_keeps_failures_and_preserves_order() {
    let store = tiered_store();
    let executor = ScriptedExecutor::new(&["/fails"]).observing(&store);
    let queue = open_queue(&store, executor.clone(), true);

    let failing_id = queue.enqueue(post("/fails"));
    queue.enqueue(post("/succeeds"));

    let report = queue.drain().await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(executor.calls(), vec!["/fails", "/succeeds"]);

    // Both executions saw an already-emptied persisted queue.
    assert_eq!(*executor.persisted_at_call.lock().unwrap(), vec![0, 0]);

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, failing_id);
    assert_eq!(pending[0].attempts, 1);

    let persisted: Vec<QueuedMutation> = store.get("offline_queue", Vec::new());
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, failing_id);
}

#[tokio::test]
async fn failed_mutation_goes_behind_new_enqueues() {
    let store = tiered_store();
    let executor = ScriptedExecutor::new(&["/fails"]);
    let queue = open_queue(&store, executor.clone(), true);

    queue.enqueue(post("/fails"));
    queue.drain().await;
    queue.enqueue(post("/later"));

    let urls: Vec<String> = queue.pending().into_iter().map(|m| m.url).collect();
    assert_eq!(urls, vec!["/fails", "/later"]);

    queue.drain().await;
    assert_eq!(executor.calls(), vec!["/fails", "/fails", "/later"]);
}

#[tokio::test]
async fn repeated_failures_are_dead_lettered() {
    let store = tiered_store();
    let config = VaultConfig {
        max_attempts: 3,
        ..VaultConfig::default()
    };
    let queue = OfflineQueue::open(
        Arc::clone(&store),
        ScriptedExecutor::new(&["/broken"]),
        ConnectivityMonitor::new(true),
        &config,
    )
    .unwrap();

    let (id, outcome) = queue.enqueue_with_completion(post("/broken"));
    for _ in 0..2 {
        let report = queue.drain().await;
        assert_eq!(report.requeued, 1);
    }
    let report = queue.drain().await;

    assert_eq!(report.dead_lettered, 1);
    assert!(queue.is_empty());
    let letters = queue.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].id, id);
    assert_eq!(letters[0].attempts, 3);
    assert!(matches!(
        outcome.await,
        Ok(MutationOutcome::Abandoned { attempts: 3, .. })
    ));

    queue.clear_dead_letters().unwrap();
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn dead_letter_list_keeps_only_the_newest() {
    let store = tiered_store();
    let config = VaultConfig {
        max_attempts: 1,
        dead_letter_limit: 2,
        ..VaultConfig::default()
    };
    let queue = OfflineQueue::open(
        Arc::clone(&store),
        ScriptedExecutor::new(&["/d1", "/d2", "/d3"]),
        ConnectivityMonitor::new(true),
        &config,
    )
    .unwrap();

    queue.enqueue(post("/d1"));
    queue.enqueue(post("/d2"));
    queue.enqueue(post("/d3"));
    let report = queue.drain().await;

    assert_eq!(report.dead_lettered, 3);
    let urls: Vec<String> = queue.dead_letters().into_iter().map(|m| m.url).collect();
    assert_eq!(urls, vec!["/d2", "/d3"]);
}

#[tokio::test]
async fn dead_letters_are_persisted_before_the_live_queue() {
    let config = VaultConfig {
        max_attempts: 2,
        ..VaultConfig::default()
    };
    let primary = Arc::new(RecordingStore::new());
    let secondary = Arc::new(CookieJar::in_memory(config.secondary_record_limit));
    let store = Arc::new(TieredStore::new(primary.clone(), secondary, &config).unwrap());
    let queue = OfflineQueue::open(
        Arc::clone(&store),
        ScriptedExecutor::new(&["/dies", "/retries"]),
        ConnectivityMonitor::new(true),
        &config,
    )
    .unwrap();

    queue.enqueue(post("/dies"));
    queue.drain().await;
    queue.enqueue(post("/retries"));
    primary.writes.lock().unwrap().clear();

    let report = queue.drain().await;
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.requeued, 1);

    let dead_write = primary
        .last_write_ending_with(":offline_queue_dead_letter")
        .unwrap();
    let queue_write = primary.last_write_ending_with(":offline_queue").unwrap();
    assert!(dead_write < queue_write);
}

#[tokio::test]
async fn completion_fires_on_success() {
    let store = tiered_store();
    let queue = open_queue(&store, ScriptedExecutor::new(&[]), true);

    let (_id, outcome) = queue.enqueue_with_completion(post("/ok"));
    queue.drain().await;

    assert_eq!(outcome.await, Ok(MutationOutcome::Completed { status: 201 }));
}

#[tokio::test]
async fn reloaded_mutation_executes_without_handler() {
    let store = tiered_store();
    {
        let queue = open_queue(&store, ScriptedExecutor::new(&[]), false);
        let (_id, _outcome) = queue.enqueue_with_completion(post("/orphan"));
    }

    let executor = ScriptedExecutor::new(&[]);
    let queue = open_queue(&store, executor.clone(), true);
    let report = queue.drain().await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(executor.calls(), vec!["/orphan"]);
}

#[tokio::test]
async fn concurrent_drain_is_skipped() {
    let store = tiered_store();
    let executor = GatedExecutor {
        entered: Arc::new(tokio::sync::Notify::new()),
        release: Arc::new(tokio::sync::Notify::new()),
    };
    let queue = Arc::new(open_queue(&store, executor.clone(), true));
    queue.enqueue(post("/slow"));

    let first = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.drain().await }
    });
    executor.entered.notified().await;

    let second = queue.drain().await;
    assert!(second.skipped);
    assert_eq!(second.attempted, 0);

    executor.release.notify_one();
    let first = first.await.unwrap();
    assert!(!first.skipped);
    assert_eq!(first.succeeded, 1);
}

#[tokio::test]
async fn drain_if_ready_respects_connectivity() {
    let store = tiered_store();
    let executor = ScriptedExecutor::new(&[]);
    let queue = open_queue(&store, executor.clone(), false);
    queue.enqueue(post("/a"));

    assert_eq!(queue.drain_if_ready().await, None);
    assert!(executor.calls().is_empty());

    queue.monitor().set_online(true);
    let report = queue.drain_if_ready().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(queue.drain_if_ready().await, None);
}

// ===========================================================================
// 3. Namespace switches
// ===========================================================================

#[test]
fn login_does_not_carry_anonymous_mutations_into_user_queue() {
    let store = tiered_store();
    let queue = open_queue(&store, ScriptedExecutor::new(&[]), false);

    queue.enqueue(post("/anon-write"));
    store.identity().login("alice-session-token").unwrap();
    queue.enqueue(post("/alice-write"));

    let persisted: Vec<QueuedMutation> = store.get("offline_queue", Vec::new());
    let urls: Vec<String> = persisted.into_iter().map(|m| m.url).collect();
    assert_eq!(urls, vec!["/alice-write"]);
    assert_eq!(queue.pending().len(), 1);
}

#[test]
fn switching_back_restores_the_actors_own_queue() {
    let store = tiered_store();
    let queue = open_queue(&store, ScriptedExecutor::new(&[]), false);

    store.identity().login("alice-session-token").unwrap();
    queue.enqueue(post("/alice-write"));

    store.identity().logout().unwrap();
    assert!(queue.is_empty());

    store.identity().login("alice-session-token").unwrap();
    let urls: Vec<String> = queue.pending().into_iter().map(|m| m.url).collect();
    assert_eq!(urls, vec!["/alice-write"]);
}

#[tokio::test]
async fn failures_are_dropped_when_namespace_changes_mid_drain() {
    let store = tiered_store();
    let executor = LoginDuringExecute {
        store: Arc::clone(&store),
    };
    let queue = open_queue(&store, executor, true);
    let (_id, outcome) = queue.enqueue_with_completion(post("/anon-write"));

    let report = queue.drain().await;

    assert_eq!(report.attempted, 1);
    assert_eq!(report.requeued, 0);
    assert_eq!(store.namespace().as_str(), "user_carol-session-token");
    assert!(queue.is_empty());
    let persisted: Vec<QueuedMutation> = store.get("offline_queue", Vec::new());
    assert!(persisted.is_empty());
    assert!(outcome.await.is_err());
}

// ===========================================================================
// 4. Worker
// ===========================================================================

#[tokio::test]
async fn worker_drains_when_connectivity_returns() {
    let store = tiered_store();
    let executor = ScriptedExecutor::new(&[]);
    let queue = Arc::new(open_queue(&store, executor.clone(), false));
    let worker = QueueWorker::start(Arc::clone(&queue), Duration::from_secs(3600));

    let (_id, outcome) = queue.enqueue_with_completion(post("/queued-offline"));
    tokio::task::yield_now().await;
    assert!(executor.calls().is_empty());

    queue.monitor().set_online(true);
    let outcome = tokio::time::timeout(Duration::from_secs(5), outcome)
        .await
        .unwrap();

    assert_eq!(outcome, Ok(MutationOutcome::Completed { status: 201 }));
    assert_eq!(executor.calls(), vec!["/queued-offline"]);
    worker.dispose().await;
}

#[tokio::test]
async fn worker_executes_enqueues_while_online() {
    let store = tiered_store();
    let queue = Arc::new(open_queue(&store, ScriptedExecutor::new(&[]), true));
    let worker = QueueWorker::start(Arc::clone(&queue), Duration::from_secs(3600));

    let (_id, outcome) = queue.enqueue_with_completion(post("/live"));
    let outcome = tokio::time::timeout(Duration::from_secs(5), outcome)
        .await
        .unwrap();

    assert!(matches!(outcome, Ok(MutationOutcome::Completed { .. })));
    worker.dispose().await;
    assert!(queue.is_empty());
}
