//! Offline mutation queue.
//!
//! Network writes are appended here and replayed in enqueue order by
//! [`drain`](OfflineQueue::drain). The whole queue is persisted as one
//! JSON array through the [`TieredStore`], so pending writes survive a
//! reload.
//!
//! # Drain protocol
//!
//! 1. Claim a snapshot of every pending mutation and persist the
//!    now-empty queue before executing anything. A restart mid-drain
//!    never replays a claimed mutation twice.
//! 2. Execute the snapshot sequentially, in enqueue order.
//! 3. Discard successes. Re-append failures at the tail, or move them to
//!    the dead-letter list once they reach `max_attempts`.
//! 4. Persist the live queue once after the pass.
//!
//! Only one drain runs at a time; a concurrent call returns a skipped
//! report without touching the queue.
//!
//! # Namespaces
//!
//! The in-memory entries belong to the namespace they were loaded
//! from. When the resolved namespace changes (login, logout), the
//! entries are replaced by the new namespace's persisted queue; they are
//! never written into another actor's partition. Mutations a drain
//! fails to execute after such a switch are dropped.
//!
//! # Thread Safety
//!
//! State is behind `std::sync::Mutex`; no guard is held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chatvault_storage::TieredStore;
use chatvault_types::config::VaultConfig;
use chatvault_types::{MutationId, Namespace, Result, Timestamp, VaultError};
use serde::Serialize;
use tokio::sync::{oneshot, Notify};

use crate::connectivity::ConnectivityMonitor;
use crate::mutation::{MutationExecutor, MutationOutcome, MutationRequest, QueuedMutation};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Pending count and age of the oldest pending mutation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    /// Enqueue time of the oldest pending mutation, if any.
    pub oldest: Option<Timestamp>,
}

/// Summary of one drain pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    /// `true` if another drain was already in flight.
    pub skipped: bool,
}

// ---------------------------------------------------------------------------
// OfflineQueue
// ---------------------------------------------------------------------------

/// Pending mutations and the namespace they are persisted under.
struct Pending {
    owner: Namespace,
    items: Vec<QueuedMutation>,
}

/// Persisted, ordered queue of deferred network writes.
pub struct OfflineQueue<E> {
    store: Arc<TieredStore>,
    executor: E,
    monitor: ConnectivityMonitor,
    entries: Mutex<Pending>,
    /// In-process completion handlers; never persisted.
    completions: Mutex<HashMap<MutationId, oneshot::Sender<MutationOutcome>>>,
    draining: AtomicBool,
    wake: Notify,
    queue_key: String,
    dead_letter_key: String,
    max_attempts: u32,
    dead_letter_limit: usize,
}

impl<E: MutationExecutor> OfflineQueue<E> {
    /// Opens the queue, restoring pending mutations persisted under the
    /// current namespace.
    ///
    /// A missing or unreadable persisted queue starts empty.
    pub fn open(
        store: Arc<TieredStore>,
        executor: E,
        monitor: ConnectivityMonitor,
        config: &VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        let owner = store.namespace();
        let items: Vec<QueuedMutation> = store.get(&config.queue_key, Vec::new());
        tracing::debug!(namespace = %owner, pending = items.len(), "offline queue restored");

        Ok(Self {
            store,
            executor,
            monitor,
            entries: Mutex::new(Pending { owner, items }),
            completions: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            queue_key: config.queue_key.clone(),
            dead_letter_key: config.dead_letter_key.clone(),
            max_attempts: config.max_attempts,
            dead_letter_limit: config.dead_letter_limit,
        })
    }

    /// Returns the connectivity monitor the queue follows.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Appends `request` and persists the queue. Returns immediately.
    ///
    /// A persistence failure is logged; the mutation stays queued in
    /// memory and is written with the next successful persist.
    pub fn enqueue(&self, request: MutationRequest) -> MutationId {
        let mutation = QueuedMutation::new(request, Timestamp::now());
        let id = mutation.id.clone();

        match self.lock_pending() {
            Ok(mut pending) => {
                pending.items.push(mutation);
                self.persist_logged(&pending.items);
                tracing::debug!(%id, pending = pending.items.len(), "mutation enqueued");
            }
            Err(e) => tracing::error!(%e, %id, "failed to enqueue mutation"),
        }

        self.wake.notify_one();
        id
    }

    /// Like [`enqueue`](Self::enqueue), also returning a receiver for the
    /// mutation's final outcome.
    ///
    /// The handler is in-process only: after a reload the mutation still
    /// executes, but nobody is notified.
    pub fn enqueue_with_completion(
        &self,
        request: MutationRequest,
    ) -> (MutationId, oneshot::Receiver<MutationOutcome>) {
        let (tx, rx) = oneshot::channel();
        let mutation = QueuedMutation::new(request, Timestamp::now());
        let id = mutation.id.clone();

        if let Ok(mut completions) = self.completions.lock() {
            completions.insert(id.clone(), tx);
        }
        match self.lock_pending() {
            Ok(mut pending) => {
                pending.items.push(mutation);
                self.persist_logged(&pending.items);
            }
            Err(e) => tracing::error!(%e, %id, "failed to enqueue mutation"),
        }

        self.wake.notify_one();
        (id, rx)
    }

    /// Executes every pending mutation once, in enqueue order.
    pub async fn drain(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::AcqRel) {
            tracing::debug!("drain already in flight, skipping");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let (owner, snapshot) = match self.lock_pending() {
            Ok(mut pending) => {
                let claimed = std::mem::take(&mut pending.items);
                self.persist_logged(&pending.items);
                (pending.owner.clone(), claimed)
            }
            Err(e) => {
                tracing::error!(%e, "failed to claim pending mutations");
                return DrainReport::default();
            }
        };

        let mut report = DrainReport {
            attempted: snapshot.len(),
            ..DrainReport::default()
        };
        if snapshot.is_empty() {
            return report;
        }

        let mut retained = Vec::new();
        let mut dead = Vec::new();

        for mut mutation in snapshot {
            match self.executor.execute(&mutation).await {
                Ok(status) => {
                    report.succeeded += 1;
                    tracing::debug!(id = %mutation.id, status, "mutation executed");
                    self.complete(&mutation.id, MutationOutcome::Completed { status });
                }
                Err(e) => {
                    mutation.attempts = mutation.attempts.saturating_add(1);
                    if mutation.attempts >= self.max_attempts {
                        tracing::error!(
                            %e,
                            id = %mutation.id,
                            attempts = mutation.attempts,
                            "mutation abandoned after repeated failures"
                        );
                        self.complete(
                            &mutation.id,
                            MutationOutcome::Abandoned {
                                attempts: mutation.attempts,
                                reason: e.to_string(),
                            },
                        );
                        dead.push(mutation);
                    } else {
                        tracing::warn!(
                            %e,
                            id = %mutation.id,
                            attempts = mutation.attempts,
                            "mutation failed, re-queued"
                        );
                        retained.push(mutation);
                    }
                }
            }
        }

        report.requeued = retained.len();
        report.dead_lettered = dead.len();

        if self.store.namespace() != owner {
            tracing::warn!(
                namespace = %owner,
                requeued = retained.len(),
                dead_lettered = dead.len(),
                "namespace changed during drain, dropping failed mutations"
            );
            self.forget_completions(&retained);
            report.requeued = 0;
            return report;
        }

        // Dead letters first: the claimed mutations are no longer in the
        // persisted queue.
        if !dead.is_empty() {
            self.append_dead_letters(dead);
        }

        match self.lock_pending() {
            Ok(mut pending) if pending.owner == owner => {
                pending.items.extend(retained);
                self.persist_logged(&pending.items);
            }
            Ok(_) => {
                tracing::warn!(
                    namespace = %owner,
                    dropped = retained.len(),
                    "namespace changed during drain, dropping failed mutations"
                );
                self.forget_completions(&retained);
                report.requeued = 0;
            }
            Err(e) => tracing::error!(%e, "failed to re-queue failed mutations"),
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            "offline queue drained"
        );
        report
    }

    /// Drains only if online and something is pending.
    pub async fn drain_if_ready(&self) -> Option<DrainReport> {
        if !self.monitor.is_online() || self.is_empty() {
            return None;
        }
        Some(self.drain().await)
    }

    /// Pending count and the enqueue time of the oldest pending mutation.
    pub fn stats(&self) -> QueueStats {
        match self.lock_pending() {
            Ok(pending) => QueueStats {
                pending: pending.items.len(),
                oldest: pending.items.iter().map(|m| m.timestamp.clone()).min(),
            },
            Err(_) => QueueStats {
                pending: 0,
                oldest: None,
            },
        }
    }

    /// Snapshot of the pending mutations in queue order.
    pub fn pending(&self) -> Vec<QueuedMutation> {
        self.lock_pending()
            .map(|p| p.items.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock_pending()
            .map(|p| p.items.is_empty())
            .unwrap_or(true)
    }

    /// Discards every pending mutation without executing it.
    ///
    /// Completion handlers of discarded mutations are dropped, so their
    /// receivers observe a closed channel. Returns the number discarded.
    pub fn clear(&self) -> Result<usize> {
        let mut pending = self.lock_pending()?;
        let discarded = pending.items.len();
        pending.items.clear();
        if let Ok(mut completions) = self.completions.lock() {
            completions.clear();
        }
        self.store.set(&self.queue_key, pending.items.as_slice())?;
        tracing::info!(discarded, "offline queue cleared");
        Ok(discarded)
    }

    /// Mutations evicted after `max_attempts` failures, oldest first.
    ///
    /// At most `dead_letter_limit` are kept.
    pub fn dead_letters(&self) -> Vec<QueuedMutation> {
        self.store.get(&self.dead_letter_key, Vec::new())
    }

    /// Forgets all dead-lettered mutations.
    pub fn clear_dead_letters(&self) -> Result<()> {
        self.store.remove(&self.dead_letter_key)
    }

    /// Resolves after the next enqueue.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }

    // -- Internal ---------------------------------------------------------

    /// Locks the entries, first switching them to the current namespace
    /// if it changed since they were loaded.
    fn lock_pending(&self) -> Result<MutexGuard<'_, Pending>> {
        let mut pending = self.entries.lock().map_err(|e| VaultError::StorageError {
            reason: format!("offline queue lock poisoned: {e}"),
        })?;

        let current = self.store.namespace();
        if pending.owner != current {
            let restored: Vec<QueuedMutation> = self.store.get(&self.queue_key, Vec::new());
            let discarded = std::mem::replace(&mut pending.items, restored);
            self.forget_completions(&discarded);
            tracing::info!(
                from = %pending.owner,
                to = %current,
                discarded = discarded.len(),
                restored = pending.items.len(),
                "namespace changed, offline queue switched"
            );
            pending.owner = current;
        }
        Ok(pending)
    }

    fn persist_logged(&self, entries: &[QueuedMutation]) {
        if let Err(e) = self.store.set(&self.queue_key, entries) {
            tracing::error!(%e, pending = entries.len(), "failed to persist offline queue");
        }
    }

    fn append_dead_letters(&self, dead: Vec<QueuedMutation>) {
        let mut letters = self.dead_letters();
        letters.extend(dead);
        let overflow = letters.len().saturating_sub(self.dead_letter_limit);
        if overflow > 0 {
            letters.drain(..overflow);
            tracing::warn!(dropped = overflow, "dead-letter list full, dropped oldest");
        }
        if let Err(e) = self.store.set(&self.dead_letter_key, &letters) {
            tracing::error!(%e, "failed to persist dead letters");
        }
    }

    /// Drops completion handlers; their receivers observe a closed channel.
    fn forget_completions(&self, mutations: &[QueuedMutation]) {
        if mutations.is_empty() {
            return;
        }
        if let Ok(mut completions) = self.completions.lock() {
            for mutation in mutations {
                completions.remove(&mutation.id);
            }
        }
    }

    fn complete(&self, id: &MutationId, outcome: MutationOutcome) {
        let sender = self
            .completions
            .lock()
            .ok()
            .and_then(|mut completions| completions.remove(id));
        if let Some(tx) = sender {
            let _ = tx.send(outcome);
        }
    }
}

/// Clears the in-flight flag when a drain ends, including on panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
