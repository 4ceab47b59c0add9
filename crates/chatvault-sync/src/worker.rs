//! Background task that drains the offline queue.
//!
//! Runs a tokio select loop that drains when:
//! 1. the monitor reports a transition to online,
//! 2. a mutation is enqueued while online,
//! 3. the periodic retry tick fires while online.
//!
//! Every trigger goes through [`OfflineQueue::drain_if_ready`], so an
//! empty queue or an offline monitor makes a trigger a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::mutation::MutationExecutor;
use crate::queue::OfflineQueue;

/// Handle to a running drain task.
///
/// Constructed explicitly with [`start`](Self::start) and stopped with
/// [`dispose`](Self::dispose).
pub struct QueueWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl QueueWorker {
    /// Spawns the drain task on the current tokio runtime.
    pub fn start<E: MutationExecutor>(queue: Arc<OfflineQueue<E>>, retry_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(queue, retry_interval, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stops the task and waits for it to exit.
    ///
    /// A drain in progress finishes its current pass first.
    pub async fn dispose(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(%e, "queue worker ended abnormally");
        }
    }
}

async fn run<E: MutationExecutor>(
    queue: Arc<OfflineQueue<E>>,
    retry_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut online_rx = queue.monitor().watch();
    let mut retry_tick = tokio::time::interval(retry_interval);
    retry_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("offline queue worker started");

    loop {
        tokio::select! {
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if online {
                    queue.drain_if_ready().await;
                }
            }

            _ = queue.notified() => {
                queue.drain_if_ready().await;
            }

            // The first tick fires immediately, draining whatever a
            // previous session left behind.
            _ = retry_tick.tick() => {
                queue.drain_if_ready().await;
            }

            // A dropped handle counts as shutdown.
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("offline queue worker stopped");
}
