//! Process-wide belief about network reachability.
//!
//! The host feeds reachability transitions into
//! [`ConnectivityMonitor::set_online`]. Listeners registered with
//! [`subscribe`](ConnectivityMonitor::subscribe) run synchronously, in
//! subscription order, on every transition. Async consumers use
//! [`watch`](ConnectivityMonitor::watch) instead.
//!
//! The monitor knows nothing about the queue; the queue's worker
//! subscribes like any other consumer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    state: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Tracks reachability and notifies subscribers of transitions.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Creates a monitor seeded with the platform's current signal.
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current reachability belief.
    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Records a reachability signal from the host.
    ///
    /// Only transitions notify: repeating the current state is a no-op.
    /// A panicking listener is logged and does not stop the remaining
    /// listeners.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if !changed {
            return;
        }

        tracing::info!(online, "connectivity changed");

        let listeners: Vec<(u64, Listener)> = match self.inner.listeners.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!(%e, "connectivity listener registry poisoned");
                return;
            }
        };

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(online))).is_err() {
                tracing::warn!(listener = id, "connectivity listener panicked");
            }
        }
    }

    /// Registers `listener`; it stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.listeners.lock() {
            Ok(mut guard) => guard.push((id, Arc::new(listener))),
            Err(e) => tracing::error!(%e, "connectivity listener registry poisoned"),
        }
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|g| g.len()).unwrap_or(0)
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    /// Removes the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            if let Ok(mut guard) = inner.listeners.lock() {
                guard.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
