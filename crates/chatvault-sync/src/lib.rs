//! Offline-resilient mutation queue for chatvault.
//!
//! Network-bound writes are submitted to the [`OfflineQueue`], which
//! persists them through the tiered store and replays them in order
//! once the [`ConnectivityMonitor`] reports the network reachable.
//! The [`QueueWorker`] ties the two together as a background task.

pub mod connectivity;
pub mod mutation;
pub mod queue;
pub mod worker;

pub use connectivity::{ConnectivityMonitor, Subscription};
pub use mutation::{
    HttpExecutor, Method, MutationExecutor, MutationOutcome, MutationRequest, QueuedMutation,
    RequestOptions,
};
pub use queue::{DrainReport, OfflineQueue, QueueStats};
pub use worker::QueueWorker;
