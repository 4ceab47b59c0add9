//! Opens the stores and queue of one profile directory.

use std::sync::Arc;
use std::time::Duration;

use chatvault_storage::{CookieJar, SledStore, TieredStore};
use chatvault_sync::{ConnectivityMonitor, HttpExecutor, OfflineQueue};

use crate::config::ResolvedConfig;

/// Everything a command needs, opened from one profile.
pub struct Session {
    pub store: Arc<TieredStore>,
    pub queue: OfflineQueue<HttpExecutor>,
    primary: Arc<SledStore>,
}

impl Session {
    /// Opens the profile. `online` seeds the connectivity monitor.
    pub fn open(config: &ResolvedConfig, online: bool) -> Result<Self, String> {
        std::fs::create_dir_all(&config.profile_dir)
            .map_err(|e| format!("failed to create profile directory: {e}"))?;

        let vault = &config.vault;
        let primary = Arc::new(
            SledStore::open(&config.primary_path(), vault.primary_capacity_bytes)
                .map_err(|e| e.to_string())?,
        );
        let secondary = Arc::new(
            CookieJar::open(&config.cookie_path(), vault.secondary_record_limit)
                .map_err(|e| e.to_string())?,
        );
        let store = Arc::new(
            TieredStore::new(primary.clone(), secondary, vault).map_err(|e| e.to_string())?,
        );

        let executor = HttpExecutor::new(Duration::from_secs(vault.request_timeout_secs))
            .map_err(|e| e.to_string())?;
        let monitor = ConnectivityMonitor::new(online);
        let queue = OfflineQueue::open(Arc::clone(&store), executor, monitor, vault)
            .map_err(|e| e.to_string())?;

        tracing::debug!(
            profile = %config.profile_dir.display(),
            namespace = %store.namespace(),
            online,
            "session opened"
        );

        Ok(Self {
            store,
            queue,
            primary,
        })
    }

    /// Flushes the primary store to disk.
    pub fn close(self) -> Result<(), String> {
        self.primary.flush().map_err(|e| e.to_string())
    }
}
