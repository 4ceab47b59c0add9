//! Bounded in-memory primary store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chatvault_types::{Result, VaultError};

use crate::backend::{record_size, PrimaryStore};

/// In-memory primary store with the same byte accounting as
/// [`SledStore`](crate::engine::SledStore).
pub struct MemoryStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    records: BTreeMap<String, String>,
    used: usize,
}

impl MemoryStore {
    /// Creates an empty store holding at most `capacity` key + value bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                used: 0,
            }),
            capacity,
        }
    }

    /// Bytes currently accounted against the capacity.
    pub fn used_bytes(&self) -> Result<usize> {
        Ok(self.lock()?.used)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|e| VaultError::StorageError {
            reason: format!("memory store lock poisoned: {e}"),
        })
    }
}

impl PrimaryStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let previous = inner
            .records
            .get(key)
            .map(|old| record_size(key, old))
            .unwrap_or(0);
        let next = inner
            .used
            .saturating_sub(previous)
            .saturating_add(record_size(key, value));

        if next > self.capacity {
            return Err(VaultError::QuotaExceeded {
                reason: format!(
                    "writing {key:?} needs {next} bytes, capacity is {}",
                    self.capacity
                ),
            });
        }

        inner.records.insert(key.to_string(), value.to_string());
        inner.used = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.records.remove(key) {
            Some(old) => {
                inner.used = inner.used.saturating_sub(record_size(key, &old));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.records.keys().cloned().collect())
    }
}
