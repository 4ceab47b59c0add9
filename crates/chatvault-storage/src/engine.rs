//! Durable primary store backed by sled.
//!
//! The [`SledStore`] owns the sled database and a single `primary`
//! tree. On [`open`](SledStore::open) it opens the database, creates
//! the tree, and sums the size of every existing record so the byte
//! capacity survives restarts.

use std::path::Path;
use std::sync::Mutex;

use chatvault_types::{Result, VaultError};

use crate::backend::{record_size, PrimaryStore};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Name of the sled tree holding primary records.
const PRIMARY_TREE: &str = "primary";

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Bounded primary store backed by sled.
///
/// Keys and values are stored as UTF-8 bytes. Writes that would push the
/// total key + value size above the capacity fail with
/// [`VaultError::QuotaExceeded`] and leave the tree untouched.
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
    capacity: usize,
    /// Bytes in use. Held locked across the check-then-insert of `set`.
    used: Mutex<usize>,
}

impl SledStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// - [`VaultError::ConfigError`] if `capacity` is zero.
    /// - [`VaultError::StorageError`] if the database cannot be opened
    ///   or an existing record cannot be read.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(VaultError::ConfigError {
                reason: "primary store capacity must be greater than 0".into(),
            });
        }

        let db = sled::open(path).map_err(|e| VaultError::StorageError {
            reason: format!("failed to open sled database: {e}"),
        })?;

        let tree = db
            .open_tree(PRIMARY_TREE)
            .map_err(|e| VaultError::StorageError {
                reason: format!("failed to open tree '{PRIMARY_TREE}': {e}"),
            })?;

        let mut used = 0usize;
        for item in tree.iter() {
            let (k, v) = item.map_err(|e| VaultError::StorageError {
                reason: format!("sled iteration failed: {e}"),
            })?;
            used = used.saturating_add(k.len()).saturating_add(v.len());
        }

        tracing::debug!(path = %path.display(), used, capacity, "primary store opened");

        Ok(Self {
            db,
            tree,
            capacity,
            used: Mutex::new(used),
        })
    }

    /// Flushes all pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageError`] if the flush fails.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| VaultError::StorageError {
            reason: format!("failed to flush database: {e}"),
        })?;
        Ok(())
    }

    /// Bytes currently accounted against the capacity.
    pub fn used_bytes(&self) -> Result<usize> {
        Ok(*self.lock_used()?)
    }

    fn lock_used(&self) -> Result<std::sync::MutexGuard<'_, usize>> {
        self.used.lock().map_err(|e| VaultError::StorageError {
            reason: format!("primary store lock poisoned: {e}"),
        })
    }
}

impl PrimaryStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let raw = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| VaultError::StorageError {
                reason: format!("sled get failed: {e}"),
            })?;

        match raw {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| VaultError::StorageError {
                    reason: format!("stored value for {key:?} is not UTF-8: {e}"),
                }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut used = self.lock_used()?;

        let previous = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| VaultError::StorageError {
                reason: format!("sled get failed: {e}"),
            })?
            .map(|old| key.len().saturating_add(old.len()))
            .unwrap_or(0);
        let next = used
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

        self.tree
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| VaultError::StorageError {
                reason: format!("sled insert failed: {e}"),
            })?;
        *used = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut used = self.lock_used()?;
        let prev = self
            .tree
            .remove(key.as_bytes())
            .map_err(|e| VaultError::StorageError {
                reason: format!("sled remove failed: {e}"),
            })?;

        match prev {
            Some(old) => {
                *used = used.saturating_sub(key.len().saturating_add(old.len()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.tree.iter().keys() {
            let k = item.map_err(|e| VaultError::StorageError {
                reason: format!("sled iteration failed: {e}"),
            })?;
            match String::from_utf8(k.to_vec()) {
                Ok(s) => keys.push(s),
                Err(_) => tracing::warn!("skipping non UTF-8 key in primary store"),
            }
        }
        Ok(keys)
    }
}
