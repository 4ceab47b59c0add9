//! Cookie-like secondary store.
//!
//! Each record carries an optional expiry and may not exceed the jar's
//! per-record size ceiling. Expired records read as absent and are
//! dropped on the next mutation. A jar is either purely in-memory or
//! mirrored to a JSON file through [`CookieFile`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chatvault_types::{Result, Timestamp, VaultError};
use serde::{Deserialize, Serialize};

use crate::backend::SecondaryStore;
use crate::cookie_file::CookieFile;

// ---------------------------------------------------------------------------
// Cookie
// ---------------------------------------------------------------------------

/// One secondary-store record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cookie {
    /// Record payload.
    pub value: String,
    /// Expiry instant; `None` lives until removed.
    pub expires: Option<Timestamp>,
}

impl Cookie {
    fn is_expired(&self, now: &Timestamp) -> bool {
        self.expires.as_ref().is_some_and(|at| at <= now)
    }
}

// ---------------------------------------------------------------------------
// CookieJar
// ---------------------------------------------------------------------------

/// Secondary store with per-record size ceiling and expiry.
pub struct CookieJar {
    cookies: Mutex<BTreeMap<String, Cookie>>,
    /// Backing file, if persistent.
    path: Option<PathBuf>,
    record_limit: usize,
}

impl CookieJar {
    /// Creates an empty, non-persistent jar.
    pub fn in_memory(record_limit: usize) -> Self {
        Self {
            cookies: Mutex::new(BTreeMap::new()),
            path: None,
            record_limit,
        }
    }

    /// Opens a jar mirrored to the JSON file at `path`.
    ///
    /// Records that expired while the process was not running are
    /// discarded on load.
    pub fn open(path: &Path, record_limit: usize) -> Result<Self> {
        let mut cookies = CookieFile::load(path)?;
        let now = Timestamp::now();
        let before = cookies.len();
        cookies.retain(|_, c| !c.is_expired(&now));
        if cookies.len() != before {
            tracing::debug!(purged = before - cookies.len(), "dropped expired cookies");
        }

        Ok(Self {
            cookies: Mutex::new(cookies),
            path: Some(path.to_path_buf()),
            record_limit,
        })
    }

    /// Expires `key` immediately.
    pub fn expire(&self, key: &str) -> Result<bool> {
        self.remove(key)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Cookie>>> {
        self.cookies.lock().map_err(|e| VaultError::StorageError {
            reason: format!("cookie jar lock poisoned: {e}"),
        })
    }

    fn persist(&self, cookies: &BTreeMap<String, Cookie>) -> Result<()> {
        match &self.path {
            Some(path) => CookieFile::save(path, cookies),
            None => Ok(()),
        }
    }
}

impl SecondaryStore for CookieJar {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let cookies = self.lock()?;
        let now = Timestamp::now();
        Ok(cookies
            .get(key)
            .filter(|c| !c.is_expired(&now))
            .map(|c| c.value.clone()))
    }

    fn set(&self, key: &str, value: &str, expires: Option<&Timestamp>) -> Result<()> {
        if value.len() > self.record_limit {
            return Err(VaultError::RecordTooLarge {
                reason: format!(
                    "record {key:?} is {} bytes, limit is {}",
                    value.len(),
                    self.record_limit
                ),
            });
        }

        let mut cookies = self.lock()?;
        let now = Timestamp::now();
        cookies.retain(|_, c| !c.is_expired(&now));
        cookies.insert(
            key.to_string(),
            Cookie {
                value: value.to_string(),
                expires: expires.cloned(),
            },
        );
        self.persist(&cookies)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut cookies = self.lock()?;
        let existed = cookies.remove(key).is_some();
        if existed {
            self.persist(&cookies)?;
        }
        Ok(existed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let cookies = self.lock()?;
        let now = Timestamp::now();
        Ok(cookies
            .iter()
            .filter(|(_, c)| !c.is_expired(&now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn record_limit(&self) -> usize {
        self.record_limit
    }
}
