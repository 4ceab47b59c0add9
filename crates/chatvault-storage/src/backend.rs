//! Backend traits for the two persistence tiers.
//!
//! Both tiers are string-keyed, string-valued maps. They differ in how
//! they fail: the primary tier has a finite total capacity, the
//! secondary tier a finite size per record plus an expiry per record.

use std::sync::Arc;

use chatvault_types::{Result, Timestamp};

/// Bounded, fast key-value tier.
///
/// `set` must return [`VaultError::QuotaExceeded`] when the write would
/// exceed the store's capacity, and leave the previous value in place.
///
/// [`VaultError::QuotaExceeded`]: chatvault_types::VaultError::QuotaExceeded
pub trait PrimaryStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Returns `true` if it existed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Lists every key currently stored.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Header-based overflow tier with a per-record size ceiling.
pub trait SecondaryStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key` until `expires` (or indefinitely).
    ///
    /// Fails with [`VaultError::RecordTooLarge`] if `value` exceeds
    /// [`record_limit`](Self::record_limit).
    ///
    /// [`VaultError::RecordTooLarge`]: chatvault_types::VaultError::RecordTooLarge
    fn set(&self, key: &str, value: &str, expires: Option<&Timestamp>) -> Result<()>;

    /// Removes `key`. Returns `true` if it existed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Lists every unexpired key.
    fn keys(&self) -> Result<Vec<String>>;

    /// Maximum value size of one record, in bytes.
    fn record_limit(&self) -> usize;
}

impl<T: PrimaryStore + ?Sized> PrimaryStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}

impl<T: SecondaryStore + ?Sized> SecondaryStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, expires: Option<&Timestamp>) -> Result<()> {
        (**self).set(key, value, expires)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }

    fn record_limit(&self) -> usize {
        (**self).record_limit()
    }
}

/// Bytes a record occupies for capacity accounting.
pub(crate) fn record_size(key: &str, value: &str) -> usize {
    key.len().saturating_add(value.len())
}

/// Deletes every record in both tiers whose key starts with `prefix`.
///
/// Returns the number of records removed. Both tiers are attempted even
/// if the first fails; the first error is returned after both ran.
pub(crate) fn purge_prefix(
    primary: &dyn PrimaryStore,
    secondary: &dyn SecondaryStore,
    prefix: &str,
) -> Result<usize> {
    let mut removed = 0usize;
    let mut first_err = None;

    match primary.keys() {
        Ok(keys) => {
            for key in keys.iter().filter(|k| k.starts_with(prefix)) {
                match primary.remove(key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        Err(e) => {
            first_err.get_or_insert(e);
        }
    }

    match secondary.keys() {
        Ok(keys) => {
            for key in keys.iter().filter(|k| k.starts_with(prefix)) {
                match secondary.remove(key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        Err(e) => {
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}
