//! Configuration of the storage tiers and the offline queue.
//!
//! All tunables are centralized here. Every value has a documented
//! default; the CLI overlays a JSON config file on top of them.

use serde::{Deserialize, Serialize};

use crate::{Result, VaultError};

/// Tunables for the tiered store, identity cookie, and offline queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Maximum bytes per secondary-store chunk record.
    ///
    /// Must leave headroom below `secondary_record_limit`.
    pub chunk_size: usize,

    /// Total key + value bytes the primary store accepts before writes
    /// fail with [`VaultError::QuotaExceeded`].
    pub primary_capacity_bytes: usize,

    /// Hard ceiling on a single secondary-store record value, in bytes.
    pub secondary_record_limit: usize,

    /// Lifetime of chunk and manifest records, in days.
    pub secondary_expiry_days: u64,

    /// Lifetime of the anonymous-identifier cookie, in days.
    pub anonymous_id_expiry_days: u64,

    /// Logical key the pending queue is persisted under.
    pub queue_key: String,

    /// Logical key evicted mutations are persisted under.
    pub dead_letter_key: String,

    /// Failed executions after which a mutation is dead-lettered.
    pub max_attempts: u32,

    /// Dead letters kept; the oldest are dropped beyond this.
    pub dead_letter_limit: usize,

    /// Seconds between periodic drain attempts while online.
    pub retry_interval_secs: u64,

    /// Per-request timeout of the HTTP executor, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            primary_capacity_bytes: 5 * 1024 * 1024,
            secondary_record_limit: 4096,
            secondary_expiry_days: 365,
            anonymous_id_expiry_days: 730,
            queue_key: "offline_queue".into(),
            dead_letter_key: "offline_queue_dead_letter".into(),
            max_attempts: 10,
            dead_letter_limit: 100,
            retry_interval_secs: 30,
            request_timeout_secs: 15,
        }
    }
}

impl VaultConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(VaultError::ConfigError {
                reason: "chunk_size must be greater than 0".into(),
            });
        }

        if self.chunk_size >= self.secondary_record_limit {
            return Err(VaultError::ConfigError {
                reason: format!(
                    "chunk_size ({}) must be below secondary_record_limit ({})",
                    self.chunk_size, self.secondary_record_limit,
                ),
            });
        }

        if self.primary_capacity_bytes == 0 {
            return Err(VaultError::ConfigError {
                reason: "primary_capacity_bytes must be greater than 0".into(),
            });
        }

        if self.secondary_expiry_days == 0 || self.anonymous_id_expiry_days == 0 {
            return Err(VaultError::ConfigError {
                reason: "cookie expiry must be at least one day".into(),
            });
        }

        if self.queue_key.is_empty() || self.dead_letter_key.is_empty() {
            return Err(VaultError::ConfigError {
                reason: "queue keys must not be empty".into(),
            });
        }

        if self.queue_key == self.dead_letter_key {
            return Err(VaultError::ConfigError {
                reason: "queue_key and dead_letter_key must differ".into(),
            });
        }

        if self.max_attempts == 0 {
            return Err(VaultError::ConfigError {
                reason: "max_attempts must be greater than 0".into(),
            });
        }

        if self.dead_letter_limit == 0 {
            return Err(VaultError::ConfigError {
                reason: "dead_letter_limit must be greater than 0".into(),
            });
        }

        if self.retry_interval_secs == 0 || self.request_timeout_secs == 0 {
            return Err(VaultError::ConfigError {
                reason: "intervals and timeouts must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
