//! Core shared types for the chatvault persistence layer.
//!
//! This crate defines the types used across the workspace: the actor
//! [`Namespace`], queued mutation identifiers, timestamps, and the
//! central [`VaultError`]. Backends and the offline queue depend on it;
//! it depends on nothing in the workspace.

pub mod config;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// Prefix of namespaces derived from a credential token.
pub const USER_PREFIX: &str = "user";

/// Prefix of namespaces derived from the anonymous-identifier cookie.
pub const ANONYMOUS_PREFIX: &str = "anonymous";

/// Which kind of actor a [`Namespace`] partitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// Derived from a possessed credential token.
    User,
    /// Derived from the long-lived anonymous identifier.
    Anonymous,
}

impl NamespaceKind {
    /// Returns the textual prefix used for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => USER_PREFIX,
            Self::Anonymous => ANONYMOUS_PREFIX,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Partition key isolating one actor's persisted data from another's.
///
/// Always of the form `user_<subject>` or `anonymous_<id>`. Records are
/// stored under `<namespace>:<logical key>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Builds the namespace of an authenticated actor.
    pub fn user(subject: &str) -> Self {
        Self(format!("{USER_PREFIX}_{subject}"))
    }

    /// Builds the namespace of an anonymous actor.
    pub fn anonymous(id: &str) -> Self {
        Self(format!("{ANONYMOUS_PREFIX}_{id}"))
    }

    /// Returns the namespace string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the actor kind encoded in the prefix.
    pub fn kind(&self) -> NamespaceKind {
        if self.0.starts_with(ANONYMOUS_PREFIX) {
            NamespaceKind::Anonymous
        } else {
            NamespaceKind::User
        }
    }

    /// Returns `true` for anonymous namespaces.
    pub fn is_anonymous(&self) -> bool {
        self.kind() == NamespaceKind::Anonymous
    }

    /// Qualifies a logical key with this namespace: `<namespace>:<key>`.
    pub fn scoped_key(&self, logical_key: &str) -> String {
        format!("{}:{logical_key}", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = [USER_PREFIX, ANONYMOUS_PREFIX].iter().any(|prefix| {
            s.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|id| !id.is_empty())
        });
        if !valid {
            return Err(VaultError::IdentityError {
                reason: format!("not a namespace: {s:?}"),
            });
        }
        Ok(Self(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MutationId
// ---------------------------------------------------------------------------

/// Identifier assigned to a queued mutation at enqueue time.
///
/// Formatted as `<unix millis>-<16 hex chars>`; the random suffix keeps
/// ids unique when several mutations are enqueued in the same
/// millisecond.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(String);

impl MutationId {
    /// Generates a fresh identifier stamped with `now`.
    pub fn generate(now: &Timestamp) -> Self {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        Self(format!("{}-{}", now.as_millis(), hex::encode(suffix)))
    }

    /// Returns the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MutationId {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VaultError::SerializationError {
                reason: "mutation id must not be empty".into(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC timestamp, serialized in RFC 3339 form.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` representing the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a `Timestamp` from a `DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Returns this timestamp shifted forward by `days`.
    pub fn plus_days(&self, days: u64) -> Self {
        let days = i64::try_from(days).unwrap_or(i64::MAX);
        let shifted = chrono::Duration::try_days(days)
            .and_then(|d| self.0.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(shifted)
    }

    /// Returns the timestamp as an RFC 3339 string.
    pub fn as_str(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| VaultError::SerializationError {
                reason: format!("invalid RFC 3339 timestamp: {e}"),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }
}

// ---------------------------------------------------------------------------
// VaultError
// ---------------------------------------------------------------------------

/// Central error type for the chatvault workspace.
///
/// Backends and the queue convert their internal failures into variants
/// of this enum. Most variants are recovered inside the tiered store and
/// the queue and never reach application callers.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A backend read, write, or delete failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// The primary store refused a write because its capacity is exhausted.
    #[error("storage quota exceeded: {reason}")]
    QuotaExceeded {
        /// Human-readable description including sizes.
        reason: String,
    },

    /// A secondary-store record exceeds the per-record size ceiling.
    #[error("record too large: {reason}")]
    RecordTooLarge {
        /// Human-readable description including sizes.
        reason: String,
    },

    /// A value could not be encoded to or decoded from JSON.
    #[error("serialization error: {reason}")]
    SerializationError {
        /// Human-readable description of the encoding failure.
        reason: String,
    },

    /// A queued mutation could not be executed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable description of the network failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// A credential token or namespace string is malformed.
    #[error("identity error: {reason}")]
    IdentityError {
        /// Human-readable description of the identity failure.
        reason: String,
    },
}

impl VaultError {
    /// Returns `true` if this error signals an exhausted primary store.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`VaultError`].
pub type Result<T> = std::result::Result<T, VaultError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
