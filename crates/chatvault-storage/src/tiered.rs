//! Namespaced get/set/remove over the primary and secondary tiers.
//!
//! A value is written to the primary store as one record under
//! `<namespace>:<key>`. If the primary store refuses the write, the
//! serialized value is split into chunk records `<full key>:<i>` in the
//! secondary store, followed by a manifest record `<full key>:chunks`
//! holding the chunk count.
//!
//! # Layout resolution
//!
//! Every read resolves one [`EntryLayout`] per key. The inline record
//! always wins; chunks are consulted only when no inline record exists.
//! A chunked entry is visible only when its manifest and every chunk it
//! names are present.
//!
//! # Write order
//!
//! Chunked: removal of the old manifest, then chunks, then the new
//! manifest, then removal of the stale inline record and of chunks
//! beyond the new count. A failed chunk write leaves no manifest, so
//! the entry reads as absent rather than as a mix of old and new chunks.
//!
//! Inline: the record, then removal of any stale chunked representation.

use std::sync::Arc;

use chatvault_types::config::VaultConfig;
use chatvault_types::{Namespace, Result, Timestamp, VaultError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{purge_prefix, PrimaryStore, SecondaryStore};
use crate::identity::IdentityResolver;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Suffix of the manifest record of a chunked entry.
const MANIFEST_SUFFIX: &str = "chunks";

// ---------------------------------------------------------------------------
// EntryLayout
// ---------------------------------------------------------------------------

/// Physical representation of one stored entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryLayout {
    /// One primary-store record holding the serialized value.
    Inline(String),
    /// A manifest naming this many secondary-store chunks.
    Chunked {
        /// Number of chunk records.
        chunks: usize,
    },
}

// ---------------------------------------------------------------------------
// TieredStore
// ---------------------------------------------------------------------------

/// User-scoped JSON store with chunked overflow.
///
/// All operations qualify keys with the namespace the
/// [`IdentityResolver`] returns at call time.
pub struct TieredStore {
    primary: Arc<dyn PrimaryStore>,
    secondary: Arc<dyn SecondaryStore>,
    identity: IdentityResolver,
    chunk_size: usize,
    chunk_expiry_days: u64,
}

impl TieredStore {
    /// Creates a store over the two tiers.
    ///
    /// # Errors
    ///
    /// [`VaultError::ConfigError`] if `config` is invalid or its chunk
    /// size does not fit the secondary store's record limit.
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        secondary: Arc<dyn SecondaryStore>,
        config: &VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        if config.chunk_size > secondary.record_limit() {
            return Err(VaultError::ConfigError {
                reason: format!(
                    "chunk_size ({}) exceeds the secondary record limit ({})",
                    config.chunk_size,
                    secondary.record_limit()
                ),
            });
        }

        let identity = IdentityResolver::new(
            Arc::clone(&primary),
            Arc::clone(&secondary),
            config.anonymous_id_expiry_days,
        );

        Ok(Self {
            primary,
            secondary,
            identity,
            chunk_size: config.chunk_size,
            chunk_expiry_days: config.secondary_expiry_days,
        })
    }

    /// Returns the identity resolver used for key qualification.
    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    /// Returns the current actor's namespace.
    pub fn namespace(&self) -> Namespace {
        self.identity.resolve()
    }

    /// Returns the physical key `<namespace>:<key>` for the current actor.
    pub fn scoped_key(&self, logical_key: &str) -> String {
        self.namespace().scoped_key(logical_key)
    }

    // -- Public API -------------------------------------------------------

    /// Serializes `value` and stores it under `logical_key`.
    ///
    /// Falls back to the chunked secondary tier when the primary store
    /// refuses the write.
    ///
    /// # Errors
    ///
    /// - [`VaultError::SerializationError`] if `value` cannot be encoded.
    /// - The secondary-tier error if both tiers refuse the write.
    pub fn set<T: Serialize + ?Sized>(&self, logical_key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|e| VaultError::SerializationError {
            reason: format!("failed to serialize value for {logical_key:?}: {e}"),
        })?;
        let full_key = self.scoped_key(logical_key);

        match self.primary.set(&full_key, &raw) {
            Ok(()) => {
                self.drop_chunked(&full_key);
                Ok(())
            }
            Err(e) => {
                if e.is_quota_exceeded() {
                    tracing::debug!(key = %full_key, bytes = raw.len(), "primary store full, writing chunks");
                } else {
                    tracing::warn!(%e, key = %full_key, "primary write failed, writing chunks");
                }
                self.write_chunked(&full_key, &raw).inspect_err(|e| {
                    tracing::error!(%e, key = %full_key, "both storage tiers refused the write");
                })
            }
        }
    }

    /// Reads and deserializes `logical_key`, or returns `default`.
    ///
    /// Missing chunks, an unreadable manifest, and malformed JSON all
    /// yield `default`.
    pub fn get<T: DeserializeOwned>(&self, logical_key: &str, default: T) -> T {
        self.try_get(logical_key).unwrap_or(default)
    }

    /// Reads and deserializes `logical_key`, or returns `None`.
    pub fn try_get<T: DeserializeOwned>(&self, logical_key: &str) -> Option<T> {
        let full_key = self.scoped_key(logical_key);
        let raw = self.read(&full_key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(%e, key = %full_key, "stored value does not deserialize, treating as absent");
                None
            }
        }
    }

    /// Returns `true` if a complete entry exists for `logical_key`.
    pub fn contains(&self, logical_key: &str) -> bool {
        self.read(&self.scoped_key(logical_key)).is_some()
    }

    /// Resolves the physical layout of `logical_key`, if any.
    pub fn layout(&self, logical_key: &str) -> Option<EntryLayout> {
        self.locate(&self.scoped_key(logical_key))
    }

    /// Deletes `logical_key` from both tiers.
    ///
    /// Both tiers are attempted; the first backend error is returned.
    pub fn remove(&self, logical_key: &str) -> Result<()> {
        let full_key = self.scoped_key(logical_key);
        let inline = self.primary.remove(&full_key);
        let chunked = self.remove_chunked(&full_key);
        inline?;
        chunked
    }

    /// Deletes every record in both tiers whose key starts with
    /// `<namespace>_`.
    ///
    /// Passing a namespace kind (`"anonymous"`, `"user"`) clears every
    /// actor of that kind. Returns the number of records removed.
    pub fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let removed = purge_prefix(
            self.primary.as_ref(),
            self.secondary.as_ref(),
            &format!("{namespace}_"),
        )?;
        tracing::info!(namespace, removed, "cleared namespace");
        Ok(removed)
    }

    /// Deletes every record of the current actor's own namespace.
    pub fn clear_current(&self) -> Result<usize> {
        let namespace = self.namespace();
        let removed = purge_prefix(
            self.primary.as_ref(),
            self.secondary.as_ref(),
            &format!("{namespace}:"),
        )?;
        tracing::info!(%namespace, removed, "cleared current namespace");
        Ok(removed)
    }

    // -- Layout -----------------------------------------------------------

    fn locate(&self, full_key: &str) -> Option<EntryLayout> {
        match self.primary.get(full_key) {
            Ok(Some(raw)) => return Some(EntryLayout::Inline(raw)),
            Ok(None) => {}
            Err(e) => tracing::warn!(%e, key = %full_key, "primary read failed, trying chunks"),
        }
        self.read_manifest(full_key)
            .map(|chunks| EntryLayout::Chunked { chunks })
    }

    fn read(&self, full_key: &str) -> Option<String> {
        match self.locate(full_key)? {
            EntryLayout::Inline(raw) => Some(raw),
            EntryLayout::Chunked { chunks } => self.reassemble(full_key, chunks),
        }
    }

    fn read_manifest(&self, full_key: &str) -> Option<usize> {
        let raw = match self.secondary.get(&manifest_key(full_key)) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(%e, key = %full_key, "manifest read failed");
                return None;
            }
        };
        match raw.trim().parse::<usize>() {
            Ok(chunks) => Some(chunks),
            Err(e) => {
                tracing::warn!(%e, key = %full_key, manifest = %raw, "malformed chunk manifest");
                None
            }
        }
    }

    fn reassemble(&self, full_key: &str, chunks: usize) -> Option<String> {
        let mut out = String::with_capacity(chunks.saturating_mul(self.chunk_size));
        for index in 0..chunks {
            match self.secondary.get(&chunk_key(full_key, index)) {
                Ok(Some(part)) => out.push_str(&part),
                Ok(None) => {
                    tracing::warn!(key = %full_key, index, chunks, "chunk missing, treating entry as absent");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(%e, key = %full_key, index, "chunk read failed");
                    return None;
                }
            }
        }
        Some(out)
    }

    // -- Writes -----------------------------------------------------------

    fn write_chunked(&self, full_key: &str, raw: &str) -> Result<()> {
        let parts = split_chunks(raw, self.chunk_size);
        let previous = self.read_manifest(full_key).unwrap_or(0);
        let expires = Timestamp::now().plus_days(self.chunk_expiry_days);

        // The old manifest must be gone before any chunk it names is
        // overwritten, so a partial write reads as absent.
        self.secondary.remove(&manifest_key(full_key))?;

        for (index, part) in parts.iter().enumerate() {
            if let Err(e) = self
                .secondary
                .set(&chunk_key(full_key, index), part, Some(&expires))
            {
                self.drop_chunks(full_key, 0..parts.len().max(previous));
                return Err(e);
            }
        }
        if let Err(e) =
            self.secondary
                .set(&manifest_key(full_key), &parts.len().to_string(), Some(&expires))
        {
            self.drop_chunks(full_key, 0..parts.len().max(previous));
            return Err(e);
        }

        // A stale inline record would shadow the chunks on read.
        self.primary.remove(full_key)?;

        self.drop_chunks(full_key, parts.len()..previous);

        tracing::debug!(key = %full_key, chunks = parts.len(), "wrote chunked entry");
        Ok(())
    }

    /// Best-effort removal of chunk records no manifest names.
    fn drop_chunks(&self, full_key: &str, indices: std::ops::Range<usize>) {
        for index in indices {
            if let Err(e) = self.secondary.remove(&chunk_key(full_key, index)) {
                tracing::warn!(%e, key = %full_key, index, "failed to drop orphaned chunk");
            }
        }
    }

    /// Best-effort removal after a successful inline write.
    fn drop_chunked(&self, full_key: &str) {
        if let Err(e) = self.remove_chunked(full_key) {
            tracing::warn!(%e, key = %full_key, "failed to drop stale chunks");
        }
    }

    /// Removes the manifest first so a partial removal reads as absent.
    fn remove_chunked(&self, full_key: &str) -> Result<()> {
        let Some(chunks) = self.read_manifest(full_key) else {
            return Ok(());
        };
        self.secondary.remove(&manifest_key(full_key))?;

        let mut first_err = None;
        for index in 0..chunks {
            if let Err(e) = self.secondary.remove(&chunk_key(full_key, index)) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Key and chunk helpers
// ---------------------------------------------------------------------------

/// `<full key>:<index>`
pub fn chunk_key(full_key: &str, index: usize) -> String {
    format!("{full_key}:{index}")
}

/// `<full key>:chunks`
pub fn manifest_key(full_key: &str) -> String {
    format!("{full_key}:{MANIFEST_SUFFIX}")
}

/// Splits `raw` into pieces of at most `max_bytes`, never inside a
/// UTF-8 sequence.
pub fn split_chunks(raw: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(4);
    let mut parts = Vec::with_capacity(raw.len() / max_bytes + 1);
    let mut start = 0;
    while start < raw.len() {
        let mut end = (start + max_bytes).min(raw.len());
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        parts.push(&raw[start..end]);
        start = end;
    }
    parts
}
