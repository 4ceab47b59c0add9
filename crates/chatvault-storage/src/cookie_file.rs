//! File persistence for the cookie jar.
//!
//! The jar is stored as a single JSON file. All writes are atomic:
//! serialize → write tmp → fsync → rename.
//!
//! # File Format
//!
//! ```text
//! { "<key>": { "value": "<string>", "expires": "<rfc3339>" | null }, ... }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chatvault_types::{Result, VaultError};

use crate::cookie_jar::Cookie;

/// JSON file I/O for the cookie map.
pub struct CookieFile;

impl CookieFile {
    /// Loads cookies from `path`.
    ///
    /// A missing or empty file yields an empty map. A file that exists
    /// but does not parse is an error.
    pub fn load(path: &Path) -> Result<BTreeMap<String, Cookie>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let raw = fs::read(path).map_err(|e| VaultError::StorageError {
            reason: format!("failed to read cookie file: {e}"),
        })?;

        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_slice(&raw).map_err(|e| VaultError::SerializationError {
            reason: format!("failed to parse cookie file: {e}"),
        })
    }

    /// Saves cookies to `path` atomically.
    ///
    /// If any step fails, the original file is untouched.
    pub fn save(path: &Path, cookies: &BTreeMap<String, Cookie>) -> Result<()> {
        let output = serde_json::to_vec(cookies).map_err(|e| VaultError::SerializationError {
            reason: format!("failed to serialize cookies: {e}"),
        })?;

        let tmp_path = Self::tmp_path(path)?;

        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| VaultError::StorageError {
                reason: format!("failed to create temp cookie file: {e}"),
            })?;

            file.write_all(&output)
                .map_err(|e| VaultError::StorageError {
                    reason: format!("failed to write temp cookie file: {e}"),
                })?;

            file.sync_all().map_err(|e| VaultError::StorageError {
                reason: format!("failed to fsync temp cookie file: {e}"),
            })?;
        }

        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            VaultError::StorageError {
                reason: format!("failed to rename temp cookie file: {e}"),
            }
        })?;

        Ok(())
    }

    /// Temporary file path in the same directory as `path`.
    fn tmp_path(path: &Path) -> Result<PathBuf> {
        let parent = path.parent().ok_or_else(|| VaultError::StorageError {
            reason: "cookie file path has no parent directory".into(),
        })?;

        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| VaultError::StorageError {
                reason: format!("failed to create cookie file directory: {e}"),
            })?;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cookies.json");

        Ok(parent.join(format!(".{file_name}.tmp")))
    }
}
