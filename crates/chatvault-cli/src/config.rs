//! Profile directory and config file resolution.
//!
//! Settings come from an optional JSON config file, with defaults for
//! everything the file leaves out. CLI flags override both.

use std::path::{Path, PathBuf};

use chatvault_types::config::VaultConfig;
use serde::{Deserialize, Serialize};

/// JSON config file format.
///
/// Example `chatvault.json`:
/// ```json
/// {
///   "profile_dir": "/home/me/.chatvault",
///   "vault": { "max_attempts": 5, "primary_capacity_bytes": 1048576 }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub profile_dir: Option<String>,
    #[serde(default)]
    pub vault: VaultConfig,
}

/// Fully resolved settings with all defaults applied.
pub struct ResolvedConfig {
    pub profile_dir: PathBuf,
    pub vault: VaultConfig,
}

impl ResolvedConfig {
    /// Loads `config_path` (if any) and applies the CLI override.
    pub fn resolve(config_path: Option<&Path>, profile_dir: Option<PathBuf>) -> Result<Self, String> {
        let file = match config_path {
            Some(path) => load_file(path)?,
            None => ConfigFile::default(),
        };

        file.vault
            .validate()
            .map_err(|e| format!("invalid config: {e}"))?;

        let profile_dir = profile_dir
            .or_else(|| file.profile_dir.map(PathBuf::from))
            .unwrap_or_else(default_profile_dir);

        Ok(Self {
            profile_dir,
            vault: file.vault,
        })
    }

    /// Directory of the sled primary store.
    pub fn primary_path(&self) -> PathBuf {
        self.profile_dir.join("primary")
    }

    /// File backing the cookie jar.
    pub fn cookie_path(&self) -> PathBuf {
        self.profile_dir.join("cookies.json")
    }
}

fn load_file(path: &Path) -> Result<ConfigFile, String> {
    let text =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read config file: {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config JSON: {e}"))
}

/// Platform-specific default profile directory.
fn default_profile_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        if let Some(home) = dirs::home_dir() {
            return home.join(".chatvault");
        }
    }
    if let Some(data) = dirs::data_dir() {
        return data.join("chatvault");
    }
    PathBuf::from("chatvault-data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_dir_overrides_file() {
        let resolved = ResolvedConfig::resolve(None, Some(PathBuf::from("/tmp/p"))).unwrap();
        assert_eq!(resolved.profile_dir, PathBuf::from("/tmp/p"));
        assert_eq!(resolved.cookie_path(), PathBuf::from("/tmp/p/cookies.json"));
    }

    #[test]
    fn file_values_are_merged_with_defaults() {
        let path = std::env::temp_dir().join(format!("chatvault-cli-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "profile_dir": "/srv/cv", "vault": { "max_attempts": 4 } }"#,
        )
        .unwrap();

        let resolved = ResolvedConfig::resolve(Some(&path), None).unwrap();
        assert_eq!(resolved.profile_dir, PathBuf::from("/srv/cv"));
        assert_eq!(resolved.vault.max_attempts, 4);
        assert_eq!(resolved.vault.chunk_size, 4000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_vault_config_rejected() {
        let path = std::env::temp_dir().join(format!("chatvault-cli-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "vault": { "chunk_size": 0 } }"#).unwrap();
        assert!(ResolvedConfig::resolve(Some(&path), None).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
