// SPDX-License-Identifier: MIT

//! Durable sidecar of every non-externally-unmanaged runtime's config.
//!
//! Writes are atomic (tmp-then-rename), and a corrupt file encountered
//! during the startup scan is skipped with a warning rather than aborting
//! the scan. One file per runtime, named `<name>.json`, holding a
//! pretty-printed [`RuntimeConfig`].

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use sl_core::model::{ExternalKind, RuntimeConfig};

use crate::sanitize::{validate_name, SanitizeError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config at {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Reads and writes one JSON config file per runtime under `dir`.
pub struct PersistenceStore {
    dir: PathBuf,
}

impl PersistenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Pretty-print a config to JSON text.
    pub fn format_pretty(config: &RuntimeConfig) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(config)
    }

    /// Parse a config from JSON text.
    pub fn parse(text: &str) -> Result<RuntimeConfig, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Snapshot a live runtime's config as the form that would be persisted,
    /// forcing `was_running` false for unmanaged-external runtimes (an
    /// operator-attached pid is never auto-resumed on daemon restart).
    pub fn read_from_runtime(&self, config: &RuntimeConfig, currently_running: bool) -> RuntimeConfig {
        let mut snapshot = config.clone();
        snapshot.was_running = match snapshot.external {
            Some(ExternalKind::Attached) => false,
            _ => currently_running,
        };
        snapshot
    }

    /// Atomically write `config` to `<name>.json`: write `<name>.json.tmp`,
    /// fsync it, then rename over the final path.
    pub fn save(&self, config: &RuntimeConfig) -> Result<(), StoreError> {
        let path = self.path_for(&config.name)?;
        let tmp_path = path.with_extension("json.tmp");
        let json = Self::format_pretty(config).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;

        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let write_result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })();

        write_result.map_err(|source| StoreError::Io { path, source })
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Patch the `was_running` field in place as a textual substring
    /// replacement, avoiding a full parse+reserialize round-trip for the
    /// hot path (invoked on every start/stop).
    pub fn set_was_running(&self, name: &str, running: bool) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let patched = match patch_was_running_field(&text, running) {
            Some(patched) => patched,
            None => {
                // Fall back to a full parse+reserialize if the textual patch
                // can't find the field (e.g. hand-edited file).
                let mut config: RuntimeConfig = Self::parse(&text).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?;
                config.was_running = running;
                Self::format_pretty(&config).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
        };

        let tmp_path = path.with_extension("json.tmp");
        let write_result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(patched.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })();
        write_result.map_err(|source| StoreError::Io { path, source })
    }

    /// Scan the store directory for `*.json` files; skip-and-warn on any
    /// that fail to parse rather than aborting the whole load.
    pub fn load_all(&self) -> Vec<RuntimeConfig> {
        let mut configs = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return configs,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            if !is_json {
                continue;
            }

            match std::fs::read_to_string(&path) {
                Ok(text) => match Self::parse(&text) {
                    Ok(config) => configs.push(config),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping corrupt runtime config");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read runtime config");
                }
            }
        }

        configs
    }
}

/// Find `"was_running": <bool>` in serde_json's pretty-printed output and
/// replace just the boolean token. Returns `None` if the field isn't found
/// in the expected shape.
fn patch_was_running_field(text: &str, running: bool) -> Option<String> {
    let key = "\"was_running\":";
    let key_pos = text.find(key)?;
    let value_start = key_pos + key.len();
    let rest = &text[value_start..];
    let value_text_len = if rest.trim_start().starts_with("true") {
        rest.find("true")? + 4
    } else if rest.trim_start().starts_with("false") {
        rest.find("false")? + 5
    } else {
        return None;
    };

    let mut out = String::with_capacity(text.len() + 1);
    out.push_str(&text[..value_start]);
    let prefix_ws = &rest[..rest.len() - rest.trim_start().len()];
    out.push_str(prefix_ws);
    out.push_str(if running { "true" } else { "false" });
    out.push_str(&rest[value_text_len..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    fn temp_store() -> (tempfile::TempDir, PersistenceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn save_then_load_all_round_trips() {
        let (_dir, store) = temp_store();
        let config = RuntimeConfig::new("web", RuntimeKind::Server);
        store.save(&config).unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "web");
        assert_eq!(loaded[0].id, config.id);
    }

    #[test]
    fn save_is_atomic_no_tmp_file_left_behind() {
        let (_dir, store) = temp_store();
        let config = RuntimeConfig::new("web", RuntimeKind::Server);
        store.save(&config).unwrap();
        assert!(!store.dir().join("web.json.tmp").exists());
        assert!(store.dir().join("web.json").exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, store) = temp_store();
        let config = RuntimeConfig::new("web", RuntimeKind::Server);
        store.save(&config).unwrap();
        store.remove("web").unwrap();
        assert!(store.remove("web").is_ok());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn set_was_running_patches_in_place() {
        let (_dir, store) = temp_store();
        let mut config = RuntimeConfig::new("web", RuntimeKind::Server);
        config.was_running = false;
        store.save(&config).unwrap();

        store.set_was_running("web", true).unwrap();
        let loaded = store.load_all();
        assert!(loaded[0].was_running);
    }

    #[test]
    fn set_was_running_on_missing_runtime_is_a_noop() {
        let (_dir, store) = temp_store();
        assert!(store.set_was_running("ghost", true).is_ok());
    }

    #[test]
    fn attached_external_is_forced_to_not_running_on_snapshot() {
        let (_dir, store) = temp_store();
        let mut config = RuntimeConfig::new("legacy", RuntimeKind::Server);
        config.external = Some(ExternalKind::Attached);

        let snapshot = store.read_from_runtime(&config, true);
        assert!(!snapshot.was_running);
    }

    #[test]
    fn managed_external_keeps_running_flag() {
        let (_dir, store) = temp_store();
        let mut config = RuntimeConfig::new("worker", RuntimeKind::Server);
        config.external = Some(ExternalKind::Managed);

        let snapshot = store.read_from_runtime(&config, true);
        assert!(snapshot.was_running);
    }

    #[test]
    fn corrupt_file_is_skipped_not_fatal() {
        let (_dir, store) = temp_store();
        let config = RuntimeConfig::new("good", RuntimeKind::Server);
        store.save(&config).unwrap();
        std::fs::write(store.dir().join("bad.json"), b"{not json").unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "good");
    }

    #[test]
    fn rejects_unsafe_names() {
        let (_dir, store) = temp_store();
        let mut config = RuntimeConfig::new("../escape", RuntimeKind::Server);
        config.name = "../escape".to_string();
        assert!(store.save(&config).is_err());
    }
}
