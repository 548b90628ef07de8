//! Local record of sessions that were already processed.
//!
//! The ledger is one JSON object mapping session id to the epoch-millisecond
//! time it was synced. It is a fast-path skip only: losing the file means the
//! next run re-uploads everything, which the store merges by
//! `(machine_id, session_id)`.
//!
//! One ingestion process per machine is assumed, so there is no locking. The
//! whole map is rewritten on every new entry through a temp file and rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{CostError, Result};

/// Persisted set of synced session ids.
#[derive(Debug)]
pub struct SyncLedger {
    path: PathBuf,
    entries: BTreeMap<String, i64>,
}

impl SyncLedger {
    /// Load the ledger at `path`. A missing or unreadable file yields an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, i64>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ledger is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ledger yet");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ledger unreadable, starting empty");
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), sessions = entries.len(), "ledger loaded");
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_synced(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    /// When `session_id` was synced, in epoch milliseconds.
    pub fn synced_at(&self, session_id: &str) -> Option<i64> {
        self.entries.get(session_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `session_id` as synced now. Returns false if it was already present.
    pub fn mark_synced(&mut self, session_id: &str) -> Result<bool> {
        self.mark_synced_at(session_id, Utc::now().timestamp_millis())
    }

    /// Record `session_id` with an explicit timestamp. Existing entries are never changed.
    pub fn mark_synced_at(&mut self, session_id: &str, synced_at_ms: i64) -> Result<bool> {
        if self.entries.contains_key(session_id) {
            return Ok(false);
        }

        self.entries.insert(session_id.to_string(), synced_at_ms);
        if let Err(e) = self.save() {
            self.entries.remove(session_id);
            return Err(e);
        }
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CostError::Ledger(format!("creating {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string_pretty(&self.entries)?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| {
            CostError::Ledger(format!("creating {}: {}", temp_path.display(), e))
        })?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| CostError::Ledger(format!("writing {}: {}", temp_path.display(), e)))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| {
            CostError::Ledger(format!("renaming into {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let ledger = SyncLedger::load(dir.path().join("ledger.json"));
        assert!(ledger.is_empty());
        assert!(!ledger.is_synced("abc"));
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{ this is not json").unwrap();

        let ledger = SyncLedger::load(&path);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_mark_synced_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        let mut ledger = SyncLedger::load(&path);
        assert!(ledger.mark_synced_at("session-a", 1_700_000_000_000).unwrap());

        let reloaded = SyncLedger::load(&path);
        assert!(reloaded.is_synced("session-a"));
        assert_eq!(reloaded.synced_at("session-a"), Some(1_700_000_000_000));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = SyncLedger::load(&path);
        assert!(ledger.mark_synced_at("s", 1).unwrap());
        assert!(!ledger.mark_synced_at("s", 2).unwrap());
        assert_eq!(ledger.synced_at("s"), Some(1));
        assert_eq!(SyncLedger::load(&path).synced_at("s"), Some(1));
    }

    #[test]
    fn test_file_format_is_plain_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = SyncLedger::load(&path);
        ledger.mark_synced_at("b", 20).unwrap();
        ledger.mark_synced_at("a", 10).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"a": 10, "b": 20}));
    }
}
