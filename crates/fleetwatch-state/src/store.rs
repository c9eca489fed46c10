//! SnapshotStore: redb-backed persistence for group snapshots.
//!
//! Holds exactly one JSON-serialized `GroupSnapshot` per group name. Saves
//! overwrite the whole record in one write transaction; loads fall back to
//! a blank snapshot when nothing usable is stored. The store supports both
//! on-disk and in-memory backends (the latter for testing).
//!
//! redb takes an exclusive lock on the database file while it is open, so
//! two processes cannot hold the same store at once. Keeping one file per
//! group turns that into the per-group single-flight guarantee the engine
//! relies on. A file that is not a redb database at all is moved aside by
//! `open_or_reset`, so a damaged file means a cold start rather than a
//! group that can never run again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe snapshot store backed by redb.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
    /// Maximum history entries written per snapshot. `None` keeps all.
    history_limit: Option<usize>,
}

impl SnapshotStore {
    /// Open (or create) a persistent snapshot store at the given path.
    ///
    /// Fails with `StateError::Locked` while another process has it open.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path)?;
        let store = Self {
            db: Arc::new(db),
            history_limit: None,
        };
        store.ensure_tables()?;
        debug!(?path, "snapshot store opened");
        Ok(store)
    }

    /// Like `open`, but a damaged file is renamed to `<path>.corrupt` and
    /// replaced with an empty store.
    pub fn open_or_reset(path: &Path) -> StateResult<Self> {
        match Self::open(path) {
            Err(StateError::Corrupt(reason)) => {
                let aside = corrupt_path(path);
                warn!(?path, ?aside, %reason, "state file damaged, starting cold");
                std::fs::rename(path, &aside).map_err(map_err!(Open))?;
                Self::open(path)
            }
            other => other,
        }
    }

    /// Create an ephemeral in-memory snapshot store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            history_limit: None,
        };
        store.ensure_tables()?;
        debug!("in-memory snapshot store opened");
        Ok(store)
    }

    /// Cap the history length of every snapshot written from now on.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Load the previous snapshot for a group.
    ///
    /// Returns a blank snapshot when the group has never been stored or
    /// its record cannot be decoded. Only storage-level failures are errors.
    pub fn load(&self, group: &str) -> StateResult<GroupSnapshot> {
        match self.get(group) {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => {
                debug!(%group, "no previous snapshot, cold start");
                Ok(GroupSnapshot::blank(group))
            }
            Err(StateError::Deserialize(reason)) => {
                warn!(%group, %reason, "previous snapshot unreadable, cold start");
                Ok(GroupSnapshot::blank(group))
            }
            Err(e) => Err(e),
        }
    }

    /// Get the stored snapshot for a group, failing on undecodable records.
    pub fn get(&self, group: &str) -> StateResult<Option<GroupSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        match table.get(group).map_err(map_err!(Read))? {
            Some(guard) => {
                let snapshot: GroupSnapshot =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Replace the stored snapshot for `snapshot.group_name`.
    ///
    /// History is trimmed to the store's limit before writing.
    pub fn save(&self, snapshot: &GroupSnapshot) -> StateResult<()> {
        let value = match self.history_limit {
            Some(limit) if snapshot.history.len() > limit => {
                let mut trimmed = snapshot.clone();
                trimmed.trim_history(limit);
                serde_json::to_vec(&trimmed)
            }
            _ => serde_json::to_vec(snapshot),
        }
        .map_err(map_err!(Serialize))?;
        self.put_raw(snapshot.table_key(), &value)?;
        debug!(
            group = %snapshot.group_name,
            history = snapshot.history.len(),
            "snapshot stored"
        );
        Ok(())
    }

    /// Write raw bytes under a group key.
    pub(crate) fn put_raw(&self, key: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List the names of all stored groups.
    pub fn list_groups(&self) -> StateResult<Vec<GroupName>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    /// Delete a group's snapshot. Returns true if it existed.
    pub fn delete(&self, group: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            existed = table.remove(group).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%group, existed, "snapshot deleted");
        Ok(existed)
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}
