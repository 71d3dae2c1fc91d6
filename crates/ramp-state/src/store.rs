//! StateStore — redb database handle and generic JSON accessors.
//!
//! The domain-specific operations live in the sibling modules
//! (`plan`, `registry`, `stage`, `ledger`); this module owns opening
//! the database and the raw typed get/put/remove/scan primitives they
//! share. Supports on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}
pub(crate) use map_err;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PLANS).map_err(map_err!(Table))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(STAGES).map_err(map_err!(Table))?;
        txn.open_table(STEPS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic typed accessors ────────────────────────────────────

    /// Read and deserialize one value.
    pub(crate) fn read_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and write one value.
    pub(crate) fn write_json<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Check a key without deserializing.
    pub(crate) fn contains_key(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.is_some())
    }

    /// Delete one key. Returns true if it existed.
    pub(crate) fn remove_key(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Collect keys matching a prefix.
    pub(crate) fn keys_with_prefix(
        &self,
        table: TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    /// Delete every key matching a prefix. Returns number deleted.
    pub(crate) fn remove_prefix(
        &self,
        table: TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> StateResult<u32> {
        let keys = self.keys_with_prefix(table, prefix)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(keys.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        let value: Option<String> = store.read_json(PLANS, "nope").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_json(STEPS, "r1/step", &"done").unwrap();
        let value: Option<String> = store.read_json(STEPS, "r1/step").unwrap();
        assert_eq!(value.as_deref(), Some("done"));
        assert!(store.contains_key(STEPS, "r1/step").unwrap());
    }

    #[test]
    fn remove_key_reports_existence() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_json(STAGES, "k", &1u32).unwrap();
        assert!(store.remove_key(STAGES, "k").unwrap());
        assert!(!store.remove_key(STAGES, "k").unwrap());
    }

    #[test]
    fn prefix_scan_and_removal() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_json(STEPS, "r1/a", &1u32).unwrap();
        store.write_json(STEPS, "r1/b", &2u32).unwrap();
        store.write_json(STEPS, "r2/a", &3u32).unwrap();

        let keys = store.keys_with_prefix(STEPS, "r1/").unwrap();
        assert_eq!(keys.len(), 2);

        assert_eq!(store.remove_prefix(STEPS, "r1/").unwrap(), 2);
        assert!(store.keys_with_prefix(STEPS, "r1/").unwrap().is_empty());
        assert!(store.contains_key(STEPS, "r2/a").unwrap());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.write_json(PLANS, "main", &"v1").unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let value: Option<String> = store.read_json(PLANS, "main").unwrap();
        assert_eq!(value.as_deref(), Some("v1"));
    }
}
