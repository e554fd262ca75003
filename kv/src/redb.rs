//! Durable key-value store backed by redb.
//!
//! Every `set`/`delete` runs in its own write transaction, so a write
//! is on disk before the call returns. Reads run in read transactions
//! and see the last committed state, which gives `scan` its
//! point-in-time-ish view.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::{KvError, KvResult, KvStore};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("facegate");

fn storage_err(e: impl std::fmt::Display) -> KvError {
    KvError::Storage(e.to_string())
}

/// A persistent key-value store backed by redb.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> KvResult<Self> {
        let db = Database::create(path).map_err(storage_err)?;

        // Ensure the table exists so first reads don't fail.
        let tx = db.begin_write().map_err(storage_err)?;
        {
            let _ = tx.open_table(TABLE).map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;

        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let tx = self.db.begin_read().map_err(storage_err)?;
        let table = tx.open_table(TABLE).map_err(storage_err)?;
        Ok(table
            .get(key)
            .map_err(storage_err)?
            .map(|v| v.value().to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
        let tx = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = tx.open_table(TABLE).map_err(storage_err)?;
            table.insert(key, value).map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> KvResult<bool> {
        let tx = self.db.begin_read().map_err(storage_err)?;
        let table = tx.open_table(TABLE).map_err(storage_err)?;
        Ok(table.get(key).map_err(storage_err)?.is_some())
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        let tx = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = tx.open_table(TABLE).map_err(storage_err)?;
            table.remove(key).map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>> {
        let tx = self.db.begin_read().map_err(storage_err)?;
        let table = tx.open_table(TABLE).map_err(storage_err)?;

        // Keys are ordered, so start the range at the prefix and stop
        // at the first key past it.
        let mut results = Vec::new();
        for item in table.range(prefix..).map_err(storage_err)? {
            let (key, value) = item.map_err(storage_err)?;
            let key_str = key.value();
            if !key_str.starts_with(prefix) {
                break;
            }
            results.push((key_str.to_string(), value.value().to_vec()));
        }
        Ok(results)
    }
}
