//! In-memory key-value store for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::{KvError, KvResult, KvStore};

/// An in-memory key-value store backed by a BTreeMap.
///
/// Keys come back from `scan` in key order, matching [`crate::RedbStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let data = self
            .data
            .lock()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> KvResult<bool> {
        let data = self
            .data
            .lock()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        Ok(data.contains_key(key))
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        data.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>> {
        let data = self
            .data
            .lock()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
