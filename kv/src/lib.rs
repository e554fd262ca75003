//! Key-value backend abstraction.
//!
//! The gallery persists identity records through this trait. Two
//! implementations are provided: [`MemoryStore`] for tests and
//! ephemeral runs, and [`RedbStore`] for durable on-disk storage.

pub mod memory;
pub mod redb;

use thiserror::Error;

/// Errors that can occur in KV store operations.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("kv: storage error: {0}")]
    Storage(String),
}

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Durable key-value store with string keys and opaque byte values.
///
/// `set` must persist before returning success. `scan` reflects a
/// point-in-time-ish view: writes concurrent with a scan may or may
/// not be observed, and callers must tolerate either.
pub trait KvStore: Send + Sync {
    /// Get a value by key. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Set a key-value pair durably.
    fn set(&self, key: &str, value: &[u8]) -> KvResult<()>;

    /// Whether a key is present.
    fn exists(&self, key: &str) -> KvResult<bool>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> KvResult<()>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan(&self, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>>;
}

pub use memory::MemoryStore;
pub use redb::RedbStore;
