//! Backing key/value storage.
//!
//! The cache, queue and preferences all live in a single flat string
//! key/value store. Two implementations are provided:
//! - `FileStore`: one JSON file per key in a directory, survives restarts
//! - `MemoryStore`: process-local, used when the file store is unavailable
//!   and in tests
//!
//! Writes are last-write-wins with no locking across keys.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StorageError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Returns `StorageError::QuotaExceeded` when the store's own capacity
    /// would be exceeded.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Whether values survive a restart.
    fn is_persistent(&self) -> bool;
}
