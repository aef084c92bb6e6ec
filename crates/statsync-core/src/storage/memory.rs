use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::StorageError;

use super::KeyValueStore;

/// In-memory store with an optional byte capacity.
///
/// Capacity counts key and value bytes, roughly how browser storage quotas
/// are accounted.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    capacity_bytes: Option<u64>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes: Some(capacity_bytes),
            ..Self::default()
        }
    }

    /// A store that rejects every operation, like storage disabled by the platform.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock()
            .map(|values| values.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage disabled".to_string()));
        }
        self.values
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.lock()?;
        if let Some(capacity) = self.capacity_bytes {
            let others: u64 = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            if others + (key.len() + value.len()) as u64 > capacity {
                return Err(StorageError::QuotaExceeded);
            }
        }
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rejects_oversized_write() {
        let store = MemoryStore::with_capacity(10);
        store.set("a", "1234").unwrap();
        assert!(matches!(
            store.set("b", "123456789"),
            Err(StorageError::QuotaExceeded)
        ));
        // Overwriting an existing key only counts the new value
        store.set("a", "12345678").unwrap();
        assert_eq!(store.used_bytes(), 9);
    }

    #[test]
    fn test_unavailable_store_rejects_everything() {
        let store = MemoryStore::unavailable();
        assert!(matches!(store.get("a"), Err(StorageError::Unavailable(_))));
        assert!(matches!(store.set("a", "b"), Err(StorageError::Unavailable(_))));
        assert!(matches!(store.keys(), Err(StorageError::Unavailable(_))));

        store.set_available(true);
        store.set("a", "b").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("b"));
    }
}
