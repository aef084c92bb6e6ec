//! Directory-backed store: one file per key.

use std::path::PathBuf;

use tracing::debug;

use crate::error::StorageError;

use super::KeyValueStore;

const FILE_EXTENSION: &str = "json";

/// Persistent store writing each key to `<dir>/<hex(key)>.json`.
///
/// Keys are hex-encoded so arbitrary request keys (slashes, query strings)
/// map to safe file names and can be decoded back for enumeration.
pub struct FileStore {
    dir: PathBuf,
    capacity_bytes: Option<u64>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity_bytes: None,
        })
    }

    pub fn with_capacity(dir: PathBuf, capacity_bytes: u64) -> Result<Self, StorageError> {
        let mut store = Self::new(dir)?;
        store.capacity_bytes = Some(capacity_bytes);
        Ok(store)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(key.as_bytes()), FILE_EXTENSION))
    }

    fn decode_file_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(&format!(".{}", FILE_EXTENSION))?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn used_bytes_excluding(&self, key: &str) -> Result<u64, StorageError> {
        let skip = self.path_for(key);
        let mut total = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path() == skip {
                continue;
            }
            total += entry.metadata()?.len();
        }
        Ok(total)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(capacity) = self.capacity_bytes {
            if self.used_bytes_excluding(key)? + value.len() as u64 > capacity {
                return Err(StorageError::QuotaExceeded);
            }
        }
        // Write to a temp file first so a crash never leaves a half-written value
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            match name.to_str().and_then(Self::decode_file_name) {
                Some(key) => keys.push(key),
                None => debug!(file = ?name, "Skipping unrecognized file in store directory"),
            }
        }
        Ok(keys)
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
