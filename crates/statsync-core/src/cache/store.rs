use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::StorageError;
use crate::storage::KeyValueStore;
use crate::utils::format::age_display;

use super::entry::{CacheEntry, EntrySource, IndexRecord, WriteFailure, WriteResult};
use super::{INDEX_KEY, QUEUE_KEY, USER_PREFS_KEY};

type Index = HashMap<String, IndexRecord>;

#[derive(Debug, Clone, Copy)]
pub struct SetOptions {
    pub source: EntrySource,
    pub max_age: chrono::Duration,
}

/// Nominal lifetime written for reserved keys, which never expire.
const RESERVED_MAX_AGE_DAYS: i64 = 36_500;

impl SetOptions {
    pub fn new(source: EntrySource, max_age: chrono::Duration) -> Self {
        Self { source, max_age }
    }

    /// Options for reserved keys (offline queue, user preferences).
    pub fn reserved(source: EntrySource) -> Self {
        Self::new(source, chrono::Duration::days(RESERVED_MAX_AGE_DAYS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub entry_count: usize,
    /// Last time a network response was written.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// False when running memory-only.
    pub persistent: bool,
}

impl CacheStatus {
    pub fn last_sync_display(&self) -> String {
        self.last_sync_at
            .map(age_display)
            .unwrap_or_else(|| "never".to_string())
    }
}

/// Quota-aware TTL cache over a shared `KeyValueStore`.
///
/// All keys are written under `config.key_prefix`. The index lives under
/// `<prefix>index`; entries under `<prefix><key>`. Reserved keys (queue,
/// user preferences) are never evicted and never expire.
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    index: Mutex<Index>,
    pinned: HashSet<String>,
}

impl CacheStore {
    /// Open a cache over `store`, loading and reconciling any persisted index.
    pub fn open(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let pinned = [QUEUE_KEY, USER_PREFS_KEY]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let cache = Self {
            store,
            config,
            index: Mutex::new(Index::new()),
            pinned,
        };
        cache.load_index();
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn index_storage_key(&self) -> String {
        self.storage_key(INDEX_KEY)
    }

    fn lock_index(&self) -> MutexGuard<'_, Index> {
        // Index contents stay consistent even if a holder panicked mid-update
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_index(&self) {
        let loaded: Index = match self.store.get(&self.index_storage_key()) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Cache index corrupt, rebuilding empty");
                Index::new()
            }),
            Ok(None) => Index::new(),
            Err(e) => {
                warn!(error = %e, "Cache storage unavailable, starting with empty index");
                return;
            }
        };

        let mut index = self.lock_index();
        *index = loaded;
        self.reconcile_locked(&mut index);
        let purged = self.purge_expired_locked(&mut index, Utc::now());
        if purged > 0 {
            debug!(purged, "Purged expired entries on open");
        }
        self.persist_index_locked(&index);
    }

    /// Drop index records without a stored value and stored values without
    /// an index record, so each live entry has exactly one record.
    fn reconcile_locked(&self, index: &mut Index) {
        let stored: HashSet<String> = match self.store.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.config.key_prefix).map(str::to_string))
                .filter(|k| k != INDEX_KEY)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not enumerate cache storage for reconciliation");
                return;
            }
        };

        index.retain(|key, _| stored.contains(key));
        for orphan in stored.iter().filter(|k| !index.contains_key(*k)) {
            debug!(key = %orphan, "Removing cache value with no index record");
            if let Err(e) = self.store.remove(&self.storage_key(orphan)) {
                warn!(key = %orphan, error = %e, "Failed to remove orphaned cache value");
            }
        }
    }

    fn persist_index_locked(&self, index: &Index) {
        let raw = match serde_json::to_string(index) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache index");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.index_storage_key(), &raw) {
            warn!(error = %e, "Failed to persist cache index");
        }
    }

    fn used_bytes_locked(index: &Index) -> u64 {
        index.values().map(|r| r.size_bytes).sum()
    }

    fn remove_locked(&self, index: &mut Index, key: &str) {
        index.remove(key);
        if let Err(e) = self.store.remove(&self.storage_key(key)) {
            warn!(key = %key, error = %e, "Failed to remove cache value");
        }
    }

    fn is_reserved(&self, key: &str) -> bool {
        self.pinned.contains(key)
    }

    fn purge_expired_locked(&self, index: &mut Index, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = index
            .iter()
            .filter(|(key, record)| record.is_expired_at(now) && !self.is_reserved(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove_locked(index, key);
        }
        expired.len()
    }

    /// Purge expired entries, then evict least-recently-updated entries until
    /// usage is under the cleanup threshold of `max` and `incoming` bytes fit.
    fn make_room_locked(&self, index: &mut Index, key: &str, incoming: u64, max: u64) {
        let purged = self.purge_expired_locked(index, Utc::now());

        let threshold = self.config.cleanup_threshold(max);
        let mut candidates: Vec<(String, DateTime<Utc>)> = index
            .iter()
            .filter(|(k, _)| k.as_str() != key && !self.is_reserved(k))
            .map(|(k, r)| (k.clone(), r.last_updated))
            .collect();
        candidates.sort_by_key(|(_, last_updated)| *last_updated);

        let mut evicted = 0;
        for (victim, _) in candidates {
            let used = Self::used_bytes_locked(index)
                - index.get(key).map(|r| r.size_bytes).unwrap_or(0);
            if used <= threshold && used + incoming <= max {
                break;
            }
            self.remove_locked(index, &victim);
            evicted += 1;
        }

        if purged > 0 || evicted > 0 {
            warn!(purged, evicted, "Cache quota pressure - made room for write");
        }
    }

    /// Write `payload` under `key` with `expires_at = now + max_age`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, payload: &T, options: SetOptions) -> WriteResult {
        if options.max_age <= chrono::Duration::zero() {
            return WriteResult::failed(WriteFailure::InvalidTtl);
        }
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache payload");
                return WriteResult::failed(WriteFailure::Serialization);
            }
        };

        let now = Utc::now();
        let mut entry = CacheEntry {
            key: key.to_string(),
            payload,
            source: options.source,
            created_at: now,
            expires_at: now + options.max_age,
            size_bytes: 0,
        };
        let raw = match Self::encode(&mut entry) {
            Some(raw) => raw,
            None => return WriteResult::failed(WriteFailure::Serialization),
        };
        self.write_entry(&entry, &raw)
    }

    fn encode(entry: &mut CacheEntry) -> Option<String> {
        let first = serde_json::to_string(&entry).ok()?;
        // Record the size of the encoding that includes the size field itself
        entry.size_bytes = first.len() as u64;
        let mut raw = serde_json::to_string(&entry).ok()?;
        if raw.len() as u64 != entry.size_bytes {
            entry.size_bytes = raw.len() as u64;
            raw = serde_json::to_string(&entry).ok()?;
        }
        Some(raw)
    }

    fn write_entry(&self, entry: &CacheEntry, raw: &str) -> WriteResult {
        let size = raw.len() as u64;
        if size > self.config.max_bytes {
            warn!(key = %entry.key, size, max = self.config.max_bytes, "Cache entry larger than quota");
            return WriteResult::failed(WriteFailure::TooLarge);
        }

        let mut index = self.lock_index();
        let existing = index.get(&entry.key).map(|r| r.size_bytes).unwrap_or(0);
        if Self::used_bytes_locked(&index) - existing + size > self.config.max_bytes {
            self.make_room_locked(&mut index, &entry.key, size, self.config.max_bytes);
        }
        let existing = index.get(&entry.key).map(|r| r.size_bytes).unwrap_or(0);
        if Self::used_bytes_locked(&index) - existing + size > self.config.max_bytes {
            return WriteResult::failed(WriteFailure::QuotaExceeded);
        }

        let storage_key = self.storage_key(&entry.key);
        let mut result = self.store.set(&storage_key, raw);
        if matches!(result, Err(StorageError::QuotaExceeded)) {
            // The backing store's own limit is unknown, so treat current usage
            // as the quota, clean up against it and try exactly once more
            let existing = index.get(&entry.key).map(|r| r.size_bytes).unwrap_or(0);
            let effective_max = Self::used_bytes_locked(&index) - existing;
            self.make_room_locked(&mut index, &entry.key, size, effective_max);
            result = self.store.set(&storage_key, raw);
        }

        match result {
            Ok(()) => {
                index.insert(
                    entry.key.clone(),
                    IndexRecord {
                        last_updated: entry.created_at,
                        expires_at: entry.expires_at,
                        size_bytes: size,
                        source: entry.source,
                    },
                );
                self.persist_index_locked(&index);
                debug!(key = %entry.key, size, source = ?entry.source, "Cached entry");
                WriteResult::ok()
            }
            Err(StorageError::QuotaExceeded) => {
                warn!(key = %entry.key, "Storage quota exceeded after cleanup");
                self.persist_index_locked(&index);
                WriteResult::failed(WriteFailure::QuotaExceeded)
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Cache storage unavailable, write skipped");
                WriteResult::failed(WriteFailure::StorageUnavailable)
            }
        }
    }

    /// Return the payload if present and unexpired. A caller `max_age`
    /// stricter than the entry's own TTL is honoured too.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Option<chrono::Duration>) -> Option<T> {
        let entry = self.get_entry(key)?;
        if let Some(max_age) = max_age {
            if Utc::now() - entry.created_at >= max_age {
                debug!(key = %key, "Cache entry older than caller max_age");
                return None;
            }
        }
        match serde_json::from_value(entry.payload) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached payload has unexpected shape, discarding");
                self.remove(key);
                None
            }
        }
    }

    /// Return the whole entry if present and unexpired.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        self.read_entry(key, false)
    }

    /// Return the entry even if its TTL has passed. Only for data classes
    /// where serving expired data is accepted deliberately.
    pub fn get_allow_expired(&self, key: &str) -> Option<CacheEntry> {
        self.read_entry(key, true)
    }

    fn read_entry(&self, key: &str, allow_expired: bool) -> Option<CacheEntry> {
        let now = Utc::now();
        let allow_expired = allow_expired || self.is_reserved(key);
        let mut index = self.lock_index();
        let record = match index.get(key) {
            Some(record) => record.clone(),
            None => {
                debug!(key = %key, "Cache miss");
                return None;
            }
        };
        if record.is_expired_at(now) && !allow_expired {
            debug!(key = %key, "Cache entry expired, purging");
            self.remove_locked(&mut index, key);
            self.persist_index_locked(&index);
            return None;
        }

        let raw = match self.store.get(&self.storage_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %key, "Index record without stored value, dropping");
                index.remove(key);
                self.persist_index_locked(&index);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache storage read failed");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if allow_expired || !entry.is_expired_at(now) => {
                debug!(key = %key, "Cache hit");
                Some(entry)
            }
            Ok(_) => {
                self.remove_locked(&mut index, key);
                self.persist_index_locked(&index);
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache entry, deleting");
                self.remove_locked(&mut index, key);
                self.persist_index_locked(&index);
                None
            }
        }
    }

    /// Presence-and-freshness check from the index alone.
    pub fn is_valid(&self, key: &str) -> bool {
        self.lock_index()
            .get(key)
            .map(|record| self.is_reserved(key) || !record.is_expired_at(Utc::now()))
            .unwrap_or(false)
    }

    pub fn remove(&self, key: &str) {
        let mut index = self.lock_index();
        self.remove_locked(&mut index, key);
        self.persist_index_locked(&index);
    }

    /// Remove every entry except those in `preserve_keys`.
    /// Returns the number of entries removed.
    pub fn clear(&self, preserve_keys: &[&str]) -> usize {
        let mut index = self.lock_index();
        let doomed: Vec<String> = index
            .keys()
            .filter(|k| !preserve_keys.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove_locked(&mut index, key);
        }
        self.persist_index_locked(&index);
        info!(removed = doomed.len(), preserved = index.len(), "Cache cleared");
        doomed.len()
    }

    /// Purge all expired entries. Returns the number purged.
    pub fn sweep(&self) -> usize {
        let mut index = self.lock_index();
        let purged = self.purge_expired_locked(&mut index, Utc::now());
        if purged > 0 {
            self.persist_index_locked(&index);
            debug!(purged, "Cache sweep purged expired entries");
        }
        purged
    }

    pub fn status(&self) -> CacheStatus {
        let index = self.lock_index();
        let used = Self::used_bytes_locked(&index);
        CacheStatus {
            available_bytes: self.config.max_bytes.saturating_sub(used),
            used_bytes: used,
            entry_count: index.len(),
            last_sync_at: index
                .values()
                .filter(|r| r.source == EntrySource::Network)
                .map(|r| r.last_updated)
                .max(),
            persistent: self.is_persistent(),
        }
    }

    /// Index metadata for `key`, without reading the payload.
    pub fn record(&self, key: &str) -> Option<IndexRecord> {
        self.lock_index().get(key).cloned()
    }

    /// Live keys, including reserved ones.
    pub fn keys(&self) -> Vec<String> {
        self.lock_index().keys().cloned().collect()
    }

    /// Run `sweep` every `interval` until `shutdown` flips to true.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Cache sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Write a fully-formed entry, bypassing timestamp generation.
    #[cfg(test)]
    pub(crate) fn insert_entry(&self, mut entry: CacheEntry) -> WriteResult {
        match Self::encode(&mut entry) {
            Some(raw) => self.write_entry(&entry, &raw),
            None => WriteResult::failed(WriteFailure::Serialization),
        }
    }
}
