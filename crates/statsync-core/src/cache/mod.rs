//! Local caching module for offline data access.
//!
//! This module provides the `CacheStore`: a quota-aware key/value cache
//! with per-entry expiry, layered over a `KeyValueStore`. Every component
//! above it (orchestrator, offline queue, region resolver, user
//! preferences) persists through it.
//!
//! Expired entries are logically absent: they are purged lazily on access
//! and periodically by `sweep`.

pub mod entry;
pub mod store;

pub use entry::{CacheEntry, EntrySource, IndexRecord, WriteFailure, WriteResult};
pub use store::{CacheStatus, CacheStore, SetOptions};

/// Reserved key holding the offline queue.
pub const QUEUE_KEY: &str = "queue";

/// Reserved key holding user preferences.
pub const USER_PREFS_KEY: &str = "user_prefs";

/// Reserved storage key (under the prefix) holding the cache index.
pub(crate) const INDEX_KEY: &str = "index";
