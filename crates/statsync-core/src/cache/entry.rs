use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a cached payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Network,
    Fallback,
    User,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T = serde_json::Value> {
    pub key: String,
    pub payload: T,
    pub source: EntrySource,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl<T> CacheEntry<T> {
    /// Expired at or after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Per-key metadata kept apart from payloads, so quota accounting and
/// freshness checks never deserialize a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub source: EntrySource,
}

impl IndexRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Not enough space even after purging and eviction.
    QuotaExceeded,
    /// The entry alone is larger than the whole quota.
    TooLarge,
    /// Backing storage is disabled or failing.
    StorageUnavailable,
    /// `max_age` was zero or negative.
    InvalidTtl,
    Serialization,
}

/// Outcome of a cache write. Quota pressure is reported here rather than
/// raised as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub ok: bool,
    pub reason: Option<WriteFailure>,
}

impl WriteResult {
    pub fn ok() -> Self {
        Self { ok: true, reason: None }
    }

    pub fn failed(reason: WriteFailure) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }
}
