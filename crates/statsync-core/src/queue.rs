//! Offline request queue.
//!
//! Requests that fail while offline are appended here and replayed, in
//! their original order, once connectivity returns. The queue is persisted
//! through the cache under a reserved key so it survives restarts.
//!
//! Each item gets at most `MAX_REPLAY_ATTEMPTS` replays across drains; after
//! that it is dropped and logged, never retried forever.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::RequestSpec;
use crate::cache::{CacheStore, EntrySource, SetOptions, QUEUE_KEY};
use crate::network::{DrainGuard, NetworkState};

/// Replays per item before it is dropped as permanently failed.
pub const MAX_REPLAY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub id: Uuid,
    pub spec: RequestSpec,
}

impl RequestDescriptor {
    pub fn new(spec: RequestSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
        }
    }

    pub fn cache_key(&self) -> String {
        self.spec.cache_key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub request: RequestDescriptor,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub retained: usize,
    pub dropped: usize,
    /// Another drain was already running; nothing was processed.
    pub coalesced: bool,
}

impl DrainReport {
    pub fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }
}

pub struct OfflineQueue {
    cache: Arc<CacheStore>,
    network: Arc<NetworkState>,
    items: Mutex<VecDeque<QueueItem>>,
}

impl OfflineQueue {
    /// Load the persisted queue, if any.
    pub fn new(cache: Arc<CacheStore>, network: Arc<NetworkState>) -> Self {
        let items: VecDeque<QueueItem> = cache
            .get::<Vec<QueueItem>>(QUEUE_KEY, None)
            .map(VecDeque::from)
            .unwrap_or_default();
        if !items.is_empty() {
            info!(count = items.len(), "Loaded offline queue");
        }
        Self {
            cache,
            network,
            items: Mutex::new(items),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, items: &VecDeque<QueueItem>) {
        if items.is_empty() {
            self.cache.remove(QUEUE_KEY);
            return;
        }
        let snapshot: Vec<&QueueItem> = items.iter().collect();
        let result = self
            .cache
            .set(QUEUE_KEY, &snapshot, SetOptions::reserved(EntrySource::System));
        if !result.is_ok() {
            // Still held in memory; only persistence across restarts is lost
            warn!(reason = ?result.reason, "Failed to persist offline queue");
        }
    }

    /// Append a request. A non-mutating request already waiting under the
    /// same cache key is not queued twice. Returns whether it was added.
    pub fn enqueue(&self, request: RequestDescriptor) -> bool {
        let mut items = self.lock();
        let key = request.cache_key();
        if !request.spec.method.is_mutating()
            && items.iter().any(|item| item.request.cache_key() == key)
        {
            debug!(key = %key, "Request already queued");
            return false;
        }
        debug!(id = %request.id, key = %key, "Queueing request for replay");
        items.push_back(QueueItem {
            request,
            queued_at: Utc::now(),
            retry_count: 0,
        });
        self.persist(&items);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().iter().cloned().collect()
    }

    /// Whether a request with this cache key is waiting for replay,
    /// including one being replayed right now.
    pub fn contains_key(&self, cache_key: &str) -> bool {
        self.lock()
            .iter()
            .any(|item| item.request.cache_key() == cache_key)
    }

    /// Replay every queued item in FIFO order.
    ///
    /// A concurrent call is coalesced and returns immediately.
    pub async fn drain<F, Fut, E>(&self, replay: F) -> DrainReport
    where
        F: FnMut(QueueItem) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        match self.network.try_begin_drain() {
            Some(guard) => self.drain_claimed(guard, replay).await,
            None => {
                debug!("Drain already in progress, coalescing");
                DrainReport::coalesced()
            }
        }
    }

    /// Replay every queued item in FIFO order under an already claimed drain.
    ///
    /// Successful items are removed. Failed items stay with their retry count
    /// bumped, unless they reached `MAX_REPLAY_ATTEMPTS`, in which case they
    /// are dropped. Items stay visible to `contains_key` until their replay
    /// has finished.
    pub async fn drain_claimed<F, Fut, E>(&self, _guard: DrainGuard, mut replay: F) -> DrainReport
    where
        F: FnMut(QueueItem) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let batch = self.items();
        if batch.is_empty() {
            return DrainReport::default();
        }
        info!(count = batch.len(), "Replaying offline queue");

        let mut report = DrainReport::default();
        // New retry count per replayed item, `None` once it leaves the queue
        let mut settled: HashMap<Uuid, Option<u32>> = HashMap::with_capacity(batch.len());
        for item in batch {
            let id = item.request.id;
            let retry_count = item.retry_count + 1;
            match replay(item.clone()).await {
                Ok(()) => {
                    debug!(id = %id, "Replayed queued request");
                    report.replayed += 1;
                    settled.insert(id, None);
                }
                Err(e) if retry_count < MAX_REPLAY_ATTEMPTS => {
                    warn!(
                        id = %id,
                        retry = retry_count,
                        error = %e,
                        "Queued request replay failed, keeping for next reconnect"
                    );
                    report.retained += 1;
                    settled.insert(id, Some(retry_count));
                }
                Err(e) => {
                    error!(
                        id = %id,
                        key = %item.request.cache_key(),
                        attempts = retry_count,
                        error = %e,
                        "Queued request permanently failed, dropping"
                    );
                    report.dropped += 1;
                    settled.insert(id, None);
                }
            }
        }

        // Items enqueued while draining were appended, so they stay behind
        // the retained older ones
        let mut items = self.lock();
        items.retain_mut(|item| match settled.get(&item.request.id) {
            Some(Some(retry_count)) => {
                item.retry_count = *retry_count;
                true
            }
            Some(None) => false,
            None => true,
        });
        self.persist(&items);
        info!(
            replayed = report.replayed,
            retained = report.retained,
            dropped = report.dropped,
            "Offline queue drained"
        );
        report
    }
}
