use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DataClass, RequestSpec, Transport};
use crate::cache::{CacheEntry, CacheStore, EntrySource, SetOptions};
use crate::cancel::{CancelRegistry, CancelToken};
use crate::config::ApiConfig;
use crate::error::{ErrorKind, FailureLabel, SyncError};
use crate::network::NetworkState;
use crate::queue::{DrainReport, OfflineQueue, QueueItem, RequestDescriptor};

use super::backoff::RetryPolicy;
use super::fallback::FallbackGenerator;

/// Maximum concurrent requests when warming the cache
const MAX_CONCURRENT_REQUESTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchSource {
    Network,
    Cache,
    Fallback,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Calling view or component. A newer call from the same consumer for
    /// the same request cancels the older one.
    pub consumer: Option<String>,
    /// Cached entries older than this are not served.
    pub max_age: Option<chrono::Duration>,
}

impl FetchOptions {
    pub fn for_consumer(consumer: impl Into<String>) -> Self {
        Self {
            consumer: Some(consumer.into()),
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// What `fetch_data` delivers. A payload is always present; `failure`
/// says why it did not come from the network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    pub payload: Value,
    pub source: FetchSource,
    pub stale: bool,
    pub failure: Option<FailureLabel>,
}

impl FetchOutcome {
    /// `count` annotation if present, otherwise the length of a `data` list.
    pub fn count(&self) -> Option<u64> {
        self.payload
            .get("count")
            .and_then(Value::as_u64)
            .or_else(|| {
                self.payload
                    .get("data")
                    .and_then(Value::as_array)
                    .map(|items| items.len() as u64)
            })
    }

    /// `source` annotation passed through from the payload.
    pub fn payload_source(&self) -> Option<&str> {
        self.payload.get("source").and_then(Value::as_str)
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == FetchSource::Fallback
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

enum SendFailure {
    Cancelled,
    Api(ApiError),
}

/// Every dataset request goes through here: network with retry, then
/// cache, then a synthetic fallback.
pub struct SyncOrchestrator {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStore>,
    queue: Arc<OfflineQueue>,
    network: Arc<NetworkState>,
    fallback: FallbackGenerator,
    retry: RetryPolicy,
    request_timeout: Duration,
    cancels: CancelRegistry,
}

impl SyncOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<CacheStore>,
        queue: Arc<OfflineQueue>,
        network: Arc<NetworkState>,
        fallback: FallbackGenerator,
        api: &ApiConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            queue,
            network,
            fallback,
            retry: RetryPolicy::from_config(api),
            request_timeout: api.request_timeout(),
            cancels: CancelRegistry::new(),
        }
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn network(&self) -> &Arc<NetworkState> {
        &self.network
    }

    /// Cancel every in-flight call of `consumer`. Queued items are untouched.
    pub fn cancel_consumer(&self, consumer: &str) -> usize {
        let cancelled = self.cancels.cancel_consumer(consumer);
        if cancelled > 0 {
            debug!(consumer = %consumer, cancelled, "Cancelled in-flight requests");
        }
        cancelled
    }

    /// Fetch a dataset. Only fails if the call was cancelled.
    pub async fn fetch_data(
        &self,
        spec: &RequestSpec,
        options: FetchOptions,
    ) -> Result<FetchOutcome, SyncError> {
        let key = spec.cache_key();
        let (cancel, ticket) = match options.consumer.as_deref() {
            Some(consumer) => {
                let (token, ticket) = self.cancels.begin(consumer, &key);
                (token, Some(ticket))
            }
            None => (CancelToken::never(), None),
        };

        let result = self.fetch_inner(spec, &key, &options, &cancel).await;

        if let Some(ticket) = ticket {
            self.cancels.finish(ticket);
        }
        result
    }

    async fn fetch_inner(
        &self,
        spec: &RequestSpec,
        key: &str,
        options: &FetchOptions,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, SyncError> {
        // Anything served later must be at least this recent
        let snapshot = self.cached(spec, key, options);

        if self.network.is_online() && self.queue.contains_key(key) {
            self.settle_pending_drain(cancel).await?;
        }

        let failure = if self.network.is_online() {
            match self.send_with_retry(spec, key, cancel).await {
                Ok(payload) => {
                    self.store_response(spec, key, &payload);
                    return Ok(FetchOutcome {
                        payload,
                        source: FetchSource::Network,
                        stale: false,
                        failure: None,
                    });
                }
                Err(SendFailure::Cancelled) => {
                    debug!(key = %key, "Request cancelled");
                    return Err(SyncError::Cancelled);
                }
                Err(SendFailure::Api(e)) => {
                    if matches!(e, ApiError::Unreachable(_)) {
                        self.enqueue_if_replayable(spec);
                    }
                    e.failure_label()
                }
            }
        } else {
            self.enqueue_if_replayable(spec);
            FailureLabel::NetworkUnreachable
        };

        if let Some(entry) = self.cached(spec, key, options).or(snapshot) {
            let stale = entry.is_expired();
            debug!(key = %key, stale, failure = ?failure, "Serving cached data");
            return Ok(FetchOutcome {
                payload: entry.payload,
                source: FetchSource::Cache,
                stale,
                failure: Some(failure),
            });
        }

        info!(key = %key, failure = ?failure, "No cached data, serving fallback");
        Ok(FetchOutcome {
            payload: self.fallback.generate(spec),
            source: FetchSource::Fallback,
            stale: false,
            failure: Some(failure),
        })
    }

    /// Cache lookup honouring the data class and the caller's `max_age`.
    /// Health data may be served past its TTL.
    fn cached(&self, spec: &RequestSpec, key: &str, options: &FetchOptions) -> Option<CacheEntry> {
        let entry = match spec.data_class {
            DataClass::Health => self.cache.get_allow_expired(key),
            _ => self.cache.get_entry(key),
        }?;
        match options.max_age {
            Some(max_age) if entry.age() >= max_age => None,
            _ => Some(entry),
        }
    }

    fn store_response(&self, spec: &RequestSpec, key: &str, payload: &Value) {
        if spec.method.is_mutating() {
            return;
        }
        let ttl = self.cache.config().ttl.for_class(spec.data_class);
        let result = self
            .cache
            .set(key, payload, SetOptions::new(EntrySource::Network, ttl));
        if !result.is_ok() {
            warn!(key = %key, reason = ?result.reason, "Response not cached");
        }
    }

    /// Cache a replayed response unless the key was rewritten after the
    /// item was queued.
    fn store_replayed(&self, item: &QueueItem, payload: &Value) {
        let key = item.request.cache_key();
        if let Some(record) = self.cache.record(&key) {
            if record.last_updated > item.queued_at {
                debug!(key = %key, "Cache entry newer than queued request, keeping it");
                return;
            }
        }
        self.store_response(&item.request.spec, &key, payload);
    }

    async fn replay_item(&self, item: QueueItem) -> Result<(), ApiError> {
        let payload = self.send_once(&item.request.spec).await?;
        self.store_replayed(&item, &payload);
        Ok(())
    }

    fn enqueue_if_replayable(&self, spec: &RequestSpec) {
        if spec.should_queue_offline() {
            self.queue.enqueue(RequestDescriptor::new(spec.clone()));
        }
    }

    /// Run, or wait for, the drain owed for the current online period.
    /// Never starts a drain beyond that one. Returns the report if this call
    /// ran it.
    async fn settle_pending_drain(
        &self,
        cancel: &CancelToken,
    ) -> Result<Option<DrainReport>, SyncError> {
        loop {
            if let Some(guard) = self.network.claim_pending_drain() {
                // Not cancellable: replayed items must be settled in the queue
                let report = self
                    .queue
                    .drain_claimed(guard, |item| self.replay_item(item))
                    .await;
                return Ok(Some(report));
            }
            if !self.network.is_draining() {
                return Ok(None);
            }
            debug!("Waiting for in-progress queue drain");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = self.network.drain_idle() => {}
            }
        }
    }

    async fn send_once(&self, spec: &RequestSpec) -> Result<Value, ApiError> {
        match tokio::time::timeout(self.request_timeout, self.transport.send(spec)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        }
    }

    async fn send_with_retry(
        &self,
        spec: &RequestSpec,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<Value, SendFailure> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SendFailure::Cancelled),
                result = self.send_once(spec) => result,
            };

            match result {
                Ok(payload) => {
                    if attempts > 1 {
                        info!(key = %key, attempts, "Request succeeded after retry");
                    }
                    return Ok(payload);
                }
                Err(e)
                    if e.kind() == ErrorKind::TransientNetwork
                        && self.retry.allows_retry(attempts) =>
                {
                    let delay = self.retry.delay_for(attempts - 1);
                    warn!(
                        key = %key,
                        attempt = attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SendFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(key = %key, attempts, error = %e, "Request failed");
                    return Err(SendFailure::Api(e));
                }
            }
        }
    }

    /// Replay the offline queue once, on explicit request. Returns
    /// immediately (coalesced) if a drain is already running, and does
    /// nothing while offline.
    pub async fn replay_queue(&self) -> DrainReport {
        if !self.network.is_online() {
            debug!("Offline, not replaying queue");
            return DrainReport::default();
        }
        self.queue.drain(|item| self.replay_item(item)).await
    }

    /// Run the drain owed for the current online period, if nobody has yet.
    pub async fn replay_pending(&self) -> Option<DrainReport> {
        self.settle_pending_drain(&CancelToken::never())
            .await
            .ok()
            .flatten()
    }

    /// Replay the queue once per offline to online transition until the
    /// network state shuts down. Starting online counts as a transition.
    pub fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut online = self.network.subscribe();
        let mut shutdown = self.network.shutdown_signal();
        // Read before spawning so a transition right after this call is not missed
        let mut was_online = *online.borrow_and_update();
        tokio::spawn(async move {
            if was_online && this.replay_pending().await.is_some() {
                debug!("Replayed offline queue left from a previous session");
            }
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_online = *online.borrow_and_update();
                        if now_online && !was_online {
                            info!("Back online, replaying offline queue");
                            this.replay_pending().await;
                        }
                        was_online = now_online;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Reconnect listener stopped");
        })
    }

    /// Fetch several datasets with bounded concurrency, e.g. to warm the
    /// cache before going offline.
    pub async fn prefetch_all(
        &self,
        specs: Vec<RequestSpec>,
    ) -> Vec<(RequestSpec, Result<FetchOutcome, SyncError>)> {
        debug!(
            "Prefetching {} datasets with max {} concurrent requests...",
            specs.len(),
            MAX_CONCURRENT_REQUESTS
        );
        stream::iter(specs)
            .map(move |spec| async move {
                let result = self.fetch_data(&spec, FetchOptions::default()).await;
                (spec, result)
            })
            .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await
    }
}
