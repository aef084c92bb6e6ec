//! Cancellation of in-flight requests.
//!
//! Every suspension point (network request, backoff delay, location fix)
//! races against a `CancelToken`. The `CancelRegistry` hands out one token
//! per (consumer, request key): a newer request from the same consumer for
//! the same key cancels the older one, other consumers are untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Sending half of a standalone token.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> CancelToken {
        // With the sender gone the value can never flip to true
        let (_, token) = Self::new();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the sender is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Ticket returned by `CancelRegistry::begin`, used to deregister on completion.
#[derive(Debug)]
pub struct Ticket {
    consumer: String,
    key: String,
    generation: u64,
}

type Slot = (u64, watch::Sender<bool>);

#[derive(Default)]
pub struct CancelRegistry {
    inflight: Mutex<HashMap<(String, String), Slot>>,
    next_generation: AtomicU64,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Slot>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new request, cancelling any in-flight one for the same
    /// consumer and key.
    pub fn begin(&self, consumer: &str, key: &str) -> (CancelToken, Ticket) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        let previous = self
            .lock()
            .insert((consumer.to_string(), key.to_string()), (generation, tx));
        if let Some((_, previous_tx)) = previous {
            debug!(consumer = %consumer, key = %key, "Superseding in-flight request");
            previous_tx.send_replace(true);
        }
        (
            CancelToken { rx },
            Ticket {
                consumer: consumer.to_string(),
                key: key.to_string(),
                generation,
            },
        )
    }

    /// Deregister a finished request. A newer request that already replaced
    /// it is left alone.
    pub fn finish(&self, ticket: Ticket) {
        let mut inflight = self.lock();
        let slot_key = (ticket.consumer, ticket.key);
        if inflight
            .get(&slot_key)
            .map(|(generation, _)| *generation == ticket.generation)
            .unwrap_or(false)
        {
            inflight.remove(&slot_key);
        }
    }

    /// Cancel every in-flight request of `consumer` (e.g. the view unmounted).
    pub fn cancel_consumer(&self, consumer: &str) -> usize {
        let mut inflight = self.lock();
        let keys: Vec<(String, String)> = inflight
            .keys()
            .filter(|(c, _)| c == consumer)
            .cloned()
            .collect();
        for slot_key in &keys {
            if let Some((_, tx)) = inflight.remove(slot_key) {
                tx.send_replace(true);
            }
        }
        keys.len()
    }

    pub fn inflight_count(&self) -> usize {
        self.lock().len()
    }
}
