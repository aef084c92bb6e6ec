//! Process-wide connectivity state.
//!
//! `NetworkState` is created at startup, updated from platform connectivity
//! events via `set_online`, and torn down with `shutdown`. Components hold
//! it by `Arc` and subscribe to transitions through `watch` channels.
//!
//! Each offline to online transition (and starting online) owes exactly one
//! queue drain. Whoever claims it first with `claim_pending_drain` runs it;
//! everyone else waits on `drain_idle`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DrainState {
    running: bool,
    /// The current online period has not been drained yet.
    pending: bool,
}

pub struct NetworkState {
    online: watch::Sender<bool>,
    drain: watch::Sender<DrainState>,
    shutdown: watch::Sender<bool>,
}

/// Clears the drain-in-progress flag when dropped.
pub struct DrainGuard {
    state: Arc<NetworkState>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.state.drain.send_modify(|drain| drain.running = false);
    }
}

impl NetworkState {
    /// Starting online counts as a transition: a persisted queue is owed a drain.
    pub fn new(initially_online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: watch::channel(initially_online).0,
            drain: watch::channel(DrainState {
                running: false,
                pending: initially_online,
            })
            .0,
            shutdown: watch::channel(false).0,
        })
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record a connectivity event. Returns the transition if the state changed.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return None;
        }
        self.drain.send_modify(|drain| drain.pending = online);
        let transition = if online {
            Transition::WentOnline
        } else {
            Transition::WentOffline
        };
        info!(?transition, "Connectivity changed");
        Some(transition)
    }

    /// Subscribe to connectivity changes. The receiver sees the latest value.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Claim the drain-in-progress flag. `None` if a drain is already running.
    /// Any drain also settles the one owed for the current online period.
    pub fn try_begin_drain(self: &Arc<Self>) -> Option<DrainGuard> {
        self.claim(|drain| !drain.running)
    }

    /// Claim the drain owed for the current online period. `None` if it
    /// already ran (or is running), or while offline.
    pub fn claim_pending_drain(self: &Arc<Self>) -> Option<DrainGuard> {
        self.claim(|drain| drain.pending && !drain.running)
    }

    fn claim(self: &Arc<Self>, eligible: impl Fn(&DrainState) -> bool) -> Option<DrainGuard> {
        let claimed = self.drain.send_if_modified(|drain| {
            if eligible(drain) {
                drain.running = true;
                drain.pending = false;
                true
            } else {
                false
            }
        });
        claimed.then(|| DrainGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_draining(&self) -> bool {
        self.drain.borrow().running
    }

    pub fn drain_pending(&self) -> bool {
        self.drain.borrow().pending
    }

    /// Wait until no drain is in progress.
    pub async fn drain_idle(&self) {
        let mut rx = self.drain.subscribe();
        // The sender lives as long as `self`, so this only errors during teardown
        let _ = rx.wait_for(|drain| !drain.running).await;
    }

    pub fn shutdown(&self) {
        info!("Network state shutting down");
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
