//! Per-key broadcaster with latest-only delivery.
//!
//! A [`Watchable`] holds the newest observed snapshot for one key (or one
//! prefix) and fans updates out to any number of subscribers. Each
//! subscriber reads from its own single-slot cell, so a slow subscriber
//! never blocks the publisher; it simply skips intermediate snapshots and
//! observes the latest one.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::watch;

use crate::errors::Error;
use crate::errors::Result;
use crate::kv::Value;

/// Map of fully-qualified key to its latest value, delivered as a whole
/// snapshot by prefix watches.
pub type PrefixSnapshot = HashMap<String, Value>;

/// Decides whether an incoming snapshot replaces the currently held one.
pub trait Supersedes: Clone + Send + Sync + 'static {
    fn supersedes(
        &self,
        current: &Self,
    ) -> bool;
}

impl Supersedes for Value {
    fn supersedes(
        &self,
        current: &Self,
    ) -> bool {
        self.is_newer(current)
    }
}

impl Supersedes for PrefixSnapshot {
    /// A prefix snapshot replaces the current one when the key set changed
    /// or any entry is strictly newer than its counterpart.
    fn supersedes(
        &self,
        current: &Self,
    ) -> bool {
        if self.len() != current.len() {
            return true;
        }

        self.iter().any(|(key, value)| match current.get(key) {
            Some(existing) => value.is_newer(existing),
            None => true,
        })
    }
}

/// Broadcaster for one key or prefix.
pub struct Watchable<T> {
    tx: watch::Sender<Option<T>>,
    closed: AtomicBool,
}

impl<T: Supersedes> Watchable<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a subscriber, handing back the current snapshot as its
    /// first delivery plus a handle for the ones that follow.
    pub fn subscribe(&self) -> Result<(Option<T>, Subscription<T>)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::WatchClosed);
        }

        let mut rx = self.tx.subscribe();
        let initial = rx.borrow_and_update().clone();

        Ok((initial, Subscription { rx }))
    }

    /// Latest snapshot held by the broadcaster.
    pub fn current(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Proposes `next` as the new snapshot.
    ///
    /// `None` is the deletion tombstone and always propagates; `Some` is
    /// applied only when it strictly supersedes the held snapshot. Returns
    /// whether subscribers were notified.
    pub fn update(
        &self,
        next: Option<T>,
    ) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        self.tx.send_if_modified(move |current| match next {
            None => {
                if current.is_none() {
                    return false;
                }
                *current = None;
                true
            }
            Some(incoming) => {
                let replace = match current.as_ref() {
                    Some(held) => incoming.supersedes(held),
                    None => true,
                };
                if replace {
                    *current = Some(incoming);
                }
                replace
            }
        })
    }

    /// Number of live subscriptions.
    pub fn num_subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Marks the broadcaster terminal: no further subscriptions or updates
    /// are accepted. Subscribers observe the end of their stream once the
    /// registry drops its reference.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl<T: Supersedes> Default for Watchable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single subscriber's handle. Dropping it unregisters the subscriber.
pub struct Subscription<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next delivered snapshot.
    ///
    /// Skips any intermediate snapshots published since the last call and
    /// yields only the latest. Returns `None` once the watchable has been
    /// closed and dropped by the registry.
    pub async fn next(&mut self) -> Option<Option<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Unregisters this subscriber.
    pub fn close(self) {}
}
