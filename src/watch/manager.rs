//! Upstream watch lifecycle.
//!
//! The manager owns one transport watch stream per subscribed
//! fully-qualified key or prefix. Each stream lives in its own task that
//! (re)opens the watch, enforces the created-notify grace period,
//! proactively resets long-lived streams, and drives idle teardown through
//! the store's `tick_and_stop` callback. Event batches are handed to the
//! store's update callback untouched; nothing is dropped here.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::warn;

use crate::config::Options;
use crate::errors::Result;
use crate::transport::Transport;
use crate::transport::WatchEvent;
use crate::transport::WatchRequest;

/// Applies a batch of events (possibly empty) for a fully-qualified key.
pub(crate) type UpdateFn =
    Arc<dyn Fn(String, Vec<WatchEvent>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Liveness tick for a fully-qualified key; returning true tells the manager
/// the key is quiescent and its upstream watch must be torn down.
pub(crate) type TickAndStopFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Whether an upstream watch covers one record or a whole prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchScope {
    Key,
    Prefix,
}

pub(crate) struct WatchManager {
    transport: Arc<dyn Transport>,
    check_interval: Duration,
    init_timeout: Duration,
    reset_interval: Duration,
    start_revision: i64,
    update_fn: UpdateFn,
    tick_and_stop: TickAndStopFn,
    shutdown_rx: watch::Receiver<bool>,
}

impl WatchManager {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        opts: &Options,
        update_fn: UpdateFn,
        tick_and_stop: TickAndStopFn,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            check_interval: opts.watch_check_interval,
            init_timeout: opts.watch_init_timeout,
            reset_interval: opts.watch_reset_interval,
            start_revision: opts.watch_with_revision,
            update_fn,
            tick_and_stop,
            shutdown_rx,
        }
    }

    /// Spawns the watch task for `key`. The caller guarantees at most one
    /// live task per fully-qualified key (one registry entry, one task).
    pub(crate) fn watch(
        &self,
        key: String,
        scope: WatchScope,
    ) {
        let task = WatchTask {
            transport: self.transport.clone(),
            key,
            scope,
            check_interval: self.check_interval,
            init_timeout: self.init_timeout,
            reset_interval: self.reset_interval,
            start_revision: self.start_revision,
            update_fn: self.update_fn.clone(),
            tick_and_stop: self.tick_and_stop.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        };

        tokio::spawn(task.run());
    }
}

struct WatchTask {
    transport: Arc<dyn Transport>,
    key: String,
    scope: WatchScope,
    check_interval: Duration,
    init_timeout: Duration,
    reset_interval: Duration,
    start_revision: i64,
    update_fn: UpdateFn,
    tick_and_stop: TickAndStopFn,
    shutdown_rx: watch::Receiver<bool>,
}

impl WatchTask {
    async fn run(self) {
        let WatchTask {
            transport,
            key,
            scope,
            check_interval,
            init_timeout,
            reset_interval,
            start_revision,
            update_fn,
            tick_and_stop,
            mut shutdown_rx,
        } = self;

        let request = WatchRequest {
            key: key.clone(),
            prefix: scope == WatchScope::Prefix,
            progress_notify: true,
            created_notify: true,
            start_revision,
        };

        let mut check = tokio::time::interval_at(
            tokio::time::Instant::now() + check_interval,
            check_interval,
        );
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'reconnect: loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let mut stream = match transport.watch(request.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to open watch, will retry");
                    tokio::select! {
                        _ = shutdown_rx.changed() => return,
                        _ = check.tick() => {
                            if tick_and_stop(&key) {
                                debug!(key = %key, "watch quiescent, stopping");
                                return;
                            }
                        }
                    }
                    continue 'reconnect;
                }
            };

            // The created-notify must land within the init grace period;
            // a silent stream gets torn down and reopened.
            match timeout(init_timeout, stream.recv()).await {
                Ok(Some(batch)) if batch.created => {
                    if let Err(e) = update_fn(key.clone(), Vec::new()).await {
                        warn!(key = %key, error = %e, "seed update failed");
                    }
                }
                Ok(Some(batch)) => {
                    if let Err(e) = update_fn(key.clone(), batch.events).await {
                        warn!(key = %key, error = %e, "update failed");
                    }
                }
                Ok(None) => {
                    warn!(key = %key, "watch stream closed before created-notify");
                    continue 'reconnect;
                }
                Err(_) => {
                    warn!(key = %key, timeout = ?init_timeout, "watch init timed out, reopening");
                    continue 'reconnect;
                }
            }

            let reset = tokio::time::sleep(reset_interval);
            tokio::pin!(reset);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,

                    _ = &mut reset => {
                        debug!(key = %key, "proactive watch reset");
                        continue 'reconnect;
                    }

                    _ = check.tick() => {
                        if tick_and_stop(&key) {
                            debug!(key = %key, "watch quiescent, stopping");
                            return;
                        }
                    }

                    batch = stream.recv() => match batch {
                        Some(batch) => {
                            // A bad batch is logged and skipped; it never
                            // tears the watch down.
                            if let Err(e) = update_fn(key.clone(), batch.events).await {
                                warn!(key = %key, error = %e, "update failed");
                            }
                        }
                        None => {
                            warn!(key = %key, "watch stream severed, reopening");
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }
}
