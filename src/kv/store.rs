use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use crate::cache::ValueCache;
use crate::config::Options;
use crate::errors::Error;
use crate::errors::Result;
use crate::errors::TransportError;
use crate::kv::ops::CompareTarget;
use crate::kv::ops::CompareType;
use crate::kv::ops::Condition;
use crate::kv::ops::OpResponse;
use crate::kv::ops::Operation;
use crate::kv::ops::TxnResult;
use crate::kv::Value;
use crate::metrics::STORE_GET_ERRORS;
use crate::metrics::STORE_PUT_ERRORS;
use crate::metrics::STORE_TXN_ERRORS;
use crate::transport::CmpResult;
use crate::transport::CmpTarget;
use crate::transport::Compare;
use crate::transport::DeleteRequest;
use crate::transport::EventKind;
use crate::transport::PutRequest;
use crate::transport::RangeRequest;
use crate::transport::Transport;
use crate::transport::TxnOp;
use crate::transport::TxnOpResponse;
use crate::transport::TxnRequest;
use crate::transport::WatchEvent;
use crate::utils::async_task::retry_with_backoff;
use crate::utils::async_task::TaskError;
use crate::watch::manager::TickAndStopFn;
use crate::watch::manager::UpdateFn;
use crate::watch::manager::WatchManager;
use crate::watch::manager::WatchScope;
use crate::watch::PrefixSnapshot;
use crate::watch::Subscription;
use crate::watch::Watchable;

/// Version a key holds before its first write.
const VERSION_ZERO: i64 = 0;

/// One registry slot: a key is watched either as a single record or as a
/// prefix, never both.
#[derive(Clone)]
enum WatchEntry {
    Single(Arc<Watchable<Value>>),
    Prefix(Arc<Watchable<PrefixSnapshot>>),
}

impl WatchEntry {
    fn num_subscribers(&self) -> usize {
        match self {
            WatchEntry::Single(w) => w.num_subscribers(),
            WatchEntry::Prefix(w) => w.num_subscribers(),
        }
    }

    fn close(&self) {
        match self {
            WatchEntry::Single(w) => w.close(),
            WatchEntry::Prefix(w) => w.close(),
        }
    }
}

/// Watchable, transactional KV client over an etcd-class store.
///
/// Every request carries the configured key prefix; the shadow cache and all
/// subscriber-visible events use fully-qualified keys. Reads fall back to
/// the cache when the transport fails; watches multiplex one upstream stream
/// per key across any number of in-process subscribers.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    opts: Options,
    transport: Arc<dyn Transport>,
    watchables: RwLock<HashMap<String, WatchEntry>>,
    cache: Arc<ValueCache>,
    wm: WatchManager,
    shutdown_tx: watch::Sender<bool>,
}

impl Store {
    /// Builds the store: validates options, loads the shadow cache (when
    /// configured) and wires the watch manager.
    pub async fn new(
        transport: Arc<dyn Transport>,
        opts: Options,
    ) -> Result<Self> {
        opts.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = ValueCache::open(
            opts.cache_file(),
            opts.new_directory_mode,
            shutdown_rx.clone(),
        )
        .await;

        // The manager only holds callbacks into the store, never the store
        // itself; a weak reference breaks the ownership cycle.
        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let update_weak = weak.clone();
            let update_fn: UpdateFn = Arc::new(move |key: String, events: Vec<WatchEvent>| {
                let weak = update_weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.handle_update(key, events).await,
                        None => Ok(()),
                    }
                }
                .boxed()
            });

            let tick_weak = weak.clone();
            let tick_and_stop: TickAndStopFn = Arc::new(move |key: &str| match tick_weak.upgrade() {
                Some(inner) => inner.tick_and_stop(key),
                None => true,
            });

            let wm = WatchManager::new(
                transport.clone(),
                &opts,
                update_fn,
                tick_and_stop,
                shutdown_rx,
            );

            StoreInner {
                opts,
                transport,
                watchables: RwLock::new(HashMap::new()),
                cache,
                wm,
                shutdown_tx,
            }
        });

        Ok(Self { inner })
    }

    /// Latest value for `key`.
    ///
    /// Falls back to the shadow cache only when the store is unreachable; a
    /// key the store reports absent is absent, and its cache entry is
    /// dropped.
    pub async fn get(
        &self,
        key: &str,
    ) -> Result<Value> {
        self.inner.get_fq(&self.inner.opts.apply_prefix(key)).await
    }

    /// Every record under `prefix`, keyed by fully-qualified key.
    ///
    /// Prefix reads are never cached.
    pub async fn get_for_prefix(
        &self,
        prefix: &str,
    ) -> Result<HashMap<String, Value>> {
        self.inner
            .get_for_prefix_fq(&self.inner.opts.apply_prefix(prefix))
            .await
    }

    /// Values of `key` for versions in `[from, to)`, ascending.
    ///
    /// Slot `i` holds version `from + i`. The result is sparse: versions the
    /// store no longer reaches stay `None`, and when the key's newest version
    /// is below `to` the trailing slots stay `None` as well.
    pub async fn history(
        &self,
        key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Option<Value>>> {
        self.inner.history(key, from, to).await
    }

    /// Writes `msg` under `key`, returning the key's new version.
    pub async fn set<M>(
        &self,
        key: &str,
        msg: &M,
    ) -> Result<i64>
    where
        M: prost::Message,
    {
        self.inner
            .set_encoded(key, Bytes::from(msg.encode_to_vec()))
            .await
    }

    /// Writes `msg` only if `key` does not exist yet.
    pub async fn set_if_not_exists<M>(
        &self,
        key: &str,
        msg: &M,
    ) -> Result<i64>
    where
        M: prost::Message,
    {
        match self.check_and_set(key, VERSION_ZERO, msg).await {
            Err(Error::VersionMismatch) => Err(Error::AlreadyExists),
            other => other,
        }
    }

    /// Writes `msg` only if `key` is currently at `version`.
    ///
    /// Returns `version + 1` on success.
    pub async fn check_and_set<M>(
        &self,
        key: &str,
        version: i64,
        msg: &M,
    ) -> Result<i64>
    where
        M: prost::Message,
    {
        self.inner
            .check_and_set_encoded(key, version, Bytes::from(msg.encode_to_vec()))
            .await
    }

    /// Removes `key`, returning the value it held.
    pub async fn delete(
        &self,
        key: &str,
    ) -> Result<Value> {
        self.inner.delete(key).await
    }

    /// Executes `ops` in one transaction, guarded by `conditions`.
    pub async fn commit(
        &self,
        conditions: Vec<Condition>,
        ops: Vec<Operation>,
    ) -> Result<TxnResult> {
        self.inner.commit(conditions, ops).await
    }

    /// Subscribes to changes of a single key.
    ///
    /// The first call per fully-qualified key opens the upstream watch;
    /// subsequent calls share it. Returns the current snapshot (None until
    /// the watch has observed the key) and the subscription handle.
    pub fn watch(
        &self,
        key: &str,
    ) -> Result<(Option<Value>, Subscription<Value>)> {
        let fq = self.inner.opts.apply_prefix(key);
        self.inner.subscribe_single(fq)
    }

    /// Subscribes to changes of every key under a prefix. Deliveries are
    /// whole-snapshot replacements.
    pub fn watch_for_prefix(
        &self,
        prefix: &str,
    ) -> Result<(Option<PrefixSnapshot>, Subscription<PrefixSnapshot>)> {
        let fq = self.inner.opts.apply_prefix(prefix);
        self.inner.subscribe_prefix(fq)
    }

    /// Stops watch tasks, closes every watchable and flushes the shadow
    /// cache one last time.
    pub fn close(&self) {
        let _ = self.inner.shutdown_tx.send(true);

        let mut watchables = self.inner.watchables.write();
        for entry in watchables.values() {
            entry.close();
        }
        watchables.clear();
    }
}

impl StoreInner {
    /// Applies the configured per-request deadline to one transport call.
    async fn request<T, F>(
        &self,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, TransportError>>,
    {
        match self.opts.request_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::Transport(TransportError::Timeout(deadline))),
            },
            None => fut.await.map_err(Error::from),
        }
    }

    async fn get_fq(
        &self,
        key: &str,
    ) -> Result<Value> {
        let req = RangeRequest {
            key: key.to_string(),
            serializable: self.opts.enable_fast_gets,
            ..Default::default()
        };

        let resp = match self.request(self.transport.range(req)).await {
            Ok(resp) => resp,
            Err(e) => {
                STORE_GET_ERRORS.inc();
                if let Some(cached) = self.cache.get(key) {
                    debug!(key, "store unreachable, serving cached value");
                    return Ok(cached);
                }
                return Err(e);
            }
        };

        if resp.count == 0 {
            // The store is the authority; drop any stale cache entry.
            self.cache.delete(key);
            return Err(Error::NotFound);
        }

        let value = Value::from(&resp.kvs[0]);
        self.cache.merge_if_newer(key, &value);

        Ok(value)
    }

    async fn get_for_prefix_fq(
        &self,
        prefix: &str,
    ) -> Result<PrefixSnapshot> {
        let req = RangeRequest {
            key: prefix.to_string(),
            prefix: true,
            serializable: self.opts.enable_fast_gets,
            ..Default::default()
        };

        let resp = match self.request(self.transport.range(req)).await {
            Ok(resp) => resp,
            Err(e) => {
                STORE_GET_ERRORS.inc();
                return Err(e);
            }
        };

        if resp.count == 0 {
            return Err(Error::NotFound);
        }

        Ok(resp
            .kvs
            .iter()
            .map(|kv| (kv.key.clone(), Value::from(kv)))
            .collect())
    }

    async fn history(
        &self,
        key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Option<Value>>> {
        if from > to || from < 0 || to < 0 {
            return Err(Error::InvalidHistoryVersion);
        }

        if from == to {
            return Ok(Vec::new());
        }

        let fq = self.opts.apply_prefix(key);

        let resp = self
            .request(self.transport.range(RangeRequest {
                key: fq.clone(),
                ..Default::default()
            }))
            .await?;

        if resp.count == 0 {
            return Err(Error::NotFound);
        }

        let mut num_values = to - from;

        let latest = &resp.kvs[0];
        let mut version = latest.version;
        let mut mod_revision = latest.mod_revision;

        if version < from {
            // no value available in the requested version range
            return Ok(Vec::new());
        }

        if version - from + 1 < num_values {
            num_values = version - from + 1;
        }

        let mut values: Vec<Option<Value>> = vec![None; num_values as usize];

        if version < to {
            values[(version - from) as usize] = Some(Value::from(latest));
        }

        // Walk backwards through modification revisions until the lower
        // bound is reached. Version 1 is the oldest record a key can have,
        // so the walk also stops there when `from` is 0.
        while version > from && version > 1 {
            let resp = self
                .request(self.transport.range(RangeRequest {
                    key: fq.clone(),
                    revision: mod_revision - 1,
                    ..Default::default()
                }))
                .await?;

            if resp.count == 0 {
                return Err(Error::MissingHistoryVersion {
                    key: key.to_string(),
                    version: version - 1,
                });
            }

            let kv = &resp.kvs[0];
            mod_revision = kv.mod_revision;
            version = kv.version;
            if version < to {
                values[(version - from) as usize] = Some(Value::from(kv));
            }
        }

        Ok(values)
    }

    async fn set_encoded(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<i64> {
        let req = PutRequest {
            key: self.opts.apply_prefix(key),
            value,
            prev_kv: true,
        };

        let resp = match self.request(self.transport.put(req)).await {
            Ok(resp) => resp,
            Err(e) => {
                STORE_PUT_ERRORS.inc();
                return Err(e);
            }
        };

        // No previous record means this put created the key.
        Ok(resp
            .prev_kv
            .map_or(VERSION_ZERO + 1, |prev| prev.version + 1))
    }

    async fn check_and_set_encoded(
        &self,
        key: &str,
        version: i64,
        value: Bytes,
    ) -> Result<i64> {
        let fq = self.opts.apply_prefix(key);
        let req = TxnRequest {
            compares: vec![Compare {
                key: fq.clone(),
                result: CmpResult::Equal,
                target: CmpTarget::Version(version),
            }],
            success: vec![TxnOp::Put(PutRequest {
                key: fq,
                value,
                prev_kv: false,
            })],
        };

        let resp = match self.request(self.transport.txn(req)).await {
            Ok(resp) => resp,
            Err(e) => {
                STORE_TXN_ERRORS.inc();
                return Err(e);
            }
        };

        if !resp.succeeded {
            return Err(Error::VersionMismatch);
        }

        Ok(version + 1)
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<Value> {
        let fq = self.opts.apply_prefix(key);

        let resp = self
            .request(self.transport.delete_range(DeleteRequest {
                key: fq.clone(),
                prev_kv: true,
            }))
            .await?;

        if resp.deleted == 0 {
            return Err(Error::NotFound);
        }

        let prev = Value::from(&resp.prev_kvs[0]);

        self.cache.delete(&fq);

        Ok(prev)
    }

    fn process_condition(
        &self,
        condition: &Condition,
    ) -> Result<Compare> {
        let target = match condition.target() {
            CompareTarget::Version => CmpTarget::Version(condition.value()),
            #[allow(unreachable_patterns)]
            _ => return Err(Error::UnknownTargetType),
        };

        let result = match condition.compare() {
            CompareType::Equal => CmpResult::Equal,
            #[allow(unreachable_patterns)]
            _ => return Err(Error::UnknownCompareType),
        };

        Ok(Compare {
            key: self.opts.apply_prefix(condition.key()),
            result,
            target,
        })
    }

    fn process_op(
        &self,
        op: &Operation,
    ) -> Result<TxnOp> {
        match op {
            Operation::Set { key, value } => Ok(TxnOp::Put(PutRequest {
                key: self.opts.apply_prefix(key),
                value: value.clone(),
                prev_kv: true,
            })),
            #[allow(unreachable_patterns)]
            _ => Err(Error::UnknownOpType),
        }
    }

    async fn commit(
        &self,
        conditions: Vec<Condition>,
        ops: Vec<Operation>,
    ) -> Result<TxnResult> {
        let mut compares = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            compares.push(self.process_condition(condition)?);
        }

        let mut success = Vec::with_capacity(ops.len());
        for op in &ops {
            success.push(self.process_op(op)?);
        }

        let resp = match self
            .request(self.transport.txn(TxnRequest { compares, success }))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                STORE_TXN_ERRORS.inc();
                return Err(e);
            }
        };

        if !resp.succeeded {
            return Err(Error::ConditionCheckFailed);
        }

        let mut responses = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            match op {
                Operation::Set { key, .. } => {
                    let put = match resp.responses.get(i) {
                        Some(TxnOpResponse::Put(put)) => put,
                        None => return Err(Error::NilPutResponse),
                    };

                    let version = put
                        .prev_kv
                        .as_ref()
                        .map_or(VERSION_ZERO + 1, |prev| prev.version + 1);
                    responses.push(OpResponse::new(key.clone(), version));
                }
            }
        }

        Ok(TxnResult::new(responses))
    }

    fn subscribe_single(
        &self,
        fq: String,
    ) -> Result<(Option<Value>, Subscription<Value>)> {
        // Fast path: the watchable already exists.
        {
            let watchables = self.watchables.read();
            match watchables.get(&fq) {
                Some(WatchEntry::Single(w)) => return w.subscribe(),
                Some(WatchEntry::Prefix(_)) => return Err(Error::WatchTypeMismatch(fq)),
                None => {}
            }
        }

        let mut watchables = self.watchables.write();
        if let Some(entry) = watchables.get(&fq) {
            return match entry {
                WatchEntry::Single(w) => w.subscribe(),
                WatchEntry::Prefix(_) => Err(Error::WatchTypeMismatch(fq)),
            };
        }

        let watchable = Arc::new(Watchable::new());
        // Subscribe before the registry entry becomes visible to
        // tick_and_stop, so the new entry is never seen idle.
        let subscription = watchable.subscribe();
        watchables.insert(fq.clone(), WatchEntry::Single(watchable));
        self.wm.watch(fq, WatchScope::Key);
        subscription
    }

    fn subscribe_prefix(
        &self,
        fq: String,
    ) -> Result<(Option<PrefixSnapshot>, Subscription<PrefixSnapshot>)> {
        {
            let watchables = self.watchables.read();
            match watchables.get(&fq) {
                Some(WatchEntry::Prefix(w)) => return w.subscribe(),
                Some(WatchEntry::Single(_)) => return Err(Error::WatchTypeMismatch(fq)),
                None => {}
            }
        }

        let mut watchables = self.watchables.write();
        if let Some(entry) = watchables.get(&fq) {
            return match entry {
                WatchEntry::Prefix(w) => w.subscribe(),
                WatchEntry::Single(_) => Err(Error::WatchTypeMismatch(fq)),
            };
        }

        let watchable = Arc::new(Watchable::new());
        let subscription = watchable.subscribe();
        watchables.insert(fq.clone(), WatchEntry::Prefix(watchable));
        self.wm.watch(fq, WatchScope::Prefix);
        subscription
    }

    /// Liveness callback from the watch manager. True means the key went
    /// quiescent and its upstream watch must stop.
    fn tick_and_stop(
        &self,
        key: &str,
    ) -> bool {
        // fast path
        {
            let watchables = self.watchables.read();
            match watchables.get(key) {
                None => {
                    warn!(key, "unexpected: key is already cleaned up");
                    return true;
                }
                Some(entry) => {
                    if entry.num_subscribers() != 0 {
                        return false;
                    }
                }
            }
        }

        // slow path: re-check under the write lock before tearing down
        let mut watchables = self.watchables.write();
        let Some(entry) = watchables.get(key) else {
            warn!(key, "unexpected: key is already cleaned up");
            return true;
        };

        if entry.num_subscribers() != 0 {
            // a new subscriber arrived, keep the watch
            return false;
        }

        entry.close();
        watchables.remove(key);
        true
    }

    /// Retried point read used to (re)seed a watch that reported no events.
    async fn get_with_retry(
        &self,
        fq: &str,
    ) -> Result<Value> {
        retry_with_backoff(self.opts.retry_policy, || async {
            self.get_fq(fq).await.map_err(TaskError::from)
        })
        .await
    }

    async fn get_for_prefix_with_retry(
        &self,
        fq: &str,
    ) -> Result<PrefixSnapshot> {
        retry_with_backoff(self.opts.retry_policy, || async {
            self.get_for_prefix_fq(fq).await.map_err(TaskError::from)
        })
        .await
    }

    /// Entry point for every event batch the watch manager delivers.
    async fn handle_update(
        &self,
        key: String,
        events: Vec<WatchEvent>,
    ) -> Result<()> {
        let entry = {
            let watchables = self.watchables.read();
            watchables.get(&key).cloned()
        };

        match entry {
            None => Err(Error::WatchableNotFound(key)),
            Some(WatchEntry::Single(watchable)) => self.update_single(&key, events, watchable).await,
            Some(WatchEntry::Prefix(watchable)) => self.update_prefix(&key, events, watchable).await,
        }
    }

    async fn update_single(
        &self,
        key: &str,
        events: Vec<WatchEvent>,
        watchable: Arc<Watchable<Value>>,
    ) -> Result<()> {
        let next = match events.last() {
            // Empty batch: the watch just (re)initialized or sent a progress
            // notification; reconcile from a cold read.
            None => match self.get_with_retry(key).await {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(key, error = %e, "seed read failed, leaving watch state untouched");
                    return Ok(());
                }
            },
            Some(event) if event.kind == EventKind::Delete => {
                self.cache.delete(key);
                None
            }
            Some(event) => {
                let value = Value::from(&event.kv);
                self.cache.merge_if_newer(key, &value);
                Some(value)
            }
        };

        // The watchable enforces the newer-only rule; the tombstone always
        // propagates.
        watchable.update(next);

        Ok(())
    }

    async fn update_prefix(
        &self,
        prefix: &str,
        events: Vec<WatchEvent>,
        watchable: Arc<Watchable<PrefixSnapshot>>,
    ) -> Result<()> {
        let (incoming, to_delete) = if events.is_empty() {
            match self.get_for_prefix_with_retry(prefix).await {
                Ok(values) => (values, Vec::new()),
                Err(e) => {
                    debug!(prefix, error = %e, "seed read failed, leaving watch state untouched");
                    return Ok(());
                }
            }
        } else {
            let mut values = PrefixSnapshot::new();
            let mut to_delete = Vec::new();
            for event in &events {
                match event.kind {
                    EventKind::Delete => to_delete.push(event.kv.key.clone()),
                    EventKind::Put => {
                        values.insert(event.kv.key.clone(), Value::from(&event.kv));
                    }
                }
            }
            (values, to_delete)
        };

        let current = watchable.current().unwrap_or_default();
        if current.is_empty() && incoming.is_empty() {
            return Ok(());
        }

        // Overlay incoming records, then drop tombstoned keys; the
        // watchable's replacement rule decides whether anything changed.
        let mut updated = current;
        updated.extend(incoming);
        for key in &to_delete {
            updated.remove(key);
        }

        watchable.update(Some(updated));

        Ok(())
    }
}
