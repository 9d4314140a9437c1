//! Shared test fixtures: a protobuf payload type and an in-memory transport
//! with etcd-style semantics (global revision counter, per-key versions,
//! version-compare transactions, revision-ordered watch streams).

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::transport::DeleteRequest;
use crate::transport::DeleteResponse;
use crate::transport::EventKind;
use crate::transport::KeyValue;
use crate::transport::PutRequest;
use crate::transport::PutResponse;
use crate::transport::RangeRequest;
use crate::transport::RangeResponse;
use crate::transport::Transport;
use crate::transport::TxnOp;
use crate::transport::TxnOpResponse;
use crate::transport::TxnRequest;
use crate::transport::TxnResponse;
use crate::transport::WatchBatch;
use crate::transport::WatchEvent;
use crate::transport::WatchRequest;
use crate::transport::WatchStream;

/// Minimal protobuf payload used by store tests.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TestConfig {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(uint64, tag = "2")]
    pub port: u64,
}

impl TestConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            port: 9081,
        }
    }
}

#[derive(Clone)]
struct StoredKv {
    value: Bytes,
    version: i64,
    mod_revision: i64,
}

impl StoredKv {
    fn to_key_value(
        &self,
        key: &str,
    ) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: self.value.clone(),
            version: self.version,
            mod_revision: self.mod_revision,
        }
    }
}

struct Watcher {
    key: String,
    prefix: bool,
    tx: mpsc::Sender<WatchBatch>,
}

impl Watcher {
    fn matches(
        &self,
        key: &str,
    ) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

#[derive(Default)]
struct MemState {
    revision: i64,
    live: BTreeMap<String, StoredKv>,
    /// Every put ever applied, for at-revision reads.
    history: Vec<KeyValue>,
    watchers: Vec<Watcher>,
}

impl MemState {
    fn next_revision(&mut self) -> i64 {
        self.revision += 1;
        self.revision
    }

    fn apply_put(
        &mut self,
        key: &str,
        value: Bytes,
    ) -> (KeyValue, Option<KeyValue>) {
        let prev = self.live.get(key).map(|kv| kv.to_key_value(key));

        let revision = self.next_revision();
        let stored = StoredKv {
            value,
            version: prev.as_ref().map_or(1, |p| p.version + 1),
            mod_revision: revision,
        };
        let current = stored.to_key_value(key);

        self.live.insert(key.to_string(), stored);
        self.history.push(current.clone());

        (current, prev)
    }

    fn broadcast(
        &mut self,
        kind: EventKind,
        kv: KeyValue,
    ) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in &self.watchers {
            if !watcher.matches(&kv.key) {
                continue;
            }
            let _ = watcher.tx.try_send(WatchBatch {
                events: vec![WatchEvent {
                    kind,
                    kv: kv.clone(),
                }],
                ..Default::default()
            });
        }
    }
}

/// In-memory stand-in for an etcd-class store.
pub struct MemoryTransport {
    state: Mutex<MemState>,
    failing: AtomicBool,
    watches_opened: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemState::default()),
            failing: AtomicBool::new(false),
            watches_opened: AtomicUsize::new(0),
        })
    }

    /// Sever or restore the transport; a failing transport rejects every
    /// call.
    pub fn set_failing(
        &self,
        failing: bool,
    ) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Total number of watch streams ever opened.
    pub fn watches_opened(&self) -> usize {
        self.watches_opened.load(Ordering::SeqCst)
    }

    /// Number of currently connected watch streams.
    pub fn live_watch_count(&self) -> usize {
        let mut state = self.state.lock();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    /// Keys currently stored, fully qualified.
    pub fn live_keys(&self) -> Vec<String> {
        self.state.lock().live.keys().cloned().collect()
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "injected transport failure".to_string(),
            ));
        }
        Ok(())
    }

    /// State of `key` as of `revision`: the newest put at or before it.
    fn range_at_revision(
        state: &MemState,
        key: &str,
        revision: i64,
    ) -> RangeResponse {
        let kv = state
            .history
            .iter()
            .rev()
            .find(|kv| kv.key == key && kv.mod_revision <= revision)
            .cloned();

        RangeResponse {
            count: kv.is_some() as i64,
            kvs: kv.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn range(
        &self,
        req: RangeRequest,
    ) -> Result<RangeResponse, TransportError> {
        self.check_available()?;

        let state = self.state.lock();

        if req.revision > 0 {
            return Ok(Self::range_at_revision(&state, &req.key, req.revision));
        }

        let kvs: Vec<KeyValue> = if req.prefix {
            state
                .live
                .iter()
                .filter(|(key, _)| key.starts_with(&req.key))
                .map(|(key, kv)| kv.to_key_value(key))
                .collect()
        } else {
            state
                .live
                .get(&req.key)
                .map(|kv| kv.to_key_value(&req.key))
                .into_iter()
                .collect()
        };

        Ok(RangeResponse {
            count: kvs.len() as i64,
            kvs,
        })
    }

    async fn put(
        &self,
        req: PutRequest,
    ) -> Result<PutResponse, TransportError> {
        self.check_available()?;

        let mut state = self.state.lock();
        let (current, prev) = state.apply_put(&req.key, req.value);
        state.broadcast(EventKind::Put, current);

        Ok(PutResponse {
            prev_kv: if req.prev_kv { prev } else { None },
        })
    }

    async fn delete_range(
        &self,
        req: DeleteRequest,
    ) -> Result<DeleteResponse, TransportError> {
        self.check_available()?;

        let mut state = self.state.lock();

        let Some(prev) = state.live.remove(&req.key).map(|kv| kv.to_key_value(&req.key)) else {
            return Ok(DeleteResponse::default());
        };

        let revision = state.next_revision();
        state.broadcast(
            EventKind::Delete,
            KeyValue {
                key: req.key.clone(),
                value: Bytes::new(),
                version: 0,
                mod_revision: revision,
            },
        );

        Ok(DeleteResponse {
            deleted: 1,
            prev_kvs: if req.prev_kv { vec![prev] } else { Vec::new() },
        })
    }

    async fn txn(
        &self,
        req: TxnRequest,
    ) -> Result<TxnResponse, TransportError> {
        self.check_available()?;

        let mut state = self.state.lock();

        let succeeded = req.compares.iter().all(|cmp| {
            let crate::transport::CmpTarget::Version(expected) = cmp.target;
            let actual = state.live.get(&cmp.key).map_or(0, |kv| kv.version);
            match cmp.result {
                crate::transport::CmpResult::Equal => actual == expected,
            }
        });

        if !succeeded {
            return Ok(TxnResponse {
                succeeded: false,
                responses: Vec::new(),
            });
        }

        let mut responses = Vec::with_capacity(req.success.len());
        for op in req.success {
            match op {
                TxnOp::Put(put) => {
                    let (current, prev) = state.apply_put(&put.key, put.value);
                    state.broadcast(EventKind::Put, current);
                    responses.push(TxnOpResponse::Put(PutResponse {
                        prev_kv: if put.prev_kv { prev } else { None },
                    }));
                }
            }
        }

        Ok(TxnResponse {
            succeeded: true,
            responses,
        })
    }

    async fn watch(
        &self,
        req: WatchRequest,
    ) -> Result<WatchStream, TransportError> {
        self.check_available()?;

        let (tx, rx) = mpsc::channel(64);

        if req.created_notify {
            let _ = tx.try_send(WatchBatch {
                created: true,
                ..Default::default()
            });
        }

        let mut state = self.state.lock();

        // Replay history from the pinned revision, oldest first.
        if req.start_revision > 0 {
            let replay: Vec<WatchEvent> = state
                .history
                .iter()
                .filter(|kv| {
                    kv.mod_revision >= req.start_revision
                        && if req.prefix {
                            kv.key.starts_with(&req.key)
                        } else {
                            kv.key == req.key
                        }
                })
                .map(|kv| WatchEvent {
                    kind: EventKind::Put,
                    kv: kv.clone(),
                })
                .collect();
            if !replay.is_empty() {
                let _ = tx.try_send(WatchBatch {
                    events: replay,
                    ..Default::default()
                });
            }
        }

        state.watchers.push(Watcher {
            key: req.key,
            prefix: req.prefix,
            tx,
        });
        self.watches_opened.fetch_add(1, Ordering::SeqCst);

        Ok(WatchStream::new(rx))
    }
}
