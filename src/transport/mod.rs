//! Abstract store transport.
//!
//! The store core talks to the backing KV service exclusively through
//! [`Transport`]: point/range reads, previous-KV puts and deletes,
//! version-compare transactions, and revision-ordered watch streams. Concrete
//! bindings (gRPC or embedded) live with the service integration, not here.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::TransportError;

/// A single key-value record as reported by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    /// Per-key modification counter.
    pub version: i64,
    /// Store-global revision at which this record was last modified.
    pub mod_revision: i64,
}

/// Point or range read request.
#[derive(Debug, Clone, Default)]
pub struct RangeRequest {
    pub key: String,
    /// Treat `key` as a prefix and return every record under it.
    pub prefix: bool,
    /// Allow a serializable (possibly stale) read.
    pub serializable: bool,
    /// If positive, read the store as of this revision.
    pub revision: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    pub count: i64,
    pub kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub value: Bytes,
    /// Return the record this put replaced, if any.
    pub prev_kv: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PutResponse {
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub key: String,
    /// Return the records this delete removed.
    pub prev_kv: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteResponse {
    pub deleted: i64,
    pub prev_kvs: Vec<KeyValue>,
}

/// Store-native comparison predicate.
#[derive(Debug, Clone)]
pub struct Compare {
    pub key: String,
    pub result: CmpResult,
    pub target: CmpTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpResult {
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpTarget {
    /// Compare against the record's per-key version. Version 0 means the key
    /// does not exist.
    Version(i64),
}

/// Operation executed when a transaction's comparisons all hold.
#[derive(Debug, Clone)]
pub enum TxnOp {
    Put(PutRequest),
}

#[derive(Debug, Clone)]
pub struct TxnRequest {
    pub compares: Vec<Compare>,
    pub success: Vec<TxnOp>,
}

#[derive(Debug, Clone)]
pub enum TxnOpResponse {
    Put(PutResponse),
}

#[derive(Debug, Clone, Default)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub responses: Vec<TxnOpResponse>,
}

#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub key: String,
    /// Watch every key under `key` instead of the single record.
    pub prefix: bool,
    /// Ask the store for periodic liveness batches on a quiet stream.
    pub progress_notify: bool,
    /// Ask the store for an explicit confirmation batch once the stream is
    /// established.
    pub created_notify: bool,
    /// If positive, start the stream at this store revision.
    pub start_revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub kv: KeyValue,
}

/// One message from a watch stream.
///
/// `created` and `progress_notify` batches carry no events; they confirm the
/// stream is established or still alive.
#[derive(Debug, Clone, Default)]
pub struct WatchBatch {
    pub created: bool,
    pub progress_notify: bool,
    pub events: Vec<WatchEvent>,
}

/// Receiving half of an upstream watch.
///
/// Dropping the stream cancels the watch on the transport side.
pub struct WatchStream {
    rx: mpsc::Receiver<WatchBatch>,
}

impl WatchStream {
    pub fn new(rx: mpsc::Receiver<WatchBatch>) -> Self {
        Self { rx }
    }

    /// Next batch, or `None` once the server half has gone away.
    pub async fn recv(&mut self) -> Option<WatchBatch> {
        self.rx.recv().await
    }
}

/// Capabilities the store core requires from the backing KV service.
///
/// All implementations must be `Send + Sync`; the store issues calls
/// concurrently from request tasks and watch tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Point or range read.
    async fn range(
        &self,
        req: RangeRequest,
    ) -> Result<RangeResponse, TransportError>;

    /// Write one record.
    async fn put(
        &self,
        req: PutRequest,
    ) -> Result<PutResponse, TransportError>;

    /// Delete one record (or none, if absent).
    async fn delete_range(
        &self,
        req: DeleteRequest,
    ) -> Result<DeleteResponse, TransportError>;

    /// Atomic compare-then-mutate.
    async fn txn(
        &self,
        req: TxnRequest,
    ) -> Result<TxnResponse, TransportError>;

    /// Open a revision-ordered event stream for a key or prefix.
    async fn watch(
        &self,
        req: WatchRequest,
    ) -> Result<WatchStream, TransportError>;
}
