//! Error taxonomy for the metakv client.
//!
//! Operation-level failures (`Error`) are kept separate from transport-level
//! failures (`TransportError`); the store maps the latter into the former at
//! the call sites that know whether a cached fallback applies.

use std::time::Duration;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key absent from the store. Never retried.
    #[error("key not found")]
    NotFound,

    /// Compare-and-set comparator failed against the stored version.
    #[error("version mismatch")]
    VersionMismatch,

    /// `set_if_not_exists` found the key already present.
    #[error("key already exists")]
    AlreadyExists,

    /// A transaction's aggregated condition set evaluated false.
    #[error("condition check failed")]
    ConditionCheckFailed,

    /// `history` arguments violate `0 <= from <= to`.
    #[error("invalid version range")]
    InvalidHistoryVersion,

    /// `history` could not locate an intermediate revision it walked to.
    #[error("could not find version {version} for key {key}")]
    MissingHistoryVersion { key: String, version: i64 },

    /// A commit condition carries a target the store does not handle.
    #[error("unknown condition target type")]
    UnknownTargetType,

    /// A commit condition carries a comparison the store does not handle.
    #[error("unknown condition compare type")]
    UnknownCompareType,

    /// A commit operation carries a kind the store does not handle.
    #[error("unknown operation type")]
    UnknownOpType,

    /// The store reported a succeeded transaction with no Put response body.
    #[error("nil put response from store")]
    NilPutResponse,

    /// The watchable was closed; no further subscriptions are accepted.
    #[error("watchable is closed")]
    WatchClosed,

    /// A key is already watched with a different scope (single vs prefix).
    #[error("watchable type mismatch for key {0}")]
    WatchTypeMismatch(String),

    /// No registry entry exists for a key the watch manager reported on.
    #[error("no watchable found for key {0}")]
    WatchableNotFound(String),

    /// Invalid store configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Anything the transport surfaced.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload encoding failed.
    #[error(transparent)]
    Encode(#[from] prost::EncodeError),

    /// Payload decoding failed.
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
}

impl Error {
    /// True for errors the retrier must not spin on.
    pub(crate) fn is_non_retryable(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// Failures surfaced by the underlying store transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Endpoint unreachable or refusing requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Per-request deadline exceeded.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream watch stream ended or was cancelled by the server.
    #[error("watch stream closed")]
    StreamClosed,

    /// gRPC status from the store.
    #[error(transparent)]
    Grpc(#[from] Box<tonic::Status>),

    /// Connection-level gRPC failure.
    #[error(transparent)]
    Connection(#[from] Box<tonic::transport::Error>),
}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        TransportError::Grpc(Box::new(status))
    }
}

impl From<tonic::transport::Error> for TransportError {
    fn from(err: tonic::transport::Error) -> Self {
        TransportError::Connection(Box::new(err))
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Transport(status.into())
    }
}
