//! Condition/operation language for [`commit`](super::Store::commit).
//!
//! Both enumerations are closed at this revision: conditions compare a key's
//! version for equality, and operations set a key to an encoded message. The
//! store still maps unhandled enumerants to explicit errors so the surface
//! can grow without silently misexecuting a transaction.

use bytes::Bytes;

/// What a [`Condition`] inspects on the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompareTarget {
    Version,
}

/// How a [`Condition`] compares against its expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompareType {
    Equal,
}

/// A single predicate in a transaction's If-set.
#[derive(Debug, Clone)]
pub struct Condition {
    key: String,
    target: CompareTarget,
    compare: CompareType,
    value: i64,
}

impl Condition {
    /// Require `key` to be at exactly `version`. Version 0 asserts the key
    /// does not exist.
    pub fn version_equals(
        key: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            key: key.into(),
            target: CompareTarget::Version,
            compare: CompareType::Equal,
            value: version,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> CompareTarget {
        self.target
    }

    pub fn compare(&self) -> CompareType {
        self.compare
    }

    pub fn value(&self) -> i64 {
        self.value
    }
}

/// A single mutation in a transaction's Then-set.
///
/// Payload encoding happens at construction; an `Operation` always carries
/// wire-ready bytes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Operation {
    Set { key: String, value: Bytes },
}

impl Operation {
    /// Set `key` to the encoded form of `msg`.
    pub fn set<M>(
        key: impl Into<String>,
        msg: &M,
    ) -> Self
    where
        M: prost::Message,
    {
        Operation::Set {
            key: key.into(),
            value: Bytes::from(msg.encode_to_vec()),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Operation::Set { key, .. } => key,
        }
    }
}

/// Per-operation outcome of a committed transaction.
#[derive(Debug, Clone)]
pub struct OpResponse {
    key: String,
    version: i64,
}

impl OpResponse {
    pub(crate) fn new(
        key: String,
        version: i64,
    ) -> Self {
        Self { key, version }
    }

    /// Caller-supplied (unprefixed) key of the operation.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Version the key holds after the transaction.
    pub fn version(&self) -> i64 {
        self.version
    }
}

/// Outcome of a committed transaction.
#[derive(Debug, Clone)]
pub struct TxnResult {
    responses: Vec<OpResponse>,
}

impl TxnResult {
    pub(crate) fn new(responses: Vec<OpResponse>) -> Self {
        Self { responses }
    }

    pub fn responses(&self) -> &[OpResponse] {
        &self.responses
    }
}
