use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::transport::KeyValue;

/// An immutable observation of a key's payload.
///
/// `version` is the store's per-key modification counter; `revision` is the
/// store-global counter at the modification. Ordering between two
/// observations of the same key uses revision whenever both sides carry one;
/// version is the fallback for observations that predate revision tracking
/// (for example entries reloaded from an old cache file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    #[serde(rename = "value")]
    payload: Bytes,

    #[serde(rename = "version")]
    version: i64,

    #[serde(rename = "revision", default)]
    revision: i64,
}

impl Value {
    pub fn new(
        payload: impl Into<Bytes>,
        version: i64,
        revision: i64,
    ) -> Self {
        Self {
            payload: payload.into(),
            version,
            revision,
        }
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Per-key modification counter.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Store-global revision of the observation, 0 when unknown.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// True when `self` strictly supersedes `other` for the same key.
    ///
    /// Revision is authoritative when both sides carry one; equal revisions
    /// are never newer.
    pub fn is_newer(
        &self,
        other: &Value,
    ) -> bool {
        if self.revision > 0 && other.revision > 0 {
            return self.revision > other.revision;
        }

        self.version > other.version
    }

    /// Decode the payload as a protobuf message.
    pub fn decode<M>(&self) -> Result<M, prost::DecodeError>
    where
        M: prost::Message + Default,
    {
        M::decode(self.payload.clone())
    }
}

impl From<&KeyValue> for Value {
    fn from(kv: &KeyValue) -> Self {
        Self::new(kv.value.clone(), kv.version, kv.mod_revision)
    }
}
