//! Storage envelope: the metadata + payload unit persisted for one key.

use serde::{Deserialize, Serialize};

use crate::classification::Classification;
use crate::error::StorageResult;

/// Self-describing metadata attached to every stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Schema version the value was written with.
    pub version: u32,
    /// Write time, epoch milliseconds.
    pub timestamp: u64,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Serialized value size before compression and encryption.
    pub size_bytes: u64,
    /// Payload is compressed.
    pub compressed: bool,
    /// Payload is encrypted (or masked, see `degraded`).
    pub encrypted: bool,
    /// Encryption fell back to the non-confidential mask.
    pub degraded: bool,
    /// xxHash3 digest of `data` as stored.
    pub checksum: String,
    /// Sensitivity tier.
    pub classification: Classification,
}

impl StorageMetadata {
    /// Epoch milliseconds after which the entry is expired.
    pub fn expires_at(&self) -> u64 {
        self.timestamp.saturating_add(self.ttl_ms)
    }

    /// True once `timestamp + ttl < now`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at() < now_ms
    }
}

/// The persisted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEnvelope {
    /// Self-describing metadata.
    pub metadata: StorageMetadata,
    /// Possibly compressed, possibly encrypted payload.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl StorageEnvelope {
    /// Serialize for a backend.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse backend bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
