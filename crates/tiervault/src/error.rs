//! Error types for the tiervault storage engine.

use thiserror::Error;

use crate::backend::BackendKind;

/// Result type alias for internal storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for the public engine API.
pub type EngineResult<T> = Result<T, EngineError>;

/// Every failure the engine and its components can produce.
///
/// `Integrity` and `Expired` never reach callers of [`crate::StorageEngine`]: the
/// engine turns them into cache misses and removes the offending entry.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Options or configuration failed eager validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Item or aggregate usage exceeds the budget after a cleanup attempt.
    #[error("Quota exceeded: {required} bytes requested, {available} bytes available")]
    QuotaExceeded {
        /// Bytes the operation needed.
        required: u64,
        /// Bytes the budget had left.
        available: u64,
    },

    /// A backend adapter could not be reached or refused the I/O.
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        /// The backend that failed.
        backend: BackendKind,
        /// Description of the failure.
        reason: String,
    },

    /// No secure primitive is available and the degraded fallback is disabled.
    #[error("Crypto unavailable: {0}")]
    CryptoUnavailable(String),

    /// Stored checksum does not match the payload.
    #[error("Integrity check failed: expected {expected}, actual {actual}")]
    Integrity {
        /// Checksum recorded at write time.
        expected: String,
        /// Checksum of the bytes that were read.
        actual: String,
    },

    /// The entry outlived its TTL.
    #[error("Entry expired at {expired_at_ms} ms")]
    Expired {
        /// Epoch milliseconds at which the entry expired.
        expired_at_ms: u64,
    },

    /// The envelope was written under a different schema version than the reader pinned.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        /// Version the reader asked for.
        expected: u32,
        /// Version recorded in the envelope.
        found: u32,
    },

    /// Value or envelope could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression operation failed.
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression operation failed.
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// Encryption operation failed.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption authentication tag mismatch; data corrupted, tampered, or keyed differently.
    #[error("Decryption failed: authentication tag mismatch (data may be corrupted)")]
    DecryptionAuthFailed,

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for failures that mean the stored entry itself is unreadable.
    ///
    /// The engine answers these with a cache miss and removes the entry.
    /// `CryptoUnavailable` is not one of them: it describes the host, not the data.
    pub fn is_unreadable_entry(&self) -> bool {
        matches!(
            self,
            StorageError::Integrity { .. }
                | StorageError::Expired { .. }
                | StorageError::SchemaMismatch { .. }
                | StorageError::Serialization(_)
                | StorageError::DecompressionFailed(_)
                | StorageError::DecryptionAuthFailed
        )
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Public engine operations, used for diagnostics and slow-operation tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operation {
    /// `StorageEngine::open`
    Open,
    /// `StorageEngine::set`
    Set,
    /// `StorageEngine::get`
    Get,
    /// `StorageEngine::remove`
    Remove,
    /// `StorageEngine::has`
    Has,
    /// `StorageEngine::clear`
    Clear,
    /// `StorageEngine::cleanup`
    Cleanup,
    /// `StorageEngine::quota`
    Quota,
    /// `StorageEngine::keys`
    Keys,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::Set => "set",
            Operation::Get => "get",
            Operation::Remove => "remove",
            Operation::Has => "has",
            Operation::Clear => "clear",
            Operation::Cleanup => "cleanup",
            Operation::Quota => "quota",
            Operation::Keys => "keys",
        };
        f.write_str(name)
    }
}

/// A surfaced engine failure carrying the operation and key for diagnostics.
#[derive(Debug, Error)]
#[error("{op} '{key}': {kind}")]
pub struct EngineError {
    /// The operation that failed.
    pub op: Operation,
    /// The caller-supplied key (empty for engine-wide operations).
    pub key: String,
    /// The underlying failure.
    #[source]
    pub kind: StorageError,
}

impl EngineError {
    /// Wraps a storage error with its operation and key.
    pub fn new(op: Operation, key: impl Into<String>, kind: StorageError) -> Self {
        Self {
            op,
            key: key.into(),
            kind,
        }
    }

    /// The underlying failure.
    pub fn kind(&self) -> &StorageError {
        &self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_display() {
        let err = StorageError::QuotaExceeded {
            required: 5000,
            available: 4096,
        };
        assert_eq!(
            format!("{}", err),
            "Quota exceeded: 5000 bytes requested, 4096 bytes available"
        );
    }

    #[test]
    fn test_backend_unavailable_display() {
        let err = StorageError::BackendUnavailable {
            backend: BackendKind::Local,
            reason: "disk detached".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("local"));
        assert!(msg.contains("disk detached"));
    }

    #[test]
    fn test_engine_error_carries_op_and_key() {
        let err = EngineError::new(
            Operation::Set,
            "token",
            StorageError::CryptoUnavailable("no AEAD".to_string()),
        );
        let msg = format!("{}", err);
        assert!(msg.starts_with("set 'token'"));
        assert!(msg.contains("no AEAD"));
        assert!(matches!(err.kind(), StorageError::CryptoUnavailable(_)));
    }

    #[test]
    fn test_unreadable_entry_classification() {
        assert!(StorageError::DecryptionAuthFailed.is_unreadable_entry());
        assert!(StorageError::Expired { expired_at_ms: 1 }.is_unreadable_entry());
        assert!(!StorageError::Validation("x".into()).is_unreadable_entry());
        assert!(!StorageError::CryptoUnavailable("off".into()).is_unreadable_entry());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!StorageError::Io(io).is_unreadable_entry());
    }

    #[test]
    fn test_bincode_error_converts() {
        let bad: Result<u64, bincode::Error> = bincode::deserialize(&[1u8]);
        let err: StorageError = bad.unwrap_err().into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
