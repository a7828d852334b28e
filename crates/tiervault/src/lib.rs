#![warn(missing_docs)]

//! tiervault: classified multi-backend key-value store.
//!
//! Every item carries a classification (Public, Internal, Confidential, Secret) that picks
//! its backend, default TTL and whether it is encrypted.
//!
//! Write path: Value → Serialize (JSON) → Compress (LZ4/Zstd) → Encrypt (AES-GCM) → Checksum (xxHash3) → Envelope → Backend
//! Read path:  Backend → Envelope → Verify → Decrypt → Decompress → Deserialize

pub mod backend;
pub mod checksum;
pub mod cipher;
pub mod classification;
pub mod clock;
pub mod compression;
pub mod config;
pub mod encryption;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod pipeline;
pub mod quota;
pub mod retry;
pub mod scheduler;

pub use backend::{
    BackendKind, CookieBackend, CookieConfig, LocalBackend, MemoryBackend, SecureBackend,
    SessionBackend, StorageBackend,
};
pub use cipher::{CipherConfig, CipherProvider};
pub use classification::{Classification, EffectiveOptions, StorageOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::CompressionAlgorithm;
pub use config::EngineConfig;
pub use encryption::EncryptionAlgorithm;
pub use engine::{Backends, CleanupReport, ClearFilter, StorageEngine};
pub use envelope::{StorageEnvelope, StorageMetadata};
pub use error::{EngineError, EngineResult, Operation, StorageError, StorageResult};
pub use metrics::{MetricKind, MetricValue, NamedMetric, SlowOperation, StorageMetrics};
pub use pipeline::{EnvelopePipeline, PipelineConfig};
pub use quota::{QuotaStatus, StorageQuota, UsageLedger};
pub use retry::{RetryConfig, RetryExecutor, RetryOutcome};
pub use scheduler::{CleanupScheduler, SchedulerHandle, SchedulerStats};
