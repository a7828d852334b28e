//! Backend adapters: uniform async key/value access over distinct physical stores.
//!
//! Adapters only ever see opaque envelope bytes. Building and interpreting envelopes
//! is the engine's business.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

pub mod cookie;
pub mod local;
pub mod memory;
pub mod secure;
pub mod session;

pub use cookie::{CookieBackend, CookieConfig};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use secure::SecureBackend;
pub use session::SessionBackend;

/// Identifies a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum BackendKind {
    /// Process-local map, lost on restart.
    Memory,
    /// Map scoped to one session; cleared when the session ends.
    Session,
    /// Durable file-backed store.
    Local,
    /// Signed, size-capped cookie jar.
    Cookie,
    /// Redundant Memory + Session composite.
    Secure,
}

impl BackendKind {
    /// All adapter kinds.
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Memory,
        BackendKind::Session,
        BackendKind::Local,
        BackendKind::Cookie,
        BackendKind::Secure,
    ];

    /// Kinds that own their own storage. Secure is a view over Memory and Session.
    pub const PHYSICAL: [BackendKind; 4] = [
        BackendKind::Memory,
        BackendKind::Session,
        BackendKind::Local,
        BackendKind::Cookie,
    ];

    /// True if an item stored on `self` physically lives in `other`.
    pub fn stores_into(self, other: BackendKind) -> bool {
        self == other
            || (self == BackendKind::Secure
                && matches!(other, BackendKind::Memory | BackendKind::Session))
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Session => "session",
            BackendKind::Local => "local",
            BackendKind::Cookie => "cookie",
            BackendKind::Secure => "secure",
        };
        f.write_str(name)
    }
}

/// Storage backend trait.
///
/// Implementations must be safe to share across tasks. Missing keys are `Ok(None)`
/// on `get` and `Ok(())` on `remove`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which adapter this is.
    fn kind(&self) -> BackendKind;

    /// Whether an entry of `len` bytes under `key` fits this backend's per-entry ceiling.
    fn fits(&self, _key: &str, _len: usize) -> bool {
        true
    }

    /// Get a value by key.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store a value, overwriting any existing one. `ttl_hint` lets backends with
    /// native expiry (cookies) age the entry out on their own.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_hint: Option<Duration>)
        -> StorageResult<()>;

    /// Delete a key.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// All keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
