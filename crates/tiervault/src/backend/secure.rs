//! Redundant composite over Memory and Session.
//!
//! Writes land in both legs. Reads try Memory first and fall back to Session,
//! repopulating Memory on a fallback hit. Losing either leg loses nothing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{BackendKind, MemoryBackend, SessionBackend, StorageBackend};
use crate::error::StorageResult;

/// Memory + Session redundancy for Secret-classified data.
#[derive(Debug, Clone)]
pub struct SecureBackend {
    memory: Arc<MemoryBackend>,
    session: Arc<SessionBackend>,
}

impl SecureBackend {
    /// Composes the two legs. They are shared, not copied.
    pub fn new(memory: Arc<MemoryBackend>, session: Arc<SessionBackend>) -> Self {
        Self { memory, session }
    }
}

#[async_trait]
impl StorageBackend for SecureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Secure
    }

    fn fits(&self, key: &str, len: usize) -> bool {
        self.memory.fits(key, len) && self.session.fits(key, len)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if let Some(bytes) = self.memory.get(key).await? {
            return Ok(Some(bytes));
        }
        match self.session.get(key).await? {
            Some(bytes) => {
                debug!(key, "secure read fell back to session leg");
                self.memory.set(key, bytes.clone(), None).await?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_hint: Option<Duration>) -> StorageResult<()> {
        self.memory.set(key, value.clone(), ttl_hint).await?;
        self.session.set(key, value, ttl_hint).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.memory.remove(key).await?;
        self.session.remove(key).await
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: BTreeSet<String> = self.memory.keys(prefix).await?.into_iter().collect();
        keys.extend(self.session.keys(prefix).await?);
        Ok(keys.into_iter().collect())
    }
}
