//! Session-scoped backend: entries live until the session ends.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{BackendKind, StorageBackend};
use crate::error::StorageResult;

/// Map bound to a session id. Ending the session drops every entry and starts a new one.
#[derive(Debug)]
pub struct SessionBackend {
    session_id: RwLock<Uuid>,
    entries: DashMap<String, Vec<u8>>,
}

impl SessionBackend {
    /// Starts a fresh session.
    pub fn new() -> Self {
        Self {
            session_id: RwLock::new(Uuid::new_v4()),
            entries: DashMap::new(),
        }
    }

    /// Identifier of the current session.
    pub fn session_id(&self) -> Uuid {
        *self.session_id.read()
    }

    /// Ends the current session: all entries are dropped and a new session id is issued.
    pub fn end_session(&self) -> Uuid {
        let mut id = self.session_id.write();
        let dropped = self.entries.len();
        self.entries.clear();
        let old = *id;
        *id = Uuid::new_v4();
        debug!(old = %old, new = %*id, dropped, "session ended");
        *id
    }

    /// Drops every entry without rotating the session id.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl_hint: Option<Duration>) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
