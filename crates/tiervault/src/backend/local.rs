//! Durable file-backed backend.
//!
//! One file per key under a data directory. File names are the hex-encoded key plus
//! a `.tv` suffix, so enumeration recovers keys exactly. Writes go to a temp file and
//! are renamed into place, so a crash never leaves a half-written entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{BackendKind, StorageBackend};
use crate::error::{StorageError, StorageResult};

const ENTRY_SUFFIX: &str = ".tv";

/// Durable backend rooted at a directory. Survives process restarts.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    dir: PathBuf,
}

impl LocalBackend {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&e))?;
        debug!(dir = %dir.display(), "opened local backend");
        Ok(Self { dir })
    }

    /// The data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", hex::encode(key.as_bytes()), ENTRY_SUFFIX))
    }
}

fn unavailable(e: &std::io::Error) -> StorageError {
    StorageError::BackendUnavailable {
        backend: BackendKind::Local,
        reason: e.to_string(),
    }
}

fn key_from_file_name(name: &str) -> Option<String> {
    let encoded = name.strip_suffix(ENTRY_SUFFIX)?;
    String::from_utf8(hex::decode(encoded).ok()?).ok()
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&e)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl_hint: Option<Duration>) -> StorageResult<()> {
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, &value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(unavailable(&e));
        }
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| unavailable(&e))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&e)),
        }
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| unavailable(&e))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| unavailable(&e))? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(key_from_file_name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
