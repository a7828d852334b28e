//! Shared fixtures for tiervault integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tiervault::{
    BackendKind, Backends, Clock, EngineConfig, ManualClock, MemoryBackend, RetryConfig,
    StorageBackend, StorageEngine, StorageEnvelope, StorageError, StorageResult,
};

/// Simulated start time, epoch milliseconds.
pub const START_MS: u64 = 1_700_000_000_000;

/// An engine over a temp-dir durable store and a manual clock.
pub struct Harness {
    pub engine: Arc<StorageEngine>,
    pub clock: ManualClock,
    pub config: EngineConfig,
    pub dir: TempDir,
}

/// Config tuned for tests: namespace `app`, millisecond backoff.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        namespace: "app".to_string(),
        retry: RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(mut config: EngineConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    config.data_dir = dir.path().to_path_buf();
    let clock = ManualClock::new(START_MS);
    let engine = open(&config, &clock).await;
    Harness {
        engine,
        clock,
        config,
        dir,
    }
}

/// Open (or reopen) an engine over `config.data_dir`.
pub async fn open(config: &EngineConfig, clock: &ManualClock) -> Arc<StorageEngine> {
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let backends = Backends::open(config, shared.clone()).await.unwrap();
    Arc::new(
        StorageEngine::with_backends(config.clone(), shared, backends)
            .await
            .unwrap(),
    )
}

/// An engine whose durable store is `local`.
pub async fn engine_over(
    config: EngineConfig,
    local: Arc<dyn StorageBackend>,
) -> (Arc<StorageEngine>, ManualClock) {
    let clock = ManualClock::new(START_MS);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let backends = Backends::with_local(&config, shared.clone(), local);
    let engine = StorageEngine::with_backends(config, shared, backends)
        .await
        .unwrap();
    (Arc::new(engine), clock)
}

/// Flip one bit of the payload of a stored envelope, keeping the envelope parseable.
pub async fn corrupt_payload(backend: &dyn StorageBackend, skey: &str) {
    let bytes = backend.get(skey).await.unwrap().expect("entry to corrupt");
    let mut env = StorageEnvelope::from_bytes(&bytes).unwrap();
    let last = env.data.len() - 1;
    env.data[last] ^= 0x01;
    backend
        .set(skey, env.to_bytes().unwrap(), None)
        .await
        .unwrap();
}

/// Durable store whose first `failures` writes report the backend unavailable.
pub struct FlakyBackend {
    inner: MemoryBackend,
    failures: AtomicU32,
    set_calls: AtomicU32,
}

impl FlakyBackend {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryBackend::new(),
            failures: AtomicU32::new(failures),
            set_calls: AtomicU32::new(0),
        }
    }

    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::BackendUnavailable {
                backend: BackendKind::Local,
                reason: "injected write failure".to_string(),
            });
        }
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key).await
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.keys(prefix).await
    }
}

/// Durable store whose reads hang for `delay`.
pub struct StallingBackend {
    inner: MemoryBackend,
    delay: Duration,
}

impl StallingBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryBackend::new(),
            delay,
        }
    }
}

#[async_trait]
impl StorageBackend for StallingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key).await
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.keys(prefix).await
    }
}
