//! Storage engine: the public set/get/remove/has/clear/cleanup/quota/metrics API.
//!
//! The engine resolves per-call options against the classification policy, runs values
//! through the envelope pipeline, and routes envelope bytes to the owning backend. Reads
//! that hit a corrupt, expired or otherwise undecodable envelope are answered as misses
//! and the entry is removed on the spot.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    BackendKind, CookieBackend, LocalBackend, MemoryBackend, SecureBackend, SessionBackend,
    StorageBackend,
};
use crate::cipher::CipherProvider;
use crate::classification::{
    reserved_key, resolve, storage_key, user_key_prefix, Classification, EffectiveOptions,
    EngineDefaults, StorageOptions,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::envelope::StorageEnvelope;
use crate::error::{EngineError, EngineResult, Operation, StorageError, StorageResult};
use crate::locks::KeyLocks;
use crate::metrics::{MetricsCollector, Outcome, StorageMetrics};
use crate::pipeline::EnvelopePipeline;
use crate::quota::{QuotaStatus, StorageQuota, UsageLedger};
use crate::retry::RetryExecutor;

/// Reserved slot holding the cipher master key.
pub const CIPHER_KEY_SLOT: &str = "cipher-key";

/// The physical stores an engine runs over.
#[derive(Clone)]
pub struct Backends {
    /// Process-local map.
    pub memory: Arc<MemoryBackend>,
    /// Session-scoped map.
    pub session: Arc<SessionBackend>,
    /// Durable store. Also holds the reserved key and metrics slots.
    pub local: Arc<dyn StorageBackend>,
    /// Signed cookie jar.
    pub cookie: Arc<CookieBackend>,
}

impl Backends {
    /// Fresh in-process stores plus a file-backed durable store at `config.data_dir`.
    pub async fn open(config: &EngineConfig, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        let local = LocalBackend::open(&config.data_dir).await?;
        Ok(Self::with_local(config, clock, Arc::new(local)))
    }

    /// Fresh in-process stores around a caller-supplied durable store.
    pub fn with_local(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        local: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            memory: Arc::new(MemoryBackend::new()),
            session: Arc::new(SessionBackend::new()),
            local,
            cookie: Arc::new(CookieBackend::new(config.cookie.clone(), clock)),
        }
    }
}

/// Which entries `clear` removes. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ClearFilter {
    /// Only entries written with this classification.
    pub classification: Option<Classification>,
    /// Only keys (as the caller named them, including any prefix) matching this.
    pub pattern: Option<Regex>,
    /// Only entries stored on this backend.
    pub backend: Option<BackendKind>,
}

impl ClearFilter {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one classification.
    pub fn classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Restrict to keys matching a regular expression.
    pub fn pattern(mut self, pattern: &str) -> StorageResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| StorageError::Validation(format!("invalid key pattern: {}", e)))?;
        self.pattern = Some(re);
        Ok(self)
    }

    /// Restrict to one backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// Result of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Distinct entries removed.
    pub removed: usize,
    /// Envelope bytes freed across all stores.
    pub space_freed: u64,
}

/// The classified multi-backend storage engine. Share it behind an `Arc`.
pub struct StorageEngine {
    config: EngineConfig,
    defaults: EngineDefaults,
    clock: Arc<dyn Clock>,
    memory: Arc<MemoryBackend>,
    session: Arc<SessionBackend>,
    local: Arc<dyn StorageBackend>,
    cookie: Arc<CookieBackend>,
    secure: SecureBackend,
    cipher: Arc<CipherProvider>,
    pipeline: EnvelopePipeline,
    metrics: MetricsCollector,
    locks: KeyLocks,
    retry: RetryExecutor,
    usage: UsageLedger,
    user_prefix: String,
    metrics_slot: String,
    backend_timeout: Duration,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("namespace", &self.config.namespace)
            .field("cipher", &self.cipher)
            .finish()
    }
}

impl StorageEngine {
    /// Open an engine over the system clock and a durable store at `config.data_dir`.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backends = Backends::open(&config, clock.clone())
            .await
            .map_err(|e| EngineError::new(Operation::Open, "", e))?;
        Self::with_backends(config, clock, backends).await
    }

    /// Open an engine over explicit stores and clock.
    pub async fn with_backends(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        backends: Backends,
    ) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|e| EngineError::new(Operation::Open, "", e))?;

        let ns = config.namespace.clone();
        let Backends {
            memory,
            session,
            local,
            cookie,
        } = backends;

        let cipher = Arc::new(CipherProvider::new(
            config.cipher.clone(),
            local.clone(),
            reserved_key(&ns, CIPHER_KEY_SLOT),
            ns.clone(),
        ));
        let pipeline = EnvelopePipeline::new(config.pipeline_config(), cipher.clone(), clock.clone());
        let metrics_slot = reserved_key(&ns, &config.metrics_key);
        let backend_timeout = Duration::from_millis(config.backend_timeout_ms);

        let restored = match tokio::time::timeout(backend_timeout, local.get(&metrics_slot)).await {
            Ok(Ok(Some(bytes))) => MetricsCollector::parse(&bytes).unwrap_or_else(|e| {
                warn!(slot = %metrics_slot, error = %e, "discarding unreadable persisted metrics");
                StorageMetrics::default()
            }),
            Ok(Ok(None)) => StorageMetrics::default(),
            Ok(Err(e)) => {
                warn!(slot = %metrics_slot, error = %e, "could not load persisted metrics");
                StorageMetrics::default()
            }
            Err(_) => {
                warn!(slot = %metrics_slot, "timed out loading persisted metrics");
                StorageMetrics::default()
            }
        };
        let metrics = MetricsCollector::restore(
            restored,
            Duration::from_millis(config.slow_op_threshold_ms),
            config.metrics_persist_every,
        );

        info!(
            namespace = %ns,
            cipher_available = cipher.is_available(),
            "storage engine opened"
        );

        let engine = Self {
            defaults: config.engine_defaults(),
            user_prefix: user_key_prefix(&ns),
            locks: KeyLocks::new(config.lock_stripes),
            retry: RetryExecutor::new(config.retry.clone()),
            secure: SecureBackend::new(memory.clone(), session.clone()),
            config,
            clock,
            memory,
            session,
            local,
            cookie,
            cipher,
            pipeline,
            metrics,
            metrics_slot,
            backend_timeout,
            usage: UsageLedger::default(),
        };
        let used = engine
            .recount()
            .await
            .map_err(|e| EngineError::new(Operation::Open, "", e))?;
        engine.usage.reset(used);
        Ok(engine)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The memory store.
    pub fn memory(&self) -> &Arc<MemoryBackend> {
        &self.memory
    }

    /// The session store.
    pub fn session(&self) -> &Arc<SessionBackend> {
        &self.session
    }

    /// The cookie jar.
    pub fn cookie(&self) -> &Arc<CookieBackend> {
        &self.cookie
    }

    /// The durable store.
    pub fn local(&self) -> &Arc<dyn StorageBackend> {
        &self.local
    }

    /// The cipher provider.
    pub fn cipher(&self) -> &Arc<CipherProvider> {
        &self.cipher
    }

    /// Storage key for a caller key, as the backends see it.
    pub fn storage_key(&self, key: &str, prefix: Option<&str>) -> String {
        storage_key(&self.config.namespace, prefix, key)
    }

    fn backend(&self, kind: BackendKind) -> &dyn StorageBackend {
        match kind {
            BackendKind::Memory => self.memory.as_ref(),
            BackendKind::Session => self.session.as_ref(),
            BackendKind::Local => self.local.as_ref(),
            BackendKind::Cookie => self.cookie.as_ref(),
            BackendKind::Secure => &self.secure,
        }
    }

    /// Run one backend call under the I/O timeout.
    async fn io<T>(
        &self,
        kind: BackendKind,
        fut: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.backend_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::BackendUnavailable {
                backend: kind,
                reason: format!("timed out after {:?}", self.backend_timeout),
            }),
        }
    }

    fn caller_key<'a>(&self, stored: &'a str) -> &'a str {
        stored.strip_prefix(self.user_prefix.as_str()).unwrap_or(stored)
    }

    async fn finish(&self, op: Operation, key: &str, started: Instant, outcome: Outcome) {
        let due = self
            .metrics
            .record(op, key, started.elapsed(), outcome, self.clock.now_ms());
        if due {
            if let Err(e) = self.persist_metrics().await {
                warn!(error = %e, "failed to persist metrics");
            }
        }
    }

    async fn persist_metrics(&self) -> StorageResult<()> {
        let bytes = self.metrics.to_bytes()?;
        self.io(
            BackendKind::Local,
            self.local.set(&self.metrics_slot, bytes, None),
        )
        .await
    }

    /// Write current metrics to the durable metrics slot now.
    pub async fn flush_metrics(&self) -> EngineResult<()> {
        self.persist_metrics()
            .await
            .map_err(|e| EngineError::new(Operation::Open, "", e))
    }

    /// Point-in-time metrics.
    pub fn metrics(&self) -> StorageMetrics {
        self.metrics.snapshot()
    }

    // ----- set -----

    /// Store `value` under `key`, replacing any previous entry.
    #[instrument(skip(self, value, options), fields(ns = %self.config.namespace))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: StorageOptions,
    ) -> EngineResult<()> {
        let started = Instant::now();
        let result = self.set_inner(key, value, &options).await;
        let outcome = if result.is_ok() {
            Outcome::Done
        } else {
            Outcome::Failed
        };
        self.finish(Operation::Set, key, started, outcome).await;
        result.map_err(|e| EngineError::new(Operation::Set, key, e))
    }

    async fn set_inner<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &StorageOptions,
    ) -> StorageResult<()> {
        validate_key(key)?;
        options.validate()?;
        let eff = resolve(options, &self.defaults);
        let skey = storage_key(&self.config.namespace, eff.prefix.as_deref(), key);
        let _guard = self.locks.lock(&skey).await;
        let stripe = self.locks.stripe_for(&skey);
        let total = self.config.max_storage_size;

        let mut swept = false;
        let quota = self.usage.quota(total);
        if quota.status(self.config.cleanup_watermark) != QuotaStatus::Ok {
            info!(percentage = quota.percentage, "storage near full, sweeping before write");
            self.reclaim(stripe).await?;
            swept = true;
        }

        let envelope = self.pipeline.encode(&skey, value, &eff).await?;
        if envelope.metadata.degraded {
            self.metrics.record_degraded();
        }
        let bytes = envelope.to_bytes()?;
        let len = bytes.len() as u64;

        if len > eff.max_size {
            return Err(StorageError::QuotaExceeded {
                required: len,
                available: eff.max_size,
            });
        }
        let backend = self.backend(eff.backend);
        if !backend.fits(&skey, bytes.len()) {
            return Err(StorageError::QuotaExceeded {
                required: len,
                available: self.entry_ceiling(eff.backend, &skey),
            });
        }

        let legs = physical_legs(eff.backend);
        let needed = len * legs.len() as u64;
        let mut replaced = self.stored_bytes(&skey, legs).await?;
        if !swept
            && !self
                .usage
                .quota(total)
                .can_allocate(needed.saturating_sub(replaced))
        {
            info!(required = needed, "over quota, sweeping before write");
            self.reclaim(stripe).await?;
            // The sweep may have dropped our own expired entry.
            replaced = self.stored_bytes(&skey, legs).await?;
        }
        self.usage
            .quota(total)
            .check_allocation(needed.saturating_sub(replaced))?;

        self.persist(&eff, &skey, bytes).await?;
        self.usage.record_allocation(needed);
        self.usage.record_free(replaced);

        // A key lives on one backend at a time.
        for kind in BackendKind::PHYSICAL {
            if !eff.backend.stores_into(kind) {
                if let Err(e) = self.remove_from(kind, &skey).await {
                    debug!(backend = %kind, error = %e, "could not drop stale copy");
                }
            }
        }
        debug!(key = %skey, backend = %eff.backend, bytes = len, "stored");
        Ok(())
    }

    /// Bytes `skey` currently occupies across `legs`.
    async fn stored_bytes(&self, skey: &str, legs: &[BackendKind]) -> StorageResult<u64> {
        let mut held = 0u64;
        for kind in legs {
            if let Some(old) = self.io(*kind, self.backend(*kind).get(skey)).await? {
                held += old.len() as u64;
            }
        }
        Ok(held)
    }

    /// Sweep, then replace the running usage total with an exact recount.
    async fn reclaim(&self, held_stripe: usize) -> StorageResult<()> {
        self.sweep(Some(held_stripe)).await?;
        let used = self.recount().await?;
        self.usage.reset(used);
        Ok(())
    }

    fn entry_ceiling(&self, kind: BackendKind, skey: &str) -> u64 {
        match kind {
            BackendKind::Cookie => {
                let overhead = CookieBackend::encoded_len(skey, 0);
                (self.config.cookie.max_cookie_bytes.saturating_sub(overhead) / 2) as u64
            }
            _ => self.config.max_item_size,
        }
    }

    async fn persist(&self, eff: &EffectiveOptions, skey: &str, bytes: Vec<u8>) -> StorageResult<()> {
        let kind = eff.backend;
        let backend = self.backend(kind);
        let ttl_hint = Some(eff.ttl);
        let bytes = &bytes;
        self.retry
            .execute_with_attempts(eff.retry_attempts, move || async move {
                self.io(kind, backend.set(skey, bytes.clone(), ttl_hint))
                    .await
            })
            .await
            .into_result()
    }

    // ----- get / has -----

    /// The value stored under `key`, or `None` if absent, expired or unreadable.
    #[instrument(skip(self, options), fields(ns = %self.config.namespace))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        options: StorageOptions,
    ) -> EngineResult<Option<T>> {
        let started = Instant::now();
        let result = self.get_inner(key, &options).await;
        let outcome = match &result {
            Ok(Some(_)) => Outcome::Hit,
            Ok(None) => Outcome::Miss,
            Err(_) => Outcome::Failed,
        };
        self.finish(Operation::Get, key, started, outcome).await;
        result.map_err(|e| EngineError::new(Operation::Get, key, e))
    }

    async fn get_inner<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &StorageOptions,
    ) -> StorageResult<Option<T>> {
        validate_key(key)?;
        options.validate()?;
        let eff = resolve(options, &self.defaults);
        let skey = storage_key(&self.config.namespace, eff.prefix.as_deref(), key);
        let _guard = self.locks.lock(&skey).await;

        let Some(plain) = self.read_payload(&skey, options, &eff).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&plain) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.discard(&skey, &StorageError::from(e), eff.silent).await;
                Ok(None)
            }
        }
    }

    /// The stored value, or `default` when there is none.
    pub async fn get_or<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
        options: StorageOptions,
    ) -> EngineResult<T> {
        Ok(self.get(key, options).await?.unwrap_or(default))
    }

    /// True if `get` would return a value.
    #[instrument(skip(self, options), fields(ns = %self.config.namespace))]
    pub async fn has(&self, key: &str, options: StorageOptions) -> EngineResult<bool> {
        let started = Instant::now();
        let result = self.has_inner(key, &options).await;
        let outcome = match &result {
            Ok(true) => Outcome::Hit,
            Ok(false) => Outcome::Miss,
            Err(_) => Outcome::Failed,
        };
        self.finish(Operation::Has, key, started, outcome).await;
        result.map_err(|e| EngineError::new(Operation::Has, key, e))
    }

    async fn has_inner(&self, key: &str, options: &StorageOptions) -> StorageResult<bool> {
        validate_key(key)?;
        options.validate()?;
        let eff = resolve(options, &self.defaults);
        let skey = storage_key(&self.config.namespace, eff.prefix.as_deref(), key);
        let _guard = self.locks.lock(&skey).await;
        Ok(self.read_payload(&skey, options, &eff).await?.is_some())
    }

    /// Backends a read should look at: the resolved owner if the caller said anything
    /// about placement, otherwise every physical store in lookup order.
    fn read_candidates(options: &StorageOptions, eff: &EffectiveOptions) -> Vec<BackendKind> {
        if options.backend.is_some() || options.classification.is_some() {
            vec![eff.backend]
        } else {
            BackendKind::PHYSICAL.to_vec()
        }
    }

    /// Fetch and open the envelope for `skey`. Unreadable entries are discarded.
    async fn read_payload(
        &self,
        skey: &str,
        options: &StorageOptions,
        eff: &EffectiveOptions,
    ) -> StorageResult<Option<Vec<u8>>> {
        for kind in Self::read_candidates(options, eff) {
            let Some(bytes) = self.io(kind, self.backend(kind).get(skey)).await? else {
                continue;
            };
            return match self.open_envelope(skey, &bytes, eff).await {
                Ok(plain) => Ok(Some(plain)),
                Err(e) if e.is_unreadable_entry() => {
                    self.discard(skey, &e, eff.silent).await;
                    Ok(None)
                }
                Err(e) => Err(e),
            };
        }
        Ok(None)
    }

    async fn open_envelope(
        &self,
        skey: &str,
        bytes: &[u8],
        eff: &EffectiveOptions,
    ) -> StorageResult<Vec<u8>> {
        let envelope = StorageEnvelope::from_bytes(bytes)?;
        let meta = &envelope.metadata;
        if meta.is_expired(self.clock.now_ms()) {
            return Err(StorageError::Expired {
                expired_at_ms: meta.expires_at(),
            });
        }
        if eff.version_pinned && meta.version != eff.version {
            return Err(StorageError::SchemaMismatch {
                expected: eff.version,
                found: meta.version,
            });
        }
        self.pipeline.open_payload(skey, &envelope).await
    }

    /// Remove an unreadable entry from every store and account for it.
    async fn discard(&self, skey: &str, cause: &StorageError, silent: bool) {
        match cause {
            StorageError::Expired { .. } => self.metrics.record_expirations(1),
            _ => self.metrics.record_integrity_failure(),
        }
        if silent {
            debug!(key = %skey, reason = %cause, "dropping unreadable entry");
        } else {
            warn!(key = %skey, reason = %cause, "dropping unreadable entry");
        }
        self.remove_everywhere(skey).await;
    }

    /// Remove `skey` from one store and release its bytes from the usage total.
    async fn remove_from(&self, kind: BackendKind, skey: &str) -> StorageResult<u64> {
        let backend = self.backend(kind);
        let held = self
            .io(kind, backend.get(skey))
            .await?
            .map_or(0, |b| b.len() as u64);
        self.io(kind, backend.remove(skey)).await?;
        self.usage.record_free(held);
        Ok(held)
    }

    async fn remove_everywhere(&self, skey: &str) {
        for kind in BackendKind::PHYSICAL {
            if let Err(e) = self.remove_from(kind, skey).await {
                warn!(key = %skey, backend = %kind, error = %e, "remove failed");
            }
        }
    }

    // ----- remove / clear -----

    /// Delete `key`. With no classification or backend in `options`, it is removed
    /// from every store.
    #[instrument(skip(self, options), fields(ns = %self.config.namespace))]
    pub async fn remove(&self, key: &str, options: StorageOptions) -> EngineResult<()> {
        let started = Instant::now();
        let result = self.remove_inner(key, &options).await;
        let outcome = if result.is_ok() {
            Outcome::Done
        } else {
            Outcome::Failed
        };
        self.finish(Operation::Remove, key, started, outcome).await;
        result.map_err(|e| EngineError::new(Operation::Remove, key, e))
    }

    async fn remove_inner(&self, key: &str, options: &StorageOptions) -> StorageResult<()> {
        validate_key(key)?;
        options.validate()?;
        let eff = resolve(options, &self.defaults);
        let skey = storage_key(&self.config.namespace, eff.prefix.as_deref(), key);
        let _guard = self.locks.lock(&skey).await;
        for kind in Self::read_candidates(options, &eff) {
            self.remove_from(kind, &skey).await?;
        }
        Ok(())
    }

    /// Remove every entry matching `filter`. Returns how many distinct entries went.
    #[instrument(skip(self, filter), fields(ns = %self.config.namespace))]
    pub async fn clear(&self, filter: ClearFilter) -> EngineResult<usize> {
        let started = Instant::now();
        let result = self.clear_inner(&filter).await;
        let outcome = if result.is_ok() {
            Outcome::Done
        } else {
            Outcome::Failed
        };
        self.finish(Operation::Clear, "*", started, outcome).await;
        result.map_err(|e| EngineError::new(Operation::Clear, "*", e))
    }

    async fn clear_inner(&self, filter: &ClearFilter) -> StorageResult<usize> {
        let kinds: Vec<BackendKind> = match filter.backend {
            Some(kind) => physical_legs(kind).to_vec(),
            None => BackendKind::PHYSICAL.to_vec(),
        };
        let mut removed = BTreeSet::new();
        for kind in kinds {
            let backend = self.backend(kind);
            for skey in self.io(kind, backend.keys(&self.user_prefix)).await? {
                if let Some(re) = &filter.pattern {
                    if !re.is_match(self.caller_key(&skey)) {
                        continue;
                    }
                }
                let _guard = self.locks.lock(&skey).await;
                if let Some(wanted) = filter.classification {
                    let Some(bytes) = self.io(kind, backend.get(&skey)).await? else {
                        continue;
                    };
                    match StorageEnvelope::from_bytes(&bytes) {
                        Ok(env) if env.metadata.classification == wanted => {}
                        _ => continue,
                    }
                }
                self.remove_from(kind, &skey).await?;
                removed.insert(skey);
            }
        }
        info!(removed = removed.len(), "cleared entries");
        Ok(removed.len())
    }

    // ----- cleanup / quota -----

    /// Sweep every store once, removing expired and undecodable entries.
    #[instrument(skip(self), fields(ns = %self.config.namespace))]
    pub async fn cleanup(&self) -> EngineResult<CleanupReport> {
        self.sweep(None)
            .await
            .map_err(|e| EngineError::new(Operation::Cleanup, "", e))
    }

    /// `held` is the stripe the caller already holds, if any. While holding one,
    /// busy stripes are skipped instead of awaited.
    async fn sweep(&self, held: Option<usize>) -> StorageResult<CleanupReport> {
        let now = self.clock.now_ms();
        let mut removed = BTreeSet::new();
        let mut expired = BTreeSet::new();
        let mut space_freed = 0u64;

        for kind in BackendKind::PHYSICAL {
            let backend = self.backend(kind);
            for skey in self.io(kind, backend.keys(&self.user_prefix)).await? {
                let stripe = self.locks.stripe_for(&skey);
                let _guard = match held {
                    Some(h) if h == stripe => None,
                    Some(_) => match self.locks.try_lock(&skey) {
                        Some(g) => Some(g),
                        None => continue,
                    },
                    None => Some(self.locks.lock(&skey).await),
                };
                let Some(bytes) = self.io(kind, backend.get(&skey)).await? else {
                    continue;
                };
                let stale = match StorageEnvelope::from_bytes(&bytes) {
                    Ok(env) if env.metadata.is_expired(now) => {
                        expired.insert(skey.clone());
                        true
                    }
                    Ok(_) => false,
                    Err(e) => {
                        debug!(key = %skey, error = %e, "sweeping undecodable entry");
                        true
                    }
                };
                if stale {
                    self.io(kind, backend.remove(&skey)).await?;
                    self.usage.record_free(bytes.len() as u64);
                    space_freed += bytes.len() as u64;
                    removed.insert(skey);
                }
            }
        }

        self.metrics.record_expirations(expired.len() as u64);
        self.metrics.record_cleanup(self.clock.now_ms());
        let report = CleanupReport {
            removed: removed.len(),
            space_freed,
        };
        info!(removed = report.removed, space_freed = report.space_freed, "cleanup complete");
        Ok(report)
    }

    /// Current usage against the configured ceiling, from an exact recount.
    pub async fn quota(&self) -> EngineResult<StorageQuota> {
        let used = self
            .recount()
            .await
            .map_err(|e| EngineError::new(Operation::Quota, "", e))?;
        self.usage.reset(used);
        Ok(StorageQuota::new(used, self.config.max_storage_size))
    }

    /// Usage from the running total, without touching the stores. May overstate usage
    /// after entries vanish outside the engine (a session ending) until the next recount.
    pub fn usage(&self) -> StorageQuota {
        self.usage.quota(self.config.max_storage_size)
    }

    /// Sum of user envelope bytes in every physical store.
    async fn recount(&self) -> StorageResult<u64> {
        let mut used = 0u64;
        for kind in BackendKind::PHYSICAL {
            let backend = self.backend(kind);
            for skey in self.io(kind, backend.keys(&self.user_prefix)).await? {
                if let Some(bytes) = self.io(kind, backend.get(&skey)).await? {
                    used += bytes.len() as u64;
                }
            }
        }
        Ok(used)
    }

    /// Every stored key, as callers name them, with its backend.
    pub async fn keys(&self) -> EngineResult<Vec<(BackendKind, String)>> {
        let mut out = Vec::new();
        for kind in BackendKind::PHYSICAL {
            let keys = self
                .io(kind, self.backend(kind).keys(&self.user_prefix))
                .await
                .map_err(|e| EngineError::new(Operation::Keys, "", e))?;
            out.extend(keys.iter().map(|k| (kind, self.caller_key(k).to_string())));
        }
        Ok(out)
    }
}

/// Physical stores an item routed to `kind` occupies.
fn physical_legs(kind: BackendKind) -> &'static [BackendKind] {
    match kind {
        BackendKind::Memory => &[BackendKind::Memory],
        BackendKind::Session => &[BackendKind::Session],
        BackendKind::Local => &[BackendKind::Local],
        BackendKind::Cookie => &[BackendKind::Cookie],
        BackendKind::Secure => &[BackendKind::Memory, BackendKind::Session],
    }
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::Validation("key must not be empty".to_string()));
    }
    Ok(())
}
