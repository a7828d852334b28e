//! Classification policy: sensitivity tier → backend, TTL, compression and encryption defaults.
//!
//! This module is the only place default TTLs live.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{StorageError, StorageResult};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Sensitivity tier of a stored item, fixed at write time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Classification {
    /// Freely shareable; durable, long-lived.
    Public,
    /// Internal application state; durable.
    #[default]
    Internal,
    /// Session-bound; gone when the session ends.
    Confidential,
    /// Short-lived, encrypted, stored redundantly in memory and session.
    Secret,
}

impl Classification {
    /// All tiers, least to most sensitive.
    pub const ALL: [Classification; 4] = [
        Classification::Public,
        Classification::Internal,
        Classification::Confidential,
        Classification::Secret,
    ];

    /// Default time-to-live.
    pub fn default_ttl(self) -> Duration {
        match self {
            Classification::Public => 30 * DAY,
            Classification::Internal => 7 * DAY,
            Classification::Confidential => DAY,
            Classification::Secret => HOUR,
        }
    }

    /// Backend that owns items of this tier.
    pub fn default_backend(self) -> BackendKind {
        match self {
            Classification::Public | Classification::Internal => BackendKind::Local,
            Classification::Confidential => BackendKind::Session,
            Classification::Secret => BackendKind::Secure,
        }
    }

    /// Only Secret encrypts unless asked otherwise.
    pub fn encrypts_by_default(self) -> bool {
        self == Classification::Secret
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Classification::Public => "public",
            Classification::Internal => "internal",
            Classification::Confidential => "confidential",
            Classification::Secret => "secret",
        };
        f.write_str(name)
    }
}

/// Per-call options. Every field is optional; unset fields take classification or
/// engine defaults in [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Sensitivity tier.
    pub classification: Option<Classification>,
    /// Time-to-live.
    pub ttl: Option<Duration>,
    /// Compress payloads above the engine threshold (default true).
    pub compress: Option<bool>,
    /// Encrypt the payload (default: classification is Secret).
    pub encrypt: Option<bool>,
    /// Maximum stored envelope size in bytes.
    pub max_size: Option<u64>,
    /// Sub-namespace prepended to the key.
    pub prefix: Option<String>,
    /// Schema version written into (or required of) the envelope.
    pub version: Option<u32>,
    /// Persist attempts before giving up on transient backend failures.
    pub retry_attempts: Option<u32>,
    /// When false, integrity and expiry misses are logged at warn level.
    pub silent: Option<bool>,
    /// Override the classification's backend (e.g. opt into cookies).
    pub backend: Option<BackendKind>,
}

impl StorageOptions {
    /// Empty options: everything defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying only a classification.
    pub fn classified(classification: Classification) -> Self {
        Self {
            classification: Some(classification),
            ..Self::default()
        }
    }

    /// Set the classification.
    pub fn classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Set the time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Enable or disable compression.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Enable or disable encryption.
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    /// Cap the stored envelope size.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    /// Set the key prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the schema version.
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the persist attempt budget.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Set the silent flag.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = Some(silent);
        self
    }

    /// Route to a specific backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Eager validation at the API boundary.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_size == Some(0) {
            return Err(StorageError::Validation(
                "max_size must be positive".to_string(),
            ));
        }
        if self.ttl == Some(Duration::ZERO) {
            return Err(StorageError::Validation("ttl must be positive".to_string()));
        }
        if self.retry_attempts == Some(0) {
            return Err(StorageError::Validation(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(prefix) = &self.prefix {
            if prefix.is_empty() || prefix.contains(':') {
                return Err(StorageError::Validation(format!(
                    "invalid key prefix {:?}: must be non-empty and must not contain ':'",
                    prefix
                )));
            }
        }
        Ok(())
    }
}

/// Engine-wide values that fill options the classification does not decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineDefaults {
    /// Schema version stamped on new envelopes.
    pub schema_version: u32,
    /// Per-item size ceiling.
    pub max_item_size: u64,
    /// Persist attempts.
    pub retry_attempts: u32,
}

/// Fully resolved options: nothing left to decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveOptions {
    /// Sensitivity tier.
    pub classification: Classification,
    /// Time-to-live.
    pub ttl: Duration,
    /// Compress above threshold.
    pub compress: bool,
    /// Encrypt.
    pub encrypt: bool,
    /// Stored envelope ceiling in bytes.
    pub max_size: u64,
    /// Key prefix.
    pub prefix: Option<String>,
    /// Schema version.
    pub version: u32,
    /// True if the caller named the version explicitly.
    pub version_pinned: bool,
    /// Persist attempts.
    pub retry_attempts: u32,
    /// Silent flag.
    pub silent: bool,
    /// Owning backend.
    pub backend: BackendKind,
}

impl EffectiveOptions {
    /// Back to fully populated [`StorageOptions`]; resolving them again yields `self`.
    pub fn to_options(&self) -> StorageOptions {
        StorageOptions {
            classification: Some(self.classification),
            ttl: Some(self.ttl),
            compress: Some(self.compress),
            encrypt: Some(self.encrypt),
            max_size: Some(self.max_size),
            prefix: self.prefix.clone(),
            version: self.version_pinned.then_some(self.version),
            retry_attempts: Some(self.retry_attempts),
            silent: Some(self.silent),
            backend: Some(self.backend),
        }
    }
}

/// Fill every unset option from classification and engine defaults. Total and idempotent.
pub fn resolve(options: &StorageOptions, defaults: &EngineDefaults) -> EffectiveOptions {
    let classification = options.classification.unwrap_or_default();
    EffectiveOptions {
        classification,
        ttl: options.ttl.unwrap_or_else(|| classification.default_ttl()),
        compress: options.compress.unwrap_or(true),
        encrypt: options
            .encrypt
            .unwrap_or_else(|| classification.encrypts_by_default()),
        max_size: options.max_size.unwrap_or(defaults.max_item_size),
        prefix: options.prefix.clone(),
        version: options.version.unwrap_or(defaults.schema_version),
        version_pinned: options.version.is_some(),
        retry_attempts: options.retry_attempts.unwrap_or(defaults.retry_attempts),
        silent: options.silent.unwrap_or(true),
        backend: options
            .backend
            .unwrap_or_else(|| classification.default_backend()),
    }
}

/// Storage key for a user key: `<namespace>_<key>` or `<namespace>_<prefix>:<key>`.
pub fn storage_key(namespace: &str, prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(p) => format!("{}_{}:{}", namespace, p, key),
        None => format!("{}_{}", namespace, key),
    }
}

/// Enumeration prefix covering every user key in a namespace.
pub fn user_key_prefix(namespace: &str) -> String {
    format!("{}_", namespace)
}

/// Reserved slot name; never collides with [`storage_key`] output.
pub fn reserved_key(namespace: &str, slot: &str) -> String {
    format!("{}:{}", namespace, slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> EngineDefaults {
        EngineDefaults {
            schema_version: 1,
            max_item_size: 1024 * 1024,
            retry_attempts: 3,
        }
    }

    #[test]
    fn test_each_classification_maps_to_documented_backend_and_ttl() {
        let cases = [
            (Classification::Public, BackendKind::Local, 30 * DAY, false),
            (Classification::Internal, BackendKind::Local, 7 * DAY, false),
            (Classification::Confidential, BackendKind::Session, DAY, false),
            (Classification::Secret, BackendKind::Secure, HOUR, true),
        ];
        for (class, backend, ttl, encrypt) in cases {
            let eff = resolve(&StorageOptions::classified(class), &defaults());
            assert_eq!(eff.backend, backend, "{}", class);
            assert_eq!(eff.ttl, ttl, "{}", class);
            assert_eq!(eff.encrypt, encrypt, "{}", class);
            assert!(eff.compress);
        }
    }

    #[test]
    fn test_ttl_values_in_millis() {
        assert_eq!(Classification::Secret.default_ttl().as_millis(), 3_600_000);
        assert_eq!(
            Classification::Public.default_ttl().as_millis(),
            30 * 24 * 3_600_000
        );
    }

    #[test]
    fn test_empty_options_default_to_internal() {
        let eff = resolve(&StorageOptions::new(), &defaults());
        assert_eq!(eff.classification, Classification::Internal);
        assert_eq!(eff.max_size, 1024 * 1024);
        assert_eq!(eff.retry_attempts, 3);
        assert_eq!(eff.version, 1);
        assert!(!eff.version_pinned);
        assert!(eff.silent);
    }

    #[test]
    fn test_explicit_values_win() {
        let opts = StorageOptions::classified(Classification::Secret)
            .encrypt(false)
            .ttl(Duration::from_millis(5))
            .backend(BackendKind::Cookie)
            .version(4);
        let eff = resolve(&opts, &defaults());
        assert!(!eff.encrypt);
        assert_eq!(eff.ttl, Duration::from_millis(5));
        assert_eq!(eff.backend, BackendKind::Cookie);
        assert_eq!(eff.version, 4);
        assert!(eff.version_pinned);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        for class in Classification::ALL {
            let opts = StorageOptions::classified(class).prefix("ui");
            let once = resolve(&opts, &defaults());
            let twice = resolve(&once.to_options(), &defaults());
            assert_eq!(once, twice);
            assert_eq!(resolve(&opts, &defaults()), once);
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(StorageOptions::new().max_size(0).validate().is_err());
        assert!(StorageOptions::new().ttl(Duration::ZERO).validate().is_err());
        assert!(StorageOptions::new().retry_attempts(0).validate().is_err());
        assert!(StorageOptions::new().prefix("a:b").validate().is_err());
        assert!(StorageOptions::new().prefix("").validate().is_err());
        assert!(StorageOptions::new().max_size(1).prefix("ui").validate().is_ok());
    }

    #[test]
    fn test_key_layout_never_collides_with_reserved() {
        assert_eq!(storage_key("app", None, "prefs"), "app_prefs");
        assert_eq!(storage_key("app", Some("ui"), "prefs"), "app_ui:prefs");
        let reserved = reserved_key("app", "metrics");
        assert_eq!(reserved, "app:metrics");
        assert!(!reserved.starts_with(&user_key_prefix("app")));
        assert!(storage_key("app", None, ":metrics").starts_with(&user_key_prefix("app")));
    }
}
