//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::CookieConfig;
use crate::cipher::CipherConfig;
use crate::classification::EngineDefaults;
use crate::compression::CompressionAlgorithm;
use crate::error::{StorageError, StorageResult};
use crate::locks::DEFAULT_STRIPES;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryConfig;

/// Everything an engine instance needs to know up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Key namespace. User keys become `<namespace>_<key>`.
    pub namespace: String,
    /// Schema version stamped on new envelopes.
    pub schema_version: u32,
    /// Serialized values above this size are compression candidates.
    pub compression_threshold: usize,
    /// Compression algorithm.
    pub compression: CompressionAlgorithm,
    /// Aggregate ceiling for user entries across all backends, in bytes.
    pub max_storage_size: u64,
    /// Default per-item envelope ceiling, in bytes.
    pub max_item_size: u64,
    /// Period of the background cleanup sweep. 0 disables it.
    pub cleanup_interval_secs: u64,
    /// Reserved slot name for persisted metrics.
    pub metrics_key: String,
    /// Persist metrics every N operations.
    pub metrics_persist_every: u64,
    /// Operations at least this slow land in the slow-operation ring.
    pub slow_op_threshold_ms: u64,
    /// Directory of the durable Local backend.
    pub data_dir: PathBuf,
    /// Cookie jar limits and signing secret.
    pub cookie: CookieConfig,
    /// Persist retry policy.
    pub retry: RetryConfig,
    /// Cipher selection and fallback policy.
    pub cipher: CipherConfig,
    /// Timeout for a single backend call.
    pub backend_timeout_ms: u64,
    /// Usage fraction above which `set` sweeps expired entries first.
    pub cleanup_watermark: f64,
    /// Stripes in the per-key lock table.
    pub lock_stripes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: String::from("tiervault"),
            schema_version: 1,
            compression_threshold: 1024,
            compression: CompressionAlgorithm::Lz4,
            max_storage_size: 50 * 1024 * 1024,
            max_item_size: 5 * 1024 * 1024,
            cleanup_interval_secs: 300,
            metrics_key: String::from("metrics"),
            metrics_persist_every: 10,
            slow_op_threshold_ms: 100,
            data_dir: PathBuf::from("tiervault-data"),
            cookie: CookieConfig::default(),
            retry: RetryConfig::default(),
            cipher: CipherConfig::default(),
            backend_timeout_ms: 5_000,
            cleanup_watermark: 0.9,
            lock_stripes: DEFAULT_STRIPES,
        }
    }
}

impl EngineConfig {
    /// Load from a `.toml` or `.json` file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: EngineConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)
                .map_err(|e| StorageError::Validation(format!("invalid TOML config: {}", e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| StorageError::Validation(format!("invalid JSON config: {}", e)))?,
            _ => {
                return Err(StorageError::Validation(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> StorageResult<()> {
        let fail = |msg: String| Err(StorageError::Validation(msg));
        if self.namespace.is_empty()
            || self.namespace.contains(':')
            || self.namespace.contains('_')
        {
            return fail(format!(
                "namespace {:?} must be non-empty and contain neither ':' nor '_'",
                self.namespace
            ));
        }
        if self.metrics_key.is_empty() {
            return fail("metrics_key must not be empty".to_string());
        }
        if self.max_storage_size == 0 {
            return fail("max_storage_size must be positive".to_string());
        }
        if self.max_item_size == 0 || self.max_item_size > self.max_storage_size {
            return fail(format!(
                "max_item_size must be in 1..={}",
                self.max_storage_size
            ));
        }
        if !(self.cleanup_watermark > 0.0 && self.cleanup_watermark <= 1.0) {
            return fail(format!(
                "cleanup_watermark {} must be in (0, 1]",
                self.cleanup_watermark
            ));
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".to_string());
        }
        if self.backend_timeout_ms == 0 {
            return fail("backend_timeout_ms must be positive".to_string());
        }
        if self.metrics_persist_every == 0 {
            return fail("metrics_persist_every must be positive".to_string());
        }
        if self.cookie.max_cookie_bytes == 0 || self.cookie.max_cookies == 0 {
            return fail("cookie limits must be positive".to_string());
        }
        if let CompressionAlgorithm::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return fail(format!("zstd level {} out of range 1..=22", level));
            }
        }
        Ok(())
    }

    /// Defaults handed to option resolution.
    pub fn engine_defaults(&self) -> EngineDefaults {
        EngineDefaults {
            schema_version: self.schema_version,
            max_item_size: self.max_item_size,
            retry_attempts: self.retry.max_attempts,
        }
    }

    /// Pipeline knobs.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            compression_threshold: self.compression_threshold,
            compression: self.compression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.namespace, "tiervault");
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.metrics_persist_every, 10);
        assert_eq!(config.slow_op_threshold_ms, 100);
        assert!((config.cleanup_watermark - 0.9).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
namespace = "app"
max_storage_size = 1048576
max_item_size = 4096
data_dir = "/tmp/app-store"

[cookie]
max_cookie_bytes = 2048
max_cookies = 20

[cipher]
algorithm = "ChaCha20Poly1305"
available = true
allow_degraded = false
            "#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "app");
        assert_eq!(config.max_item_size, 4096);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/app-store"));
        assert_eq!(config.cookie.max_cookie_bytes, 2048);
        assert!(!config.cipher.allow_degraded);
        assert_eq!(config.schema_version, 1);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{ "namespace": "web", "schema_version": 3 }}"#).unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "web");
        assert_eq!(config.schema_version, 3);
        assert_eq!(config.engine_defaults().schema_version, 3);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            EngineConfig {
                namespace: "a:b".into(),
                ..Default::default()
            },
            EngineConfig {
                namespace: "a_b".into(),
                ..Default::default()
            },
            EngineConfig {
                max_item_size: 0,
                ..Default::default()
            },
            EngineConfig {
                max_item_size: 10,
                max_storage_size: 5,
                ..Default::default()
            },
            EngineConfig {
                cleanup_watermark: 1.5,
                ..Default::default()
            },
            EngineConfig {
                compression: CompressionAlgorithm::Zstd { level: 40 },
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config.namespace);
        }
    }
}
