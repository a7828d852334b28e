//! Serialization pipeline: value → serialize → compress → encrypt → checksum → envelope
//!
//! Read path is the exact inverse: verify checksum → decrypt → decompress → deserialize.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    checksum,
    cipher::CipherProvider,
    classification::EffectiveOptions,
    clock::Clock,
    compression::{compress, decompress, is_compressible, CompressionAlgorithm},
    envelope::{StorageEnvelope, StorageMetadata},
    error::{StorageError, StorageResult},
};

/// Configuration for the envelope pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Serialized values must exceed this many bytes before compression is attempted.
    pub compression_threshold: usize,
    /// Compression algorithm for new envelopes.
    pub compression: CompressionAlgorithm,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 1024,
            compression: CompressionAlgorithm::Lz4,
        }
    }
}

/// Turns typed values into storage envelopes and back.
pub struct EnvelopePipeline {
    config: PipelineConfig,
    cipher: Arc<CipherProvider>,
    clock: Arc<dyn Clock>,
}

impl EnvelopePipeline {
    /// Create a pipeline over a cipher provider and clock.
    pub fn new(config: PipelineConfig, cipher: Arc<CipherProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            cipher,
            clock,
        }
    }

    /// Access pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Encode a value for `storage_key` under resolved options.
    #[instrument(skip(self, value, options), fields(class = %options.classification))]
    pub async fn encode<T: Serialize + ?Sized>(
        &self,
        storage_key: &str,
        value: &T,
        options: &EffectiveOptions,
    ) -> StorageResult<StorageEnvelope> {
        let serialized = serde_json::to_vec(value)?;
        let size_bytes = serialized.len() as u64;

        // Compress only above threshold, and keep the result only if it actually shrank.
        let (mut data, compressed) = if options.compress
            && serialized.len() > self.config.compression_threshold
            && is_compressible(&serialized)
        {
            let c = compress(&serialized, self.config.compression)?;
            if c.len() < serialized.len() {
                debug!(original = serialized.len(), compressed = c.len(), "value compressed");
                (c, true)
            } else {
                (serialized, false)
            }
        } else {
            (serialized, false)
        };

        let mut degraded = false;
        if options.encrypt {
            data = match self.cipher.encrypt(storage_key, &data).await {
                Ok(sealed) => sealed,
                Err(StorageError::CryptoUnavailable(reason)) => {
                    warn!(
                        key = storage_key,
                        %reason,
                        "storing with degraded encoding: NOT confidential"
                    );
                    degraded = true;
                    self.cipher.encode_degraded(&data)?
                }
                Err(e) => return Err(e),
            };
        }

        let checksum = checksum::digest(&data);
        Ok(StorageEnvelope {
            metadata: StorageMetadata {
                version: options.version,
                timestamp: self.clock.now_ms(),
                ttl_ms: options.ttl.as_millis() as u64,
                size_bytes,
                compressed,
                encrypted: options.encrypt,
                degraded,
                checksum,
                classification: options.classification,
            },
            data,
        })
    }

    /// Checksum verification alone.
    pub fn verify(&self, envelope: &StorageEnvelope) -> StorageResult<()> {
        if checksum::verify(&envelope.data, &envelope.metadata.checksum) {
            Ok(())
        } else {
            Err(StorageError::Integrity {
                expected: envelope.metadata.checksum.clone(),
                actual: checksum::digest(&envelope.data),
            })
        }
    }

    /// Recover the serialized value bytes: verify → decrypt → decompress.
    pub async fn open_payload(
        &self,
        storage_key: &str,
        envelope: &StorageEnvelope,
    ) -> StorageResult<Vec<u8>> {
        self.verify(envelope)?;
        let meta = &envelope.metadata;
        let decrypted = if meta.encrypted {
            self.cipher.decrypt(storage_key, &envelope.data).await?
        } else {
            envelope.data.clone()
        };
        let plain = if meta.compressed {
            decompress(&decrypted)?
        } else {
            decrypted
        };
        if plain.len() as u64 != meta.size_bytes {
            return Err(StorageError::Integrity {
                expected: format!("{} bytes", meta.size_bytes),
                actual: format!("{} bytes", plain.len()),
            });
        }
        Ok(plain)
    }

    /// Decode an envelope back into a value.
    #[instrument(skip(self, envelope))]
    pub async fn decode<T: DeserializeOwned>(
        &self,
        storage_key: &str,
        envelope: &StorageEnvelope,
    ) -> StorageResult<T> {
        let plain = self.open_payload(storage_key, envelope).await?;
        Ok(serde_json::from_slice(&plain)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cipher::CipherConfig;
    use crate::classification::{resolve, Classification, EngineDefaults, StorageOptions};
    use crate::clock::ManualClock;
    use std::collections::BTreeMap;

    fn pipeline(cipher: CipherConfig) -> EnvelopePipeline {
        let provider = CipherProvider::new(
            cipher,
            Arc::new(MemoryBackend::new()),
            "t:cipher-key",
            "t",
        );
        EnvelopePipeline::new(
            PipelineConfig::default(),
            Arc::new(provider),
            Arc::new(ManualClock::new(5_000)),
        )
    }

    fn opts(options: StorageOptions) -> EffectiveOptions {
        resolve(
            &options,
            &EngineDefaults {
                schema_version: 2,
                max_item_size: 1 << 20,
                retry_attempts: 3,
            },
        )
    }

    #[tokio::test]
    async fn roundtrip_every_classification() {
        let p = pipeline(CipherConfig::default());
        for class in Classification::ALL {
            let value = vec!["a".to_string(), "b".to_string()];
            let env = p
                .encode("t_k", &value, &opts(StorageOptions::classified(class)))
                .await
                .unwrap();
            assert_eq!(env.metadata.classification, class);
            assert_eq!(env.metadata.encrypted, class == Classification::Secret);
            assert_eq!(env.metadata.version, 2);
            assert_eq!(env.metadata.timestamp, 5_000);
            let back: Vec<String> = p.decode("t_k", &env).await.unwrap();
            assert_eq!(back, value);
        }
    }

    #[tokio::test]
    async fn small_values_not_compressed() {
        let p = pipeline(CipherConfig::default());
        let env = p.encode("t_k", "short", &opts(StorageOptions::new())).await.unwrap();
        assert!(!env.metadata.compressed);
        assert_eq!(env.data, br#""short""#);
        assert_eq!(env.metadata.size_bytes, 7);
    }

    #[tokio::test]
    async fn large_repetitive_values_compressed() {
        let p = pipeline(CipherConfig::default());
        let mut map = BTreeMap::new();
        for i in 0..200 {
            map.insert(format!("key{:03}", i), "dark".repeat(8));
        }
        let env = p.encode("t_k", &map, &opts(StorageOptions::new())).await.unwrap();
        assert!(env.metadata.compressed);
        assert!((env.data.len() as u64) < env.metadata.size_bytes);
        let back: BTreeMap<String, String> = p.decode("t_k", &env).await.unwrap();
        assert_eq!(back, map);
    }

    #[tokio::test]
    async fn incompressible_values_recorded_uncompressed() {
        use rand::RngCore;
        let p = pipeline(CipherConfig::default());
        let mut raw = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut raw);
        let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
        let env = p.encode("t_k", &raw, &opts(StorageOptions::new())).await.unwrap();
        let back: Vec<u8> = p.decode("t_k", &env).await.unwrap();
        assert_eq!(back, raw);
        let env = p
            .encode("t_k", &hex, &opts(StorageOptions::new().compress(false)))
            .await
            .unwrap();
        assert!(!env.metadata.compressed);
    }

    #[tokio::test]
    async fn empty_values_roundtrip() {
        let p = pipeline(CipherConfig::default());
        let secret = opts(StorageOptions::classified(Classification::Secret));
        let env = p.encode("t_k", "", &secret).await.unwrap();
        let back: String = p.decode("t_k", &env).await.unwrap();
        assert_eq!(back, "");
        let env = p.encode("t_k", &Vec::<u8>::new(), &secret).await.unwrap();
        let back: Vec<u8> = p.decode("t_k", &env).await.unwrap();
        assert!(back.is_empty());
    }

    #[tokio::test]
    async fn corruption_detected_before_decrypt() {
        let p = pipeline(CipherConfig::default());
        let mut env = p
            .encode("t_k", "abc123", &opts(StorageOptions::classified(Classification::Secret)))
            .await
            .unwrap();
        env.data[3] ^= 0x40;
        assert!(matches!(
            p.decode::<String>("t_k", &env).await,
            Err(StorageError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn decode_is_idempotent() {
        let p = pipeline(CipherConfig::default());
        let env = p
            .encode("t_k", &42u32, &opts(StorageOptions::classified(Classification::Secret)))
            .await
            .unwrap();
        let a: u32 = p.decode("t_k", &env).await.unwrap();
        let b: u32 = p.decode("t_k", &env).await.unwrap();
        assert_eq!((a, b), (42, 42));
    }

    #[tokio::test]
    async fn degraded_mode_is_flagged() {
        let p = pipeline(CipherConfig {
            available: false,
            ..Default::default()
        });
        let env = p
            .encode("t_k", "abc123", &opts(StorageOptions::classified(Classification::Secret)))
            .await
            .unwrap();
        assert!(env.metadata.encrypted);
        assert!(env.metadata.degraded);
        let back: String = p.decode("t_k", &env).await.unwrap();
        assert_eq!(back, "abc123");
    }

    #[tokio::test]
    async fn degraded_disabled_surfaces_crypto_unavailable() {
        let p = pipeline(CipherConfig {
            available: false,
            allow_degraded: false,
            ..Default::default()
        });
        let err = p
            .encode("t_k", "abc123", &opts(StorageOptions::classified(Classification::Secret)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CryptoUnavailable(_)));
    }

    #[tokio::test]
    async fn wrong_type_is_serialization_error() {
        let p = pipeline(CipherConfig::default());
        let env = p.encode("t_k", "text", &opts(StorageOptions::new())).await.unwrap();
        assert!(matches!(
            p.decode::<u64>("t_k", &env).await,
            Err(StorageError::Serialization(_))
        ));
    }
}
