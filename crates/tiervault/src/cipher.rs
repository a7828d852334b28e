//! Cipher provider: AEAD over opaque buffers with a lazily created, persisted master key.
//!
//! The master key lives in a reserved slot on the durable backend, never alongside user
//! envelopes. It is created once per store; concurrent first callers all await the
//! same initialisation instead of racing to generate competing keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::backend::StorageBackend;
use crate::encryption::{
    derive_item_key, is_degraded, mask_degraded, open, seal, unmask_degraded,
    EncryptionAlgorithm, EncryptionKey,
};
use crate::error::{StorageError, StorageResult};

const KEY_SLOT_VERSION: u32 = 1;

/// Cipher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// AEAD used for new payloads.
    pub algorithm: EncryptionAlgorithm,
    /// Whether a secure AEAD primitive may be used on this host. While false, reads of
    /// AEAD-sealed entries fail with `CryptoUnavailable` and the entries are kept.
    pub available: bool,
    /// Allow the non-confidential mask when no AEAD is available.
    pub allow_degraded: bool,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            algorithm: EncryptionAlgorithm::AesGcm256,
            available: true,
            allow_degraded: true,
        }
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeySlot {
    version: u32,
    key: [u8; 32],
}

/// AEAD provider with key lifecycle management.
pub struct CipherProvider {
    config: CipherConfig,
    key_slot: String,
    mask_seed: String,
    keystore: Arc<dyn StorageBackend>,
    master: OnceCell<EncryptionKey>,
    key_initializations: AtomicU64,
}

impl std::fmt::Debug for CipherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherProvider")
            .field("config", &self.config)
            .field("key_slot", &self.key_slot)
            .field("key_loaded", &self.master.initialized())
            .finish()
    }
}

impl CipherProvider {
    /// Creates a provider whose key lives at `key_slot` on `keystore`.
    /// `mask_seed` keys the degraded fallback mask.
    pub fn new(
        config: CipherConfig,
        keystore: Arc<dyn StorageBackend>,
        key_slot: impl Into<String>,
        mask_seed: impl Into<String>,
    ) -> Self {
        Self {
            config,
            key_slot: key_slot.into(),
            mask_seed: mask_seed.into(),
            keystore,
            master: OnceCell::new(),
            key_initializations: AtomicU64::new(0),
        }
    }

    /// True if AEAD sealing is possible.
    pub fn is_available(&self) -> bool {
        self.config.available
    }

    /// AEAD used for new payloads.
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.config.algorithm
    }

    /// How many times the key slot was loaded or created. Stays at 1 once warm.
    pub fn key_initializations(&self) -> u64 {
        self.key_initializations.load(Ordering::Relaxed)
    }

    async fn master_key(&self) -> StorageResult<&EncryptionKey> {
        self.master.get_or_try_init(|| self.load_or_create()).await
    }

    async fn load_or_create(&self) -> StorageResult<EncryptionKey> {
        self.key_initializations.fetch_add(1, Ordering::Relaxed);
        if let Some(bytes) = self.keystore.get(&self.key_slot).await? {
            match bincode::deserialize::<KeySlot>(&bytes) {
                Ok(slot) if slot.version == KEY_SLOT_VERSION => {
                    debug!(slot = %self.key_slot, "loaded cipher key");
                    return Ok(EncryptionKey(slot.key));
                }
                Ok(slot) => warn!(
                    slot = %self.key_slot,
                    version = slot.version,
                    "unsupported key slot version, generating a new key"
                ),
                Err(e) => warn!(
                    slot = %self.key_slot,
                    error = %e,
                    "unreadable key slot, generating a new key"
                ),
            }
        }

        let key = EncryptionKey::generate();
        let slot = KeySlot {
            version: KEY_SLOT_VERSION,
            key: key.0,
        };
        let bytes = bincode::serialize(&slot)?;
        self.keystore.set(&self.key_slot, bytes, None).await?;
        info!(slot = %self.key_slot, "generated new cipher key");
        Ok(key)
    }

    /// Seal `plaintext` under a subkey bound to `storage_key`.
    ///
    /// Fails with `CryptoUnavailable` when no AEAD may be used.
    pub async fn encrypt(&self, storage_key: &str, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        if !self.config.available {
            return Err(StorageError::CryptoUnavailable(
                "no AEAD primitive available".to_string(),
            ));
        }
        let master = self.master_key().await?;
        let item_key = derive_item_key(master, storage_key);
        seal(plaintext, &item_key, self.config.algorithm)
    }

    /// The weaker reversible encoding used when `encrypt` reports `CryptoUnavailable`.
    ///
    /// Not confidentiality-preserving. Fails if the fallback is disabled.
    pub fn encode_degraded(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        if !self.config.allow_degraded {
            return Err(StorageError::CryptoUnavailable(
                "no AEAD primitive available and degraded fallback is disabled".to_string(),
            ));
        }
        Ok(mask_degraded(plaintext, &self.mask_seed))
    }

    /// Inverse of `encrypt` or `encode_degraded`, chosen by the payload's leading tag.
    pub async fn decrypt(&self, storage_key: &str, sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if is_degraded(sealed) {
            return unmask_degraded(sealed, &self.mask_seed);
        }
        if !self.config.available {
            return Err(StorageError::CryptoUnavailable(
                "payload is AEAD-sealed but no AEAD primitive is available".to_string(),
            ));
        }
        let master = self.master_key().await?;
        let item_key = derive_item_key(master, storage_key);
        open(sealed, &item_key)
    }
}
