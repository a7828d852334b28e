//! AES-256-GCM and ChaCha20-Poly1305 AEAD sealing with HKDF per-item key derivation.
//!
//! Sealed layout: `[tag: u8][nonce: 12 bytes][ciphertext || 16-byte auth tag]`.
//! The tag byte names the algorithm, so opening needs nothing but the bytes and the key.
//! Tag [`DEGRADED_TAG`] marks the keystream-mask fallback, which is NOT confidential.

use crate::error::StorageError;
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce length for both AEAD ciphers.
pub const NONCE_LEN: usize = 12;

const TAG_AES_GCM: u8 = 0x01;
const TAG_CHACHA: u8 = 0x02;
/// Leading byte of a payload encoded with the degraded (non-confidential) fallback.
pub const DEGRADED_TAG: u8 = 0xD0;

/// 256-bit (32-byte) encryption key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl EncryptionKey {
    /// Generate a fresh random key from the thread RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        EncryptionKey(bytes)
    }
}

/// 96-bit (12-byte) nonce for AEAD ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(pub [u8; NONCE_LEN]);

/// AEAD cipher selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM, hardware accelerated on x86 with AES-NI
    #[default]
    AesGcm256,
    /// ChaCha20-Poly1305; constant-time and fast without AES-NI
    ChaCha20Poly1305,
}

impl EncryptionAlgorithm {
    fn tag(self) -> u8 {
        match self {
            EncryptionAlgorithm::AesGcm256 => TAG_AES_GCM,
            EncryptionAlgorithm::ChaCha20Poly1305 => TAG_CHACHA,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_AES_GCM => Some(EncryptionAlgorithm::AesGcm256),
            TAG_CHACHA => Some(EncryptionAlgorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// Derive a per-item key from master key + storage key using HKDF-SHA256.
///
/// Binding the key to the storage slot means an envelope copied under another
/// key fails authentication.
pub fn derive_item_key(master_key: &EncryptionKey, storage_key: &str) -> EncryptionKey {
    let hk = Hkdf::<Sha256>::new(None, &master_key.0);
    let mut okm = [0u8; 32];
    let mut info = Vec::with_capacity(18 + storage_key.len());
    info.extend_from_slice(b"tiervault-item-key");
    info.extend_from_slice(storage_key.as_bytes());
    // 32 bytes is far below HKDF-SHA256's 8160-byte output limit.
    let _ = hk.expand(&info, &mut okm);
    EncryptionKey(okm)
}

/// Generate a cryptographically random 12-byte nonce
pub fn random_nonce() -> Nonce {
    use rand::RngCore;
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    Nonce(bytes)
}

/// Encrypt plaintext under a fresh random nonce. Returns the self-contained sealed buffer.
pub fn seal(
    plaintext: &[u8],
    key: &EncryptionKey,
    algo: EncryptionAlgorithm,
) -> Result<Vec<u8>, StorageError> {
    let nonce = random_nonce();
    let ciphertext = match algo {
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            let n = aes_gcm::Nonce::from_slice(&nonce.0);
            cipher
                .encrypt(n, plaintext)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            let n = chacha20poly1305::Nonce::from_slice(&nonce.0);
            cipher
                .encrypt(n, plaintext)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?
        }
    };
    let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    out.push(algo.tag());
    out.extend_from_slice(&nonce.0);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed buffer. Returns DecryptionAuthFailed if tampered, truncated or wrongly keyed.
pub fn open(sealed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, StorageError> {
    if sealed.len() < 1 + NONCE_LEN {
        return Err(StorageError::DecryptionAuthFailed);
    }
    let algo =
        EncryptionAlgorithm::from_tag(sealed[0]).ok_or(StorageError::DecryptionAuthFailed)?;
    let nonce = &sealed[1..1 + NONCE_LEN];
    let ciphertext = &sealed[1 + NONCE_LEN..];
    match algo {
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| StorageError::DecryptionAuthFailed)
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| StorageError::DecryptionAuthFailed)
        }
    }
}

/// True if the buffer was produced by [`mask_degraded`].
pub fn is_degraded(sealed: &[u8]) -> bool {
    sealed.first() == Some(&DEGRADED_TAG)
}

/// Reversible keystream mask used when no AEAD is available.
///
/// The keystream is derived from a public seed only: this hides bytes from casual
/// inspection and nothing more. No confidentiality, no authentication.
pub fn mask_degraded(data: &[u8], seed: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + data.len());
    out.push(DEGRADED_TAG);
    out.extend(xor_keystream(data, seed));
    out
}

/// Inverse of [`mask_degraded`].
pub fn unmask_degraded(sealed: &[u8], seed: &str) -> Result<Vec<u8>, StorageError> {
    if !is_degraded(sealed) {
        return Err(StorageError::DecryptionAuthFailed);
    }
    Ok(xor_keystream(&sealed[1..], seed))
}

fn xor_keystream(data: &[u8], seed: &str) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new_derive_key("tiervault degraded encoding v1");
    hasher.update(seed.as_bytes());
    let mut stream = vec![0u8; data.len()];
    hasher.finalize_xof().fill(&mut stream);
    data.iter().zip(stream).map(|(b, k)| b ^ k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey([42u8; 32])
    }

    proptest! {
        #[test]
        fn prop_aesgcm_roundtrip(data in prop::collection::vec(0u8..=255, 0..65_536)) {
            let key = test_key();
            let enc = seal(&data, &key, EncryptionAlgorithm::AesGcm256).unwrap();
            let dec = open(&enc, &key).unwrap();
            prop_assert_eq!(dec, data);
        }
        #[test]
        fn prop_chacha_roundtrip(data in prop::collection::vec(0u8..=255, 0..65_536)) {
            let key = test_key();
            let enc = seal(&data, &key, EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
            let dec = open(&enc, &key).unwrap();
            prop_assert_eq!(dec, data);
        }
        #[test]
        fn prop_degraded_roundtrip(data in prop::collection::vec(0u8..=255, 0..8192)) {
            let masked = mask_degraded(&data, "ns");
            prop_assert!(is_degraded(&masked));
            prop_assert_eq!(unmask_degraded(&masked, "ns").unwrap(), data);
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let mut enc = seal(b"secret", &key, EncryptionAlgorithm::AesGcm256).unwrap();
        let last = enc.len() - 1;
        enc[last] ^= 0xff;
        assert!(matches!(
            open(&enc, &key),
            Err(StorageError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let enc = seal(b"secret", &key, EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
        let wrong = EncryptionKey([99u8; 32]);
        assert!(matches!(
            open(&enc, &wrong),
            Err(StorageError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let key = test_key();
        let a = seal(b"same", &key, EncryptionAlgorithm::AesGcm256).unwrap();
        let b = seal(b"same", &key, EncryptionAlgorithm::AesGcm256).unwrap();
        assert_ne!(a[1..1 + NONCE_LEN], b[1..1 + NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn short_or_unknown_buffer_fails() {
        let key = test_key();
        assert!(open(&[TAG_AES_GCM, 1, 2], &key).is_err());
        let mut enc = seal(b"x", &key, EncryptionAlgorithm::AesGcm256).unwrap();
        enc[0] = 0x7f;
        assert!(matches!(
            open(&enc, &key),
            Err(StorageError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let key = test_key();
        let enc = seal(&[], &key, EncryptionAlgorithm::AesGcm256).unwrap();
        assert_eq!(enc.len(), 1 + NONCE_LEN + 16);
        assert!(open(&enc, &key).unwrap().is_empty());
    }

    #[test]
    fn item_keys_are_deterministic_and_distinct() {
        let master = test_key();
        assert_eq!(
            derive_item_key(&master, "app_token").0,
            derive_item_key(&master, "app_token").0
        );
        assert_ne!(
            derive_item_key(&master, "app_token").0,
            derive_item_key(&master, "app_other").0
        );
    }

    #[test]
    fn degraded_mask_is_not_plaintext_but_not_secret_either() {
        let masked = mask_degraded(b"abc123", "app");
        assert_ne!(&masked[1..], b"abc123");
        // Anyone knowing the seed can reverse it.
        assert_eq!(unmask_degraded(&masked, "app").unwrap(), b"abc123");
        assert!(unmask_degraded(b"\x01plain", "app").is_err());
    }
}
