//! Signed, size-capped cookie jar.
//!
//! Each cookie value is `hex(bytes) "." hex(HMAC-SHA256(name || bytes))`. The encoded
//! `name=value` pair must fit the per-cookie ceiling (4096 bytes by default, the usual
//! browser limit). A cookie whose signature does not verify reads as missing.
//!
//! The TTL hint becomes the cookie's max-age, which only filters [`CookieBackend::header_pairs`].
//! Stored entries expire through their envelope like on every other backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use zeroize::Zeroizing;

use super::{BackendKind, StorageBackend};
use crate::clock::Clock;
use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Hex length of an HMAC-SHA256 tag.
const SIGNATURE_HEX_LEN: usize = 64;

/// Cookie jar limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Maximum encoded size of one `name=value` pair in bytes.
    pub max_cookie_bytes: usize,
    /// Maximum number of cookies in the jar.
    pub max_cookies: usize,
    /// Signing secret. A random per-process secret is used when unset.
    pub secret: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            max_cookie_bytes: 4096,
            max_cookies: 50,
            secret: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Cookie {
    value: String,
    expires_at_ms: Option<u64>,
}

impl Cookie {
    /// Same boundary as envelope expiry: still live at exactly `expires_at_ms`.
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|exp| exp < now_ms)
    }
}

/// In-process cookie jar.
pub struct CookieBackend {
    config: CookieConfig,
    signing_key: Zeroizing<Vec<u8>>,
    jar: Mutex<BTreeMap<String, Cookie>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CookieBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieBackend")
            .field("config.max_cookie_bytes", &self.config.max_cookie_bytes)
            .field("config.max_cookies", &self.config.max_cookies)
            .field("cookies", &self.jar.lock().len())
            .finish()
    }
}

impl CookieBackend {
    /// Creates an empty jar.
    pub fn new(config: CookieConfig, clock: Arc<dyn Clock>) -> Self {
        let signing_key = match &config.secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };
        Self {
            config,
            signing_key: Zeroizing::new(signing_key),
            jar: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Encoded size of a `name=value` pair for a payload of `len` bytes.
    pub fn encoded_len(key: &str, len: usize) -> usize {
        key.len() + 1 + len * 2 + 1 + SIGNATURE_HEX_LEN
    }

    fn mac(&self, key: &str, payload: &[u8]) -> StorageResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
        mac.update(key.as_bytes());
        mac.update(payload);
        Ok(mac)
    }

    fn encode(&self, key: &str, payload: &[u8]) -> StorageResult<String> {
        let tag = self.mac(key, payload)?.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(payload), hex::encode(tag)))
    }

    fn decode(&self, key: &str, value: &str) -> Option<Vec<u8>> {
        let (data_hex, tag_hex) = value.rsplit_once('.')?;
        let payload = hex::decode(data_hex).ok()?;
        let tag = hex::decode(tag_hex).ok()?;
        self.mac(key, &payload).ok()?.verify_slice(&tag).ok()?;
        Some(payload)
    }

    /// Raw `name=value` pairs as they would be sent on the wire, expired cookies excluded.
    pub fn header_pairs(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        self.jar
            .lock()
            .iter()
            .filter(|(_, c)| !c.is_expired(now))
            .map(|(k, c)| format!("{}={}", k, c.value))
            .collect()
    }

    /// Replace a cookie's raw encoded value, bypassing signing. Used for fault injection.
    pub fn set_raw(&self, key: &str, value: &str) {
        self.jar.lock().insert(
            key.to_string(),
            Cookie {
                value: value.to_string(),
                expires_at_ms: None,
            },
        );
    }
}

#[async_trait]
impl StorageBackend for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    fn fits(&self, key: &str, len: usize) -> bool {
        Self::encoded_len(key, len) <= self.config.max_cookie_bytes
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        // Max-age only governs the wire. Expiry of stored entries is decided by the
        // envelope, so an aged-out cookie stays readable until the engine removes it.
        let Some(cookie) = self.jar.lock().get(key).cloned() else {
            return Ok(None);
        };
        match self.decode(key, &cookie.value) {
            Some(payload) => Ok(Some(payload)),
            None => {
                warn!(key, "cookie signature mismatch, ignoring");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_hint: Option<Duration>) -> StorageResult<()> {
        let encoded_len = Self::encoded_len(key, value.len());
        if encoded_len > self.config.max_cookie_bytes {
            return Err(StorageError::QuotaExceeded {
                required: encoded_len as u64,
                available: self.config.max_cookie_bytes as u64,
            });
        }
        let encoded = self.encode(key, &value)?;
        let expires_at_ms = ttl_hint.map(|ttl| {
            self.clock
                .now_ms()
                .saturating_add(ttl.as_millis() as u64)
        });

        let mut jar = self.jar.lock();
        if !jar.contains_key(key) && jar.len() >= self.config.max_cookies {
            return Err(StorageError::QuotaExceeded {
                required: 1,
                available: 0,
            });
        }
        jar.insert(
            key.to_string(),
            Cookie {
                value: encoded,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.jar.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .jar
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn jar(clock: ManualClock) -> CookieBackend {
        CookieBackend::new(CookieConfig::default(), Arc::new(clock))
    }

    #[tokio::test]
    async fn test_roundtrip_and_wire_format() {
        let b = jar(ManualClock::new(0));
        b.set("app_sid", b"abc".to_vec(), None).await.unwrap();
        assert_eq!(b.get("app_sid").await.unwrap(), Some(b"abc".to_vec()));
        let pairs = b.header_pairs();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].starts_with("app_sid=616263."));
        assert_eq!(pairs[0].len(), CookieBackend::encoded_len("app_sid", 3));
    }

    #[tokio::test]
    async fn test_oversized_rejected() {
        let b = jar(ManualClock::new(0));
        let big = vec![7u8; 2100];
        assert!(!b.fits("app_big", big.len()));
        let err = b.set("app_big", big, None).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(b.get("app_big").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_max_cookie_count() {
        let config = CookieConfig {
            max_cookies: 2,
            ..Default::default()
        };
        let b = CookieBackend::new(config, Arc::new(ManualClock::new(0)));
        b.set("a", vec![1], None).await.unwrap();
        b.set("b", vec![1], None).await.unwrap();
        // Overwriting an existing cookie is fine.
        b.set("a", vec![2], None).await.unwrap();
        assert!(b.set("c", vec![1], None).await.is_err());
    }

    #[tokio::test]
    async fn test_ttl_hint_is_wire_max_age() {
        let clock = ManualClock::new(1_000);
        let b = jar(clock.clone());
        b.set("a", vec![1], Some(Duration::from_secs(1))).await.unwrap();
        clock.advance(Duration::from_millis(1_000));
        assert_eq!(b.header_pairs().len(), 1);
        clock.advance(Duration::from_millis(1));
        assert!(b.header_pairs().is_empty());

        // Still readable and enumerable until removed.
        assert_eq!(b.get("a").await.unwrap(), Some(vec![1]));
        assert_eq!(b.keys("").await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_tampered_signature_reads_missing() {
        let b = jar(ManualClock::new(0));
        b.set("a", b"xyz".to_vec(), None).await.unwrap();
        let forged = format!("{}.{}", hex::encode(b"evil"), "00".repeat(32));
        b.set_raw("a", &forged);
        assert_eq!(b.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shared_secret_verifies_across_jars() {
        let config = CookieConfig {
            secret: Some("s3cret".into()),
            ..Default::default()
        };
        let a = CookieBackend::new(config.clone(), Arc::new(ManualClock::new(0)));
        let b = CookieBackend::new(config, Arc::new(ManualClock::new(0)));
        a.set("k", b"v".to_vec(), None).await.unwrap();
        let pair = a.header_pairs().remove(0);
        let (_, value) = pair.split_once('=').unwrap();
        b.set_raw("k", value);
        assert_eq!(b.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
