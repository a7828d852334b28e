//! Per-key mutual exclusion.
//!
//! A fixed table of async mutexes; a key's stripe is `xxh3(key) % stripes`.
//! Two keys may share a stripe, which only serializes them. One key never
//! maps to two stripes. tokio's mutex is fair, so waiters on a stripe are
//! served in arrival order.

use tokio::sync::{Mutex, MutexGuard};
use xxhash_rust::xxh3::xxh3_64;

/// Default stripe count.
pub const DEFAULT_STRIPES: usize = 64;

/// Striped table of async mutexes keyed by storage key.
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    /// Creates a table with `stripes` mutexes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe index for `key`.
    pub fn stripe_for(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) % self.stripes.len() as u64) as usize
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(key)].lock().await
    }

    /// Exclusive access to `key` if its stripe is free right now.
    pub fn try_lock(&self, key: &str) -> Option<MutexGuard<'_, ()>> {
        self.stripes[self.stripe_for(key)].try_lock().ok()
    }

    /// Number of stripes.
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; a table has at least one stripe.
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
