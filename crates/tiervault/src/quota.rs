//! Storage quota accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Quota snapshot: used bytes against the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageQuota {
    /// Bytes held by user entries.
    pub used: u64,
    /// Bytes still allowed.
    pub available: u64,
    /// Configured ceiling.
    pub total: u64,
    /// `used / total * 100`.
    pub percentage: f64,
}

/// Where a quota sits relative to its watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaStatus {
    /// Below the cleanup watermark.
    Ok,
    /// Above the watermark; a cleanup sweep should run before writing.
    NearFull,
    /// At or beyond the ceiling.
    Full,
}

impl StorageQuota {
    /// Builds a snapshot from measured usage.
    pub fn new(used: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            used,
            available: total.saturating_sub(used),
            total,
            percentage,
        }
    }

    /// Classifies usage against `watermark` (a fraction, e.g. 0.9).
    pub fn status(&self, watermark: f64) -> QuotaStatus {
        if self.used >= self.total {
            QuotaStatus::Full
        } else if self.percentage > watermark * 100.0 {
            QuotaStatus::NearFull
        } else {
            QuotaStatus::Ok
        }
    }

    /// True if `required` more bytes fit under the ceiling.
    pub fn can_allocate(&self, required: u64) -> bool {
        self.used.saturating_add(required) <= self.total
    }

    /// Errors with `QuotaExceeded` when `required` more bytes do not fit.
    pub fn check_allocation(&self, required: u64) -> StorageResult<()> {
        if self.can_allocate(required) {
            Ok(())
        } else {
            Err(StorageError::QuotaExceeded {
                required,
                available: self.available,
            })
        }
    }
}

/// Running total of user bytes across all stores.
///
/// Updated as the engine writes and deletes, so a write does not need to rescan the
/// stores. Changes made behind the engine's back (a session ending, a cleared memory
/// map) are only picked up by [`UsageLedger::reset`] after a full recount.
#[derive(Debug, Default)]
pub struct UsageLedger {
    used: AtomicU64,
}

impl UsageLedger {
    /// A ledger starting at `used` bytes.
    pub fn new(used: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
        }
    }

    /// Bytes currently accounted for.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Snapshot against `total`.
    pub fn quota(&self, total: u64) -> StorageQuota {
        StorageQuota::new(self.used(), total)
    }

    /// Account for bytes written.
    pub fn record_allocation(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Account for bytes removed. Saturates at zero.
    pub fn record_free(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Replace the total with a fresh recount.
    pub fn reset(&self, used: u64) {
        self.used.store(used, Ordering::Release);
    }
}
