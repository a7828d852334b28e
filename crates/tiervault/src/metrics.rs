//! Operation metrics for the storage engine.
//!
//! Counters, running-mean latencies and a bounded ring of recent slow operations.
//! The whole state serializes to JSON so the engine can persist it in its reserved
//! metrics slot and pick it up again at the next open.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Operation, StorageResult};

/// Slow operations kept in the ring.
pub const SLOW_OPERATION_CAPACITY: usize = 10;

/// The type of metric: counter or gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up or down.
    Gauge,
}

/// The value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A counter value.
    Counter(u64),
    /// A gauge value.
    Gauge(f64),
}

/// A single named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMetric {
    /// The metric name.
    pub name: String,
    /// Help text describing the metric.
    pub help: String,
    /// The kind of metric.
    pub kind: MetricKind,
    /// The metric value.
    pub value: MetricValue,
}

impl NamedMetric {
    fn counter(name: &str, help: &str, v: u64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Counter,
            value: MetricValue::Counter(v),
        }
    }

    fn gauge(name: &str, help: &str, v: f64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Gauge,
            value: MetricValue::Gauge(v),
        }
    }
}

/// One operation that took longer than the slow threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowOperation {
    /// Operation kind.
    pub op: Operation,
    /// Caller-facing key.
    pub key: String,
    /// Wall time.
    pub duration_ms: u64,
    /// Completion time, epoch milliseconds.
    pub timestamp: u64,
}

/// How an operation ended, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A read found a value.
    Hit,
    /// A read found nothing usable.
    Miss,
    /// A non-read operation succeeded.
    Done,
    /// The operation surfaced an error.
    Failed,
}

/// Engine-wide operation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageMetrics {
    /// Reads (`get`, `has`).
    pub reads: u64,
    /// Writes (`set`).
    pub writes: u64,
    /// Deletes (`remove`, `clear`).
    pub deletes: u64,
    /// Operations that surfaced an error.
    pub errors: u64,
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that returned nothing.
    pub misses: u64,
    /// Running mean read latency.
    pub avg_read_ms: f64,
    /// Running mean write latency.
    pub avg_write_ms: f64,
    /// Most recent slow operations, oldest first.
    pub slow_operations: VecDeque<SlowOperation>,
    /// Completion time of the last cleanup sweep.
    pub last_cleanup: Option<u64>,
    /// Writes that fell back to the degraded cipher encoding.
    pub degraded_encryptions: u64,
    /// Envelopes dropped for failing integrity checks.
    pub integrity_failures: u64,
    /// Envelopes dropped for being past their TTL.
    pub expirations: u64,
}

impl StorageMetrics {
    /// `errors / (reads + writes + deletes)`, or 0 before any operation.
    pub fn error_rate(&self) -> f64 {
        let total = self.reads + self.writes + self.deletes;
        if total == 0 {
            0.0
        } else {
            self.errors as f64 / total as f64
        }
    }

    /// Hits over all reads.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Flatten into named metrics, prefixed with `prefix_`.
    pub fn collect(&self, prefix: &str) -> Vec<NamedMetric> {
        let n = |s: &str| format!("{}_{}", prefix, s);
        vec![
            NamedMetric::counter(&n("reads_total"), "Read operations", self.reads),
            NamedMetric::counter(&n("writes_total"), "Write operations", self.writes),
            NamedMetric::counter(&n("deletes_total"), "Delete operations", self.deletes),
            NamedMetric::counter(&n("errors_total"), "Operations that failed", self.errors),
            NamedMetric::counter(&n("hits_total"), "Reads that found a value", self.hits),
            NamedMetric::counter(&n("misses_total"), "Reads that found nothing", self.misses),
            NamedMetric::counter(
                &n("degraded_encryptions_total"),
                "Writes stored with the non-confidential fallback encoding",
                self.degraded_encryptions,
            ),
            NamedMetric::counter(
                &n("integrity_failures_total"),
                "Entries dropped after a failed checksum or decode",
                self.integrity_failures,
            ),
            NamedMetric::counter(
                &n("expirations_total"),
                "Entries dropped after TTL expiry",
                self.expirations,
            ),
            NamedMetric::gauge(&n("avg_read_ms"), "Mean read latency", self.avg_read_ms),
            NamedMetric::gauge(&n("avg_write_ms"), "Mean write latency", self.avg_write_ms),
            NamedMetric::gauge(&n("error_rate"), "Errors per operation", self.error_rate()),
        ]
    }
}

fn running_mean(avg: f64, count: u64, sample_ms: f64) -> f64 {
    if count == 0 {
        sample_ms
    } else {
        avg + (sample_ms - avg) / count as f64
    }
}

struct CollectorState {
    metrics: StorageMetrics,
    ops_since_persist: u64,
}

/// Thread-safe collector owned by one engine instance.
pub struct MetricsCollector {
    state: Mutex<CollectorState>,
    slow_threshold: Duration,
    persist_every: u64,
}

impl MetricsCollector {
    /// Create a collector with empty counters.
    pub fn new(slow_threshold: Duration, persist_every: u64) -> Self {
        Self::restore(StorageMetrics::default(), slow_threshold, persist_every)
    }

    /// Resume from previously persisted metrics.
    pub fn restore(metrics: StorageMetrics, slow_threshold: Duration, persist_every: u64) -> Self {
        Self {
            state: Mutex::new(CollectorState {
                metrics,
                ops_since_persist: 0,
            }),
            slow_threshold,
            persist_every: persist_every.max(1),
        }
    }

    /// Record one finished operation. Returns true when a persist is due.
    pub fn record(
        &self,
        op: Operation,
        key: &str,
        elapsed: Duration,
        outcome: Outcome,
        now_ms: u64,
    ) -> bool {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();
        let m = &mut state.metrics;
        match op {
            Operation::Get | Operation::Has => {
                m.reads += 1;
                m.avg_read_ms = running_mean(m.avg_read_ms, m.reads, ms);
            }
            Operation::Set => {
                m.writes += 1;
                m.avg_write_ms = running_mean(m.avg_write_ms, m.writes, ms);
            }
            Operation::Remove | Operation::Clear => m.deletes += 1,
            Operation::Open | Operation::Cleanup | Operation::Quota | Operation::Keys => {}
        }
        match outcome {
            Outcome::Hit => m.hits += 1,
            Outcome::Miss => m.misses += 1,
            Outcome::Failed => m.errors += 1,
            Outcome::Done => {}
        }
        if elapsed >= self.slow_threshold {
            if m.slow_operations.len() == SLOW_OPERATION_CAPACITY {
                m.slow_operations.pop_front();
            }
            m.slow_operations.push_back(SlowOperation {
                op,
                key: key.to_string(),
                duration_ms: elapsed.as_millis() as u64,
                timestamp: now_ms,
            });
        }

        state.ops_since_persist += 1;
        if state.ops_since_persist >= self.persist_every {
            state.ops_since_persist = 0;
            true
        } else {
            false
        }
    }

    /// Count a degraded-encryption write.
    pub fn record_degraded(&self) {
        self.state.lock().metrics.degraded_encryptions += 1;
    }

    /// Count an entry dropped for integrity failure.
    pub fn record_integrity_failure(&self) {
        self.state.lock().metrics.integrity_failures += 1;
    }

    /// Count entries dropped for TTL expiry.
    pub fn record_expirations(&self, count: u64) {
        self.state.lock().metrics.expirations += count;
    }

    /// Stamp a completed cleanup sweep.
    pub fn record_cleanup(&self, now_ms: u64) {
        self.state.lock().metrics.last_cleanup = Some(now_ms);
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> StorageMetrics {
        self.state.lock().metrics.clone()
    }

    /// JSON bytes for the metrics slot.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state.lock().metrics)?)
    }

    /// Parse JSON bytes from the metrics slot.
    pub fn parse(bytes: &[u8]) -> StorageResult<StorageMetrics> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("slow_threshold", &self.slow_threshold)
            .field("persist_every", &self.persist_every)
            .finish()
    }
}
