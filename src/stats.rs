//! Thread-safe counters, a rolling latency histogram, and percentile queries.
//!
//! Grounded in `arceon-performance::concurrent_processor::{ThreadPoolStats,
//! SchedulerStats}` for the counter shape, reworked around per-field atomics
//! and a fixed-width histogram as §4.B requires.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

const HISTOGRAM_BUCKETS: usize = 100;

/// Configuration for a [`Stats`] collector.
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Percentile indices (0..=100) the caller is interested in querying
    /// together via [`Stats::all_latency_percentiles`].
    pub percentiles: Vec<u8>,
    /// Upper bound of the latency histogram; samples above this are dropped.
    pub max_latency_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            percentiles: vec![50, 75, 90, 95, 99],
            max_latency_ms: 10_000,
        }
    }
}

/// Thread-safe counters and latency histogram for a pool.
///
/// All mutators are callable concurrently without external locking: each
/// field is its own atomic, so a [`snapshot`](Stats::snapshot) is consistent
/// per-field but not necessarily atomic across fields taken together.
pub struct Stats {
    config: StatsConfig,
    start_time_ms: i64,

    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,

    total_wait_ms: AtomicU64,
    total_exec_ms: AtomicU64,
    total_queue_ms: AtomicU64,
    /// Preserves the original design's `add(size)` accumulation rather than
    /// `max(size)` — see DESIGN.md's Open Questions section. Despite the
    /// name this is a running sum, not a maximum.
    max_queue_size_seen: AtomicU64,

    histogram: Vec<AtomicU64>,
}

impl Stats {
    pub fn new(config: StatsConfig) -> Self {
        let histogram = (0..HISTOGRAM_BUCKETS).map(|_| AtomicU64::new(0)).collect();
        Self {
            config,
            start_time_ms: Utc::now().timestamp_millis(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
            total_exec_ms: AtomicU64::new(0),
            total_queue_ms: AtomicU64::new(0),
            max_queue_size_seen: AtomicU64::new(0),
            histogram,
        }
    }

    pub fn record_submission(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a wait-time sample into the shared latency histogram.
    ///
    /// Per the original design, wait and execution samples feed the *same*
    /// histogram (see DESIGN.md's Open Questions) — percentiles therefore
    /// describe a blended wait+exec latency distribution, not either one in
    /// isolation. `total_wait_ms` is tracked separately for the unblended
    /// `average_wait_ms` derived metric.
    pub fn record_wait_time(&self, ms: u64) {
        self.total_wait_ms.fetch_add(ms, Ordering::Relaxed);
        self.record_latency_sample(ms);
    }

    pub fn record_execution_time(&self, ms: u64) {
        self.total_exec_ms.fetch_add(ms, Ordering::Relaxed);
        self.record_latency_sample(ms);
    }

    pub fn record_queue_time(&self, ms: u64) {
        self.total_queue_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn record_queue_size(&self, n: u64) {
        self.max_queue_size_seen.fetch_add(n, Ordering::Relaxed);
    }

    fn record_latency_sample(&self, latency_ms: u64) {
        if latency_ms > self.config.max_latency_ms {
            return; // outside [0, max_latency_ms], dropped
        }
        let bucket = ((latency_ms * 100) / self.config.max_latency_ms.max(1)).min(99) as usize;
        self.histogram[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_latency_percentile(&self, p: f64) -> f64 {
        percentile_from_buckets(&self.read_histogram(), self.config.max_latency_ms, p)
    }

    pub fn get_all_latency_percentiles(&self) -> BTreeMap<u8, f64> {
        let buckets = self.read_histogram();
        self.config
            .percentiles
            .iter()
            .map(|&p| (p, percentile_from_buckets(&buckets, self.config.max_latency_ms, p as f64)))
            .collect()
    }

    fn read_histogram(&self) -> Vec<u64> {
        self.histogram.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    /// Returns a point-in-time, non-atomic copy of the current counters and
    /// histogram. Consistent per-field; not globally atomic across fields.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
            total_exec_ms: self.total_exec_ms.load(Ordering::Relaxed),
            total_queue_ms: self.total_queue_ms.load(Ordering::Relaxed),
            max_queue_size_seen: self.max_queue_size_seen.load(Ordering::Relaxed),
            start_time_ms: self.start_time_ms,
            max_latency_ms: self.config.max_latency_ms,
            percentiles: self.config.percentiles.clone(),
            histogram: self.read_histogram(),
        }
    }
}

fn percentile_from_buckets(buckets: &[u64], max_latency_ms: u64, p: f64) -> f64 {
    if p >= 100.0 {
        return max_latency_ms as f64;
    }
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let threshold = total as f64 * p / 100.0;
    let mut cumulative = 0u64;
    for (i, count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative as f64 >= threshold {
            return i as f64 * (max_latency_ms as f64) / (HISTOGRAM_BUCKETS as f64);
        }
    }
    max_latency_ms as f64
}

/// An immutable, point-in-time copy of a [`Stats`] collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub total_wait_ms: u64,
    pub total_exec_ms: u64,
    pub total_queue_ms: u64,
    pub max_queue_size_seen: u64,
    pub start_time_ms: i64,
    pub max_latency_ms: u64,
    pub percentiles: Vec<u8>,
    histogram: Vec<u64>,
}

impl StatsSnapshot {
    pub fn percentile(&self, p: f64) -> f64 {
        percentile_from_buckets(&self.histogram, self.max_latency_ms, p)
    }

    pub fn all_percentiles(&self) -> BTreeMap<u8, f64> {
        self.percentiles
            .iter()
            .map(|&p| (p, self.percentile(p as f64)))
            .collect()
    }

    pub fn average_wait_ms(&self) -> f64 {
        let denom = self.completed + self.failed;
        if denom == 0 {
            0.0
        } else {
            self.total_wait_ms as f64 / denom as f64
        }
    }

    pub fn average_execution_ms(&self) -> f64 {
        let denom = self.completed + self.failed;
        if denom == 0 {
            0.0
        } else {
            self.total_exec_ms as f64 / denom as f64
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        ((Utc::now().timestamp_millis() - self.start_time_ms).max(0) as f64) / 1000.0
    }

    pub fn task_success_rate(&self) -> f64 {
        let denom = self.completed + self.failed;
        if denom == 0 {
            1.0
        } else {
            self.completed as f64 / denom as f64
        }
    }

    pub fn task_rejection_rate(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.rejected as f64 / self.submitted as f64
        }
    }

    pub fn task_throughput(&self) -> f64 {
        let uptime = self.uptime_seconds();
        if uptime <= 0.0 {
            0.0
        } else {
            self.completed as f64 / uptime
        }
    }
}
