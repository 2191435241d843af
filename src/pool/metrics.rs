// # Pool Metrics
//
// Per-pool counters and a fixed-bucket wait-time histogram. Everything is
// atomic; snapshots are taken lock-free by the observability accessors.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Upper bounds of the wait histogram buckets, in milliseconds. The last
/// bucket is unbounded.
pub const WAIT_BUCKETS_MS: [u64; 8] = [1, 5, 10, 50, 100, 500, 1000, 5000];

/// Live metrics for one pool.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    active: AtomicUsize,
    idle: AtomicUsize,
    total_borrows: AtomicU64,
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    borrow_timeouts: AtomicU64,
    validation_failures: AtomicU64,
    wait_buckets: [AtomicU64; 9],
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_borrow(&self, waited: Duration) {
        self.total_borrows.fetch_add(1, Ordering::Relaxed);
        let ms = waited.as_millis() as u64;
        let bucket = WAIT_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(WAIT_BUCKETS_MS.len());
        self.wait_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.borrow_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroyed(&self) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active(&self, count: usize) {
        self.active.store(count, Ordering::Relaxed);
    }

    pub fn set_idle(&self, count: usize) {
        self.idle.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let mut wait_histogram = [0u64; 9];
        for (slot, bucket) in wait_histogram.iter_mut().zip(self.wait_buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }
        PoolMetricsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            total_borrows: self.total_borrows.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            borrow_timeouts: self.borrow_timeouts.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            wait_histogram,
        }
    }
}

/// Point-in-time view of a pool's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    pub active: usize,
    pub idle: usize,
    pub total_borrows: u64,
    pub total_created: u64,
    pub total_destroyed: u64,
    pub borrow_timeouts: u64,
    pub validation_failures: u64,
    /// Borrow wait counts per bucket of `WAIT_BUCKETS_MS`, plus overflow.
    pub wait_histogram: [u64; 9],
}

impl PoolMetricsSnapshot {
    /// Live physical objects owned by the pool.
    pub fn live(&self) -> usize {
        self.active + self.idle
    }
}
