//! Observation counters for compaction scheduling.
//!
//! The crate records observations here and nowhere else; embedders read a
//! [`CompactionMetricsSnapshot`] and feed whatever sink they run.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Counters shared by the worker loop and bulk runs.
#[derive(Debug)]
pub struct CompactionMetrics {
    jobs_completed: AtomicU64,
    compaction_failures: AtomicU64,
    lookup_failures: AtomicU64,
    idle_waits: AtomicU64,
    duration_count: AtomicU64,
    duration_total_us: AtomicU64,
    duration_max_us: AtomicU64,
    duration_min_us: AtomicU64,
}

impl CompactionMetrics {
    /// Create a zeroed counter set.
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            compaction_failures: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            idle_waits: AtomicU64::new(0),
            duration_count: AtomicU64::new(0),
            duration_total_us: AtomicU64::new(0),
            duration_max_us: AtomicU64::new(0),
            duration_min_us: AtomicU64::new(u64::MAX),
        }
    }

    /// Record the wall-clock duration of one successful shard merge.
    pub fn observe_duration(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.duration_count.fetch_add(1, Ordering::Relaxed);
        self.duration_total_us.fetch_add(us, Ordering::Relaxed);
        self.duration_max_us.fetch_max(us, Ordering::Relaxed);
        self.duration_min_us.fetch_min(us, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction_failure(&self) {
        self.compaction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_wait(&self) {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> CompactionMetricsSnapshot {
        let count = self.duration_count.load(Ordering::Relaxed);
        CompactionMetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            compaction_failures: self.compaction_failures.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            idle_waits: self.idle_waits.load(Ordering::Relaxed),
            duration: DurationSummary {
                count,
                total_us: self.duration_total_us.load(Ordering::Relaxed),
                max_us: self.duration_max_us.load(Ordering::Relaxed),
                min_us: if count == 0 {
                    0
                } else {
                    self.duration_min_us.load(Ordering::Relaxed)
                },
            },
        }
    }
}

impl Default for CompactionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of compaction scheduling counters.
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct CompactionMetricsSnapshot {
    /// Shard merges completed across the worker loop and bulk runs.
    pub jobs_completed: u64,
    /// Shard merges that failed.
    pub compaction_failures: u64,
    /// Identity lookups that failed before a merge could start.
    pub lookup_failures: u64,
    /// Times the worker loop found its queue empty and backed off.
    pub idle_waits: u64,
    /// Duration summary over completed merges.
    pub duration: DurationSummary,
}

/// Simple duration summary over completed merges.
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct DurationSummary {
    /// Number of merges recorded.
    pub count: u64,
    /// Total merge time across all records (microseconds).
    pub total_us: u64,
    /// Longest single merge (microseconds).
    pub max_us: u64,
    /// Shortest single merge (microseconds).
    pub min_us: u64,
}

impl DurationSummary {
    /// Mean merge time in microseconds, when anything was recorded.
    pub fn mean_us(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.total_us as f64 / self.count as f64)
    }

    /// Total merge time in seconds.
    pub fn total_seconds(&self) -> f64 {
        self.total_us as f64 / 1_000_000.0
    }
}
