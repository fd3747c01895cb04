//! Worker tuning knobs.

use std::time::Duration;

/// Shard-count floor applied when a caller passes a threshold of 0: accounts
/// backed by at least this many shards qualify as compaction candidates.
pub const DEFAULT_SHARD_THRESHOLD: usize = 50;

/// Backoff configuration for the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactorOptions {
    pub(crate) empty_queue_backoff: Duration,
    pub(crate) error_backoff: Duration,
}

impl Default for CompactorOptions {
    fn default() -> Self {
        Self {
            empty_queue_backoff: Duration::from_secs(5),
            error_backoff: Duration::from_millis(100),
        }
    }
}

impl CompactorOptions {
    /// Options with the default backoffs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep applied when the queue has no pending accounts.
    pub fn empty_queue_backoff(self, backoff: Duration) -> Self {
        Self {
            empty_queue_backoff: backoff,
            ..self
        }
    }

    /// Sleep applied after a failed attempt, bounding log volume and retry
    /// pressure when a failure persists.
    pub fn error_backoff(self, backoff: Duration) -> Self {
        Self {
            error_backoff: backoff,
            ..self
        }
    }
}
