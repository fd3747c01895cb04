//! Bulk compaction for administrative one-shot runs.
//!
//! Bypasses the worker queue entirely: candidates come straight from the
//! store and are merged in order, with cooperative cancellation between
//! items and per-item failure isolation.

use std::{collections::HashMap, time::Instant};

use tokio_util::sync::CancellationToken;

use super::error::CompactionError;
use crate::{
    id::AccountId,
    metrics::CompactionMetrics,
    observability::{log_error, log_info, log_warn},
    option::DEFAULT_SHARD_THRESHOLD,
    store::{CompactionStats, CompactionTarget, ShardStore},
};

/// How often the bulk loop reports progress, in processed candidates.
const PROGRESS_LOG_EVERY: usize = 100;

/// Parameters for one bulk compaction run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchRequest {
    /// Maximum number of candidates to process, in store order; 0 takes all.
    pub limit: usize,
    /// Report candidates without merging anything.
    pub dry_run: bool,
    /// Use the fast merge variant that skips large shards.
    pub fast: bool,
}

impl BatchRequest {
    /// Request merging up to `limit` candidates (0 takes all).
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            dry_run: false,
            fast: false,
        }
    }

    /// Report candidates without merging anything.
    pub fn dry_run(self) -> Self {
        Self {
            dry_run: true,
            ..self
        }
    }

    /// Use the fast merge variant that skips large shards.
    pub fn fast(self) -> Self {
        Self { fast: true, ..self }
    }
}

/// Result of one bulk compaction run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Every candidate the store reported, after the limit cut.
    pub targets: Vec<CompactionTarget>,
    /// Merge outcomes keyed by account, for the candidates that completed.
    pub completed: HashMap<AccountId, CompactionStats>,
}

/// Merge every candidate the store reports, sequentially.
///
/// Cancellation is checked before each candidate and is not an error: the
/// outcome then carries the full target list plus whatever completed before
/// the signal. A single account's failure is logged and skipped, never
/// aborting the rest of the run.
pub async fn compact_all_accounts<S>(
    store: &S,
    metrics: &CompactionMetrics,
    request: BatchRequest,
    cancel: &CancellationToken,
) -> Result<BatchOutcome, CompactionError>
where
    S: ShardStore,
{
    log_warn!(
        event = "batch_compaction_started",
        limit = request.limit,
        dry_run = request.dry_run,
        fast = request.fast,
    );
    let run_start = Instant::now();

    let mut targets = store
        .compaction_targets(DEFAULT_SHARD_THRESHOLD)
        .await
        .map_err(CompactionError::CandidateListing)?;
    if request.limit > 0 && targets.len() > request.limit {
        targets.truncate(request.limit);
    }

    if request.dry_run {
        return Ok(BatchOutcome {
            targets,
            completed: HashMap::new(),
        });
    }

    let mut completed = HashMap::with_capacity(targets.len());
    for (i, target) in targets.iter().enumerate() {
        if cancel.is_cancelled() {
            log_warn!(
                event = "batch_compaction_canceled",
                processed = i,
                targets = targets.len(),
            );
            break;
        }

        let merge_start = Instant::now();
        match store.compact_account_shards(target.account, request.fast).await {
            Ok(stats) => {
                metrics.observe_duration(merge_start.elapsed());
                metrics.record_completed();
                completed.insert(target.account, stats);
            }
            Err(err) => {
                metrics.record_compaction_failure();
                log_error!(
                    event = "batch_compaction_item_failed",
                    account = %target.account,
                    error = %err,
                );
                continue;
            }
        }

        if i % PROGRESS_LOG_EVERY == 0 {
            log_info!(
                event = "batch_compaction_progress",
                compacted = i + 1,
                elapsed_ms = run_start.elapsed().as_millis() as u64,
            );
        }
    }

    log_info!(
        event = "batch_compaction_finished",
        targets = targets.len(),
        completed = completed.len(),
        elapsed_ms = run_start.elapsed().as_millis() as u64,
    );
    Ok(BatchOutcome { targets, completed })
}
