//! Background worker that drains the compaction queue one account at a time.

use std::{sync::Arc, time::Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    error::CompactionError,
    queue::CompactionQueue,
    status::{CompactionStage, CompactionState, StatusCell},
};
use crate::{
    id::AccountId,
    metrics::CompactionMetrics,
    observability::{log_debug, log_error, log_info, log_warn},
    option::{CompactorOptions, DEFAULT_SHARD_THRESHOLD},
    store::{Account, AccountDirectory, ShardStore},
};

/// Compaction scheduler: a dedup queue, status tracking, and one worker loop.
///
/// Enqueue operations only touch the queue's critical section and may be
/// called from any task; the loop itself runs on a single task, either
/// directly via [`run`](Compactor::run) or in the background via
/// [`spawn`](Compactor::spawn).
pub struct Compactor<S, D> {
    queue: CompactionQueue,
    status: StatusCell,
    store: Arc<S>,
    directory: Arc<D>,
    metrics: Arc<CompactionMetrics>,
    options: CompactorOptions,
    shutdown: CancellationToken,
}

impl<S, D> Compactor<S, D>
where
    S: ShardStore,
    D: AccountDirectory,
{
    /// Create a compactor over the given collaborators.
    ///
    /// The metrics sink is injected so bulk runs and any embedder reporting
    /// can share one counter set with the worker.
    pub fn new(
        store: Arc<S>,
        directory: Arc<D>,
        metrics: Arc<CompactionMetrics>,
        options: CompactorOptions,
    ) -> Self {
        Self {
            queue: CompactionQueue::new(),
            status: StatusCell::default(),
            store,
            directory,
            metrics,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Observation counters, shared with bulk runs when desired.
    pub fn metrics(&self) -> &Arc<CompactionMetrics> {
        &self.metrics
    }

    /// Copy of the most recently recorded attempt status.
    pub async fn state(&self) -> CompactionState {
        self.status.snapshot().await
    }

    /// Number of accounts currently queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether `account` is currently queued.
    pub fn is_pending(&self, account: AccountId) -> bool {
        self.queue.contains(account)
    }

    /// Drop `account` from the queue if it has not been popped yet.
    pub fn cancel_pending(&self, account: AccountId) {
        self.queue.remove(account);
    }

    /// Queue one account for compaction. Never blocks on processing; a
    /// second enqueue of a pending account is absorbed by dedup.
    pub fn enqueue(&self, account: &Account, fast: bool) {
        log_info!(
            event = "compaction_enqueued",
            account = %account.id,
            handle = %account.handle,
            fast,
        );
        self.queue.push_back(account.id, fast);
    }

    /// Queue one account ahead of already-pending work.
    ///
    /// No-op when the account is already queued; the existing entry keeps
    /// its position and flag.
    pub fn enqueue_urgent(&self, account: &Account, fast: bool) {
        log_info!(
            event = "compaction_enqueued_urgent",
            account = %account.id,
            handle = %account.handle,
            fast,
        );
        self.queue.push_front(account.id, fast);
    }

    /// Queue every account the store reports at or above `shard_threshold`.
    ///
    /// A `shard_threshold` of 0 falls back to [`DEFAULT_SHARD_THRESHOLD`].
    /// `limit` caps how many candidates are taken, in store order; 0 takes
    /// them all. Accounts already queued are absorbed by dedup.
    pub async fn enqueue_all(
        &self,
        limit: usize,
        shard_threshold: usize,
        fast: bool,
    ) -> Result<(), CompactionError> {
        let shard_threshold = if shard_threshold == 0 {
            DEFAULT_SHARD_THRESHOLD
        } else {
            shard_threshold
        };
        log_info!(event = "enqueue_all_started", limit, shard_threshold, fast);

        let mut targets = self
            .store
            .compaction_targets(shard_threshold)
            .await
            .map_err(CompactionError::CandidateListing)?;
        if limit > 0 && targets.len() > limit {
            targets.truncate(limit);
        }
        for target in &targets {
            self.queue.push_back(target.account, fast);
        }

        log_info!(
            event = "enqueue_all_finished",
            candidates = targets.len(),
            queued = self.queue.len(),
        );
        Ok(())
    }

    /// Pop one queued account and drive it through resolution and merge.
    ///
    /// The three failure stages are terminal: a failed item is not
    /// re-enqueued, that policy belongs to the caller. Returns the final
    /// status snapshot on success.
    pub async fn compact_next(&self) -> Result<CompactionState, CompactionError> {
        let item = self.queue.pop().ok_or(CompactionError::QueueEmpty)?;

        self.status
            .set(item.account, None, CompactionStage::ResolvingIdentity, None)
            .await;
        let account = match self.directory.lookup_account(item.account).await {
            Ok(account) => account,
            Err(source) => {
                self.status
                    .set(item.account, None, CompactionStage::IdentityLookupFailed, None)
                    .await;
                self.metrics.record_lookup_failure();
                return Err(CompactionError::IdentityLookup {
                    account: item.account,
                    source,
                });
            }
        };

        self.status
            .set(
                item.account,
                Some(account.handle.clone()),
                CompactionStage::Compacting,
                None,
            )
            .await;
        let merge_start = Instant::now();
        let stats = match self.store.compact_account_shards(item.account, item.fast).await {
            Ok(stats) => stats,
            Err(source) => {
                self.status
                    .set(
                        item.account,
                        Some(account.handle),
                        CompactionStage::CompactionFailed,
                        None,
                    )
                    .await;
                self.metrics.record_compaction_failure();
                return Err(CompactionError::ShardCompaction {
                    account: item.account,
                    source,
                });
            }
        };
        self.metrics.observe_duration(merge_start.elapsed());
        self.metrics.record_completed();

        self.status
            .set(
                item.account,
                Some(account.handle),
                CompactionStage::Done,
                Some(stats),
            )
            .await;
        Ok(self.status.snapshot().await)
    }

    /// Drain the queue until [`shutdown`](Compactor::shutdown) fires.
    ///
    /// Per-item failures never end the loop: they are logged with the full
    /// status context and answered with the error backoff. An empty queue
    /// is answered with the longer idle backoff. The shutdown signal is
    /// observed at the top of each iteration, so exit lags it by at most
    /// one backoff sleep.
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                log_warn!(event = "compactor_exiting");
                return;
            }

            let attempt_start = Instant::now();
            match self.compact_next().await {
                Ok(state) => {
                    log_info!(
                        event = "compaction_done",
                        account = %state.account,
                        handle = state.handle_or_unknown(),
                        stage = %state.stage,
                        stats = ?state.stats,
                        elapsed_ms = attempt_start.elapsed().as_millis() as u64,
                    );
                }
                Err(CompactionError::QueueEmpty) => {
                    log_debug!(
                        event = "compaction_queue_empty",
                        backoff_ms = self.options.empty_queue_backoff.as_millis() as u64,
                    );
                    self.metrics.record_idle_wait();
                    tokio::time::sleep(self.options.empty_queue_backoff).await;
                }
                Err(err) => {
                    let state = self.status.snapshot().await;
                    log_error!(
                        event = "compaction_failed",
                        error = %err,
                        account = %state.account,
                        handle = state.handle_or_unknown(),
                        stage = %state.stage,
                        stats = ?state.stats,
                        elapsed_ms = attempt_start.elapsed().as_millis() as u64,
                    );
                    tokio::time::sleep(self.options.error_backoff).await;
                }
            }
        }
    }

    /// Signal the worker loop to exit at its next check point. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run the worker loop on a background task.
    pub fn spawn(self: &Arc<Self>) -> CompactorHandle {
        let compactor = Arc::clone(self);
        let join = tokio::spawn(async move { compactor.run().await });
        CompactorHandle {
            shutdown: self.shutdown.clone(),
            join: Some(join),
        }
    }
}

/// Handle to a spawned worker loop.
///
/// Dropping the handle signals the loop to exit, so a spawned worker cannot
/// outlive the component that started it.
pub struct CompactorHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl CompactorHandle {
    /// Signal the loop to exit at its next check point. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the loop to observe the signal and return.
    pub async fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for CompactorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        store::StoreError,
        test_util::{acct, target, MemoryShardStore, StaticDirectory},
    };

    fn compactor_over(
        store: MemoryShardStore,
        directory: StaticDirectory,
    ) -> Compactor<MemoryShardStore, StaticDirectory> {
        let options = CompactorOptions::new()
            .empty_queue_backoff(Duration::from_millis(5))
            .error_backoff(Duration::from_millis(1));
        Compactor::new(
            Arc::new(store),
            Arc::new(directory),
            Arc::new(CompactionMetrics::new()),
            options,
        )
    }

    fn account(raw: u64, handle: &str) -> Account {
        Account {
            id: acct(raw),
            handle: handle.to_string(),
        }
    }

    #[tokio::test]
    async fn compact_next_reports_an_empty_queue() {
        let compactor = compactor_over(
            MemoryShardStore::with_targets(vec![]),
            StaticDirectory::with_accounts([]),
        );
        let err = compactor
            .compact_next()
            .await
            .expect_err("an empty queue should not produce a state");
        assert!(matches!(err, CompactionError::QueueEmpty));
    }

    #[tokio::test]
    async fn compact_next_drives_an_item_to_done() {
        let store = Arc::new(MemoryShardStore::with_targets(vec![]));
        let directory = StaticDirectory::with_accounts([(acct(1), "alice.example")]);
        let compactor = Compactor::new(
            Arc::clone(&store),
            Arc::new(directory),
            Arc::new(CompactionMetrics::new()),
            CompactorOptions::default(),
        );

        compactor.enqueue(&account(1, "alice.example"), true);
        let state = compactor.compact_next().await.expect("merge should succeed");

        assert_eq!(state.account, acct(1));
        assert_eq!(state.handle.as_deref(), Some("alice.example"));
        assert_eq!(state.stage, CompactionStage::Done);
        assert!(state.stats.is_some());
        assert_eq!(store.compaction_calls(), vec![(acct(1), true)]);

        let snapshot = compactor.metrics().snapshot();
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.duration.count, 1);
    }

    #[tokio::test]
    async fn lookup_failure_is_terminal_for_the_item() {
        let store = Arc::new(MemoryShardStore::with_targets(vec![]));
        let compactor = Compactor::new(
            Arc::clone(&store),
            Arc::new(StaticDirectory::with_accounts([])),
            Arc::new(CompactionMetrics::new()),
            CompactorOptions::default(),
        );

        compactor.enqueue(&account(5, "ghost.example"), false);
        let err = compactor
            .compact_next()
            .await
            .expect_err("an unresolvable account should fail");
        assert!(matches!(
            err,
            CompactionError::IdentityLookup { account, .. } if account == acct(5)
        ));

        let state = compactor.state().await;
        assert_eq!(state.stage, CompactionStage::IdentityLookupFailed);
        assert_eq!(state.account, acct(5));
        assert_eq!(compactor.pending(), 0, "failed items are not re-enqueued");
        assert!(store.compaction_calls().is_empty());
        assert_eq!(compactor.metrics().snapshot().lookup_failures, 1);
    }

    #[tokio::test]
    async fn merge_failure_sets_the_failed_stage() {
        let store = MemoryShardStore::with_targets(vec![]).fail_for(acct(2));
        let directory = StaticDirectory::with_accounts([(acct(2), "bob.example")]);
        let compactor = compactor_over(store, directory);

        compactor.enqueue(&account(2, "bob.example"), false);
        let err = compactor
            .compact_next()
            .await
            .expect_err("a failing merge should surface");
        assert!(matches!(
            err,
            CompactionError::ShardCompaction {
                account,
                source: StoreError::Backend(_),
            } if account == acct(2)
        ));

        let state = compactor.state().await;
        assert_eq!(state.stage, CompactionStage::CompactionFailed);
        assert_eq!(state.handle.as_deref(), Some("bob.example"));
        assert!(state.stats.is_none());

        let snapshot = compactor.metrics().snapshot();
        assert_eq!(snapshot.compaction_failures, 1);
        assert_eq!(snapshot.duration.count, 0);
    }

    #[tokio::test]
    async fn enqueue_deduplicates_pending_accounts() {
        let compactor = compactor_over(
            MemoryShardStore::with_targets(vec![]),
            StaticDirectory::with_accounts([]),
        );

        compactor.enqueue(&account(1, "alice.example"), false);
        compactor.enqueue(&account(1, "alice.example"), true);
        assert_eq!(compactor.pending(), 1);
        assert!(compactor.is_pending(acct(1)));
    }

    #[tokio::test]
    async fn enqueue_urgent_overtakes_queued_work() {
        let store = Arc::new(MemoryShardStore::with_targets(vec![]));
        let directory = StaticDirectory::with_accounts([
            (acct(1), "alice.example"),
            (acct(2), "bob.example"),
        ]);
        let compactor = Compactor::new(
            Arc::clone(&store),
            Arc::new(directory),
            Arc::new(CompactionMetrics::new()),
            CompactorOptions::default(),
        );

        compactor.enqueue(&account(1, "alice.example"), false);
        compactor.enqueue_urgent(&account(2, "bob.example"), true);

        let state = compactor.compact_next().await.expect("merge should succeed");
        assert_eq!(state.account, acct(2));
        assert_eq!(store.compaction_calls(), vec![(acct(2), true)]);
    }

    #[tokio::test]
    async fn cancel_pending_drops_a_queued_account() {
        let store = Arc::new(MemoryShardStore::with_targets(vec![]));
        let directory = StaticDirectory::with_accounts([
            (acct(1), "alice.example"),
            (acct(2), "bob.example"),
        ]);
        let compactor = Compactor::new(
            Arc::clone(&store),
            Arc::new(directory),
            Arc::new(CompactionMetrics::new()),
            CompactorOptions::default(),
        );

        compactor.enqueue(&account(1, "alice.example"), false);
        compactor.enqueue(&account(2, "bob.example"), false);
        compactor.cancel_pending(acct(1));

        let state = compactor.compact_next().await.expect("merge should succeed");
        assert_eq!(state.account, acct(2));
        assert_eq!(compactor.pending(), 0);
    }

    #[tokio::test]
    async fn enqueue_all_truncates_to_the_limit_in_store_order() {
        let targets: Vec<_> = (1..=10u64).map(|raw| target(raw, 60)).collect();
        let store = Arc::new(MemoryShardStore::with_targets(targets));
        let directory = StaticDirectory::with_accounts(
            (1..=10u64).map(|raw| (acct(raw), "member.example")),
        );
        let compactor = Compactor::new(
            Arc::clone(&store),
            Arc::new(directory),
            Arc::new(CompactionMetrics::new()),
            CompactorOptions::default(),
        );

        compactor
            .enqueue_all(3, 50, false)
            .await
            .expect("listing should succeed");
        assert_eq!(compactor.pending(), 3);

        for _ in 0..3 {
            compactor.compact_next().await.expect("merge should succeed");
        }
        let compacted: Vec<_> = store
            .compaction_calls()
            .into_iter()
            .map(|(account, _)| account)
            .collect();
        assert_eq!(compacted, vec![acct(1), acct(2), acct(3)]);
    }

    #[tokio::test]
    async fn enqueue_all_defaults_the_shard_threshold() {
        let store = Arc::new(MemoryShardStore::with_targets(vec![target(1, 60)]));
        let compactor = Compactor::new(
            Arc::clone(&store),
            Arc::new(StaticDirectory::with_accounts([])),
            Arc::new(CompactionMetrics::new()),
            CompactorOptions::default(),
        );

        compactor
            .enqueue_all(0, 0, true)
            .await
            .expect("listing should succeed");
        assert_eq!(store.thresholds_seen(), vec![DEFAULT_SHARD_THRESHOLD]);
        assert_eq!(compactor.pending(), 1);
    }

    #[tokio::test]
    async fn enqueue_all_surfaces_a_listing_failure() {
        let store = MemoryShardStore::with_targets(vec![]).fail_listing();
        let compactor = compactor_over(store, StaticDirectory::with_accounts([]));

        let err = compactor
            .enqueue_all(0, 0, false)
            .await
            .expect_err("a failing listing should surface");
        assert!(matches!(err, CompactionError::CandidateListing(_)));
        assert_eq!(compactor.pending(), 0);
    }
}
