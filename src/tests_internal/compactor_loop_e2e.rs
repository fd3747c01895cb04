use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout};

use crate::{
    compaction::Compactor,
    metrics::CompactionMetrics,
    option::CompactorOptions,
    store::Account,
    test_util::{acct, MemoryShardStore, StaticDirectory},
};

fn fast_options() -> CompactorOptions {
    CompactorOptions::new()
        .empty_queue_backoff(Duration::from_millis(5))
        .error_backoff(Duration::from_millis(1))
}

fn account(raw: u64, handle: &str) -> Account {
    Account {
        id: acct(raw),
        handle: handle.to_string(),
    }
}

#[tokio::test]
async fn spawned_loop_drains_enqueued_accounts() {
    let store = Arc::new(MemoryShardStore::with_targets(vec![]));
    let directory = Arc::new(StaticDirectory::with_accounts([
        (acct(1), "alice.example"),
        (acct(2), "bob.example"),
    ]));
    let compactor = Arc::new(Compactor::new(
        Arc::clone(&store),
        directory,
        Arc::new(CompactionMetrics::new()),
        fast_options(),
    ));
    let handle = compactor.spawn();

    compactor.enqueue(&account(1, "alice.example"), false);
    compactor.enqueue(&account(2, "bob.example"), true);

    timeout(Duration::from_secs(5), async {
        while compactor.metrics().snapshot().jobs_completed < 2 {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("the loop should drain both accounts");

    assert_eq!(
        store.compaction_calls(),
        vec![(acct(1), false), (acct(2), true)]
    );
    assert_eq!(compactor.pending(), 0);

    handle.shutdown();
    timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("the loop should exit after shutdown");
}

#[tokio::test]
async fn loop_survives_a_failing_item_and_continues() {
    let store = Arc::new(MemoryShardStore::with_targets(vec![]));
    // acct(9) is unknown to the directory; acct(1) resolves fine.
    let directory = Arc::new(StaticDirectory::with_accounts([(acct(1), "alice.example")]));
    let compactor = Arc::new(Compactor::new(
        Arc::clone(&store),
        directory,
        Arc::new(CompactionMetrics::new()),
        fast_options(),
    ));
    let handle = compactor.spawn();

    compactor.enqueue(&account(9, "ghost.example"), false);
    compactor.enqueue(&account(1, "alice.example"), false);

    timeout(Duration::from_secs(5), async {
        while compactor.metrics().snapshot().jobs_completed < 1 {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("the loop should reach the healthy account");

    let snapshot = compactor.metrics().snapshot();
    assert_eq!(snapshot.lookup_failures, 1);
    assert_eq!(store.compaction_calls(), vec![(acct(1), false)]);

    handle.shutdown();
    timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("the loop should exit after shutdown");
}

#[tokio::test]
async fn shutdown_before_work_processes_nothing() {
    let store = Arc::new(MemoryShardStore::with_targets(vec![]));
    let directory = Arc::new(StaticDirectory::with_accounts([(acct(1), "alice.example")]));
    let compactor = Arc::new(Compactor::new(
        Arc::clone(&store),
        directory,
        Arc::new(CompactionMetrics::new()),
        fast_options(),
    ));

    compactor.shutdown();
    let handle = compactor.spawn();
    compactor.enqueue(&account(1, "alice.example"), false);

    timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("a pre-canceled loop should exit immediately");
    assert!(store.compaction_calls().is_empty());
    assert_eq!(compactor.metrics().snapshot().jobs_completed, 0);
}

#[tokio::test]
async fn dropping_the_handle_stops_the_loop() {
    let store = Arc::new(MemoryShardStore::with_targets(vec![]));
    let directory = Arc::new(StaticDirectory::with_accounts([]));
    let compactor = Arc::new(Compactor::new(
        store,
        directory,
        Arc::new(CompactionMetrics::new()),
        fast_options(),
    ));

    let handle = compactor.spawn();
    drop(handle);
    assert!(compactor.is_shutdown());

    // A pre-signaled loop returns on its first check, so this run is a no-op.
    timeout(Duration::from_millis(100), compactor.run())
        .await
        .expect("run should return immediately once shutdown is signaled");
}
