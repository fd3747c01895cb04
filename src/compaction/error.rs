use thiserror::Error;

use crate::{
    id::AccountId,
    store::{DirectoryError, StoreError},
};

/// Errors surfaced by the compaction scheduler.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The queue had no pending accounts. Expected during idle periods; the
    /// worker loop answers it with a backoff, not a failure log.
    #[error("no accounts queued for compaction")]
    QueueEmpty,
    /// The directory could not resolve the account behind a queued item.
    #[error("failed to resolve account {account}: {source}")]
    IdentityLookup {
        /// Account whose identity lookup failed.
        account: AccountId,
        /// Directory failure that ended the attempt.
        source: DirectoryError,
    },
    /// The shard store failed to merge the account's shards.
    #[error("failed to compact shards for account {account}: {source}")]
    ShardCompaction {
        /// Account whose merge failed.
        account: AccountId,
        /// Store failure that ended the attempt.
        source: StoreError,
    },
    /// The shard store could not produce a candidate list.
    #[error("failed to list compaction candidates: {0}")]
    CandidateListing(#[source] StoreError),
}
