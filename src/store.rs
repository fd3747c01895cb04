//! Collaborator contracts for the shard store and the account directory.
//!
//! The scheduler drives these interfaces but owns none of them: the
//! byte-level shard merge, candidate listing, and identity resolution all
//! live in the embedding node.

use std::future::Future;

use thiserror::Error;

use crate::id::AccountId;

/// A resolved account: the numeric id plus its human-readable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Shard-log identifier of the account.
    pub id: AccountId,
    /// Human-readable identity, used only for logs and status reporting.
    pub handle: String,
}

/// An account the store considers eligible for compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionTarget {
    /// The eligible account.
    pub account: AccountId,
    /// Number of shards currently backing the account's log.
    pub shard_count: usize,
}

/// Outcome of one shard merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Total block references walked during the merge.
    pub total_refs: u64,
    /// Shard count before the merge.
    pub start_shards: u64,
    /// Shards written by the merge.
    pub new_shards: u64,
    /// Shards left untouched (the fast pass skips large ones).
    pub skipped_shards: u64,
    /// Shards deleted after their contents were merged.
    pub shards_deleted: u64,
    /// Duplicate blocks dropped while merging.
    pub dupe_count: u64,
}

/// Errors surfaced by a shard store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying shard file I/O failed.
    #[error("shard store io error: {0}")]
    Io(#[from] std::io::Error),
    /// Backend-specific failure outside plain file I/O.
    #[error("shard store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary backend failure.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

/// Errors surfaced by an account directory implementation.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No account exists behind the given id.
    #[error("account {0} not found")]
    NotFound(AccountId),
    /// The directory could not be reached or answered transiently.
    #[error("directory unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DirectoryError {
    /// Wrap a transient resolution failure.
    pub fn unavailable(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unavailable(err.into())
    }
}

/// Storage layer holding the per-account shard files.
pub trait ShardStore: Send + Sync + 'static {
    /// List accounts whose shard count is at or above `shard_threshold`,
    /// in the store's own order.
    fn compaction_targets(
        &self,
        shard_threshold: usize,
    ) -> impl Future<Output = Result<Vec<CompactionTarget>, StoreError>> + Send;

    /// Merge the account's shards into fewer shards.
    ///
    /// `fast` requests the partial pass that skips large shards. The merge
    /// must stay safe when another call for the same account is already in
    /// flight; the scheduler does not enforce single-flight across its
    /// worker and bulk paths.
    fn compact_account_shards(
        &self,
        account: AccountId,
        fast: bool,
    ) -> impl Future<Output = Result<CompactionStats, StoreError>> + Send;
}

/// Directory resolving account ids to their identities.
pub trait AccountDirectory: Send + Sync + 'static {
    /// Resolve the identity behind `account`.
    fn lookup_account(
        &self,
        account: AccountId,
    ) -> impl Future<Output = Result<Account, DirectoryError>> + Send;
}
