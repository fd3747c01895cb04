use async_lock::RwLock;

use crate::{id::AccountId, store::CompactionStats};

/// Where a compaction attempt currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompactionStage {
    /// No attempt has been recorded yet.
    #[default]
    Unknown,
    /// Resolving the account's identity through the directory.
    ResolvingIdentity,
    /// The directory lookup failed; terminal for this attempt.
    IdentityLookupFailed,
    /// The shard merge is running.
    Compacting,
    /// The shard merge failed; terminal for this attempt.
    CompactionFailed,
    /// The shard merge finished and stats were recorded.
    Done,
}

impl CompactionStage {
    /// Stable snake_case name, used in logs and admin surfaces.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ResolvingIdentity => "resolving_identity",
            Self::IdentityLookupFailed => "failed_identity_lookup",
            Self::Compacting => "compacting",
            Self::CompactionFailed => "failed_compacting",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for CompactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the most recently attempted or in-progress compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionState {
    /// Account the attempt belongs to.
    pub account: AccountId,
    /// Human-readable identity, once the directory has resolved it.
    pub handle: Option<String>,
    /// Current stage of the attempt.
    pub stage: CompactionStage,
    /// Merge outcome, present once the attempt reaches [`CompactionStage::Done`].
    pub stats: Option<CompactionStats>,
}

impl CompactionState {
    /// Handle for log output, tolerating an unresolved identity.
    pub fn handle_or_unknown(&self) -> &str {
        self.handle.as_deref().unwrap_or("unknown")
    }
}

/// Holds the single status snapshot, overwritten on every stage transition.
///
/// Reads clone the snapshot out under the read half of the lock, so a caller
/// can never observe fields from two different transitions mixed, and
/// mutating a returned value never touches the cell.
#[derive(Debug, Default)]
pub(crate) struct StatusCell {
    inner: RwLock<CompactionState>,
}

impl StatusCell {
    pub(crate) async fn set(
        &self,
        account: AccountId,
        handle: Option<String>,
        stage: CompactionStage,
        stats: Option<CompactionStats>,
    ) {
        *self.inner.write().await = CompactionState {
            account,
            handle,
            stage,
            stats,
        };
    }

    pub(crate) async fn snapshot(&self) -> CompactionState {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_is_isolated_from_the_cell() {
        let cell = StatusCell::default();
        cell.set(
            AccountId::new(3),
            Some("carol.example".to_string()),
            CompactionStage::Compacting,
            None,
        )
        .await;

        let mut first = cell.snapshot().await;
        first.handle = Some("mallory.example".to_string());
        first.stage = CompactionStage::Done;

        let second = cell.snapshot().await;
        assert_eq!(second.handle.as_deref(), Some("carol.example"));
        assert_eq!(second.stage, CompactionStage::Compacting);
    }

    #[tokio::test]
    async fn set_overwrites_every_field() {
        let cell = StatusCell::default();
        cell.set(
            AccountId::new(1),
            Some("alice.example".to_string()),
            CompactionStage::Done,
            Some(CompactionStats {
                start_shards: 60,
                new_shards: 2,
                ..CompactionStats::default()
            }),
        )
        .await;
        cell.set(AccountId::new(2), None, CompactionStage::ResolvingIdentity, None)
            .await;

        let state = cell.snapshot().await;
        assert_eq!(state.account, AccountId::new(2));
        assert!(state.handle.is_none());
        assert_eq!(state.handle_or_unknown(), "unknown");
        assert_eq!(state.stage, CompactionStage::ResolvingIdentity);
        assert!(state.stats.is_none());
    }
}
