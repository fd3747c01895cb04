//! In-memory collaborator fakes shared across tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use tokio_util::sync::CancellationToken;

use crate::{
    id::AccountId,
    store::{
        Account, AccountDirectory, CompactionStats, CompactionTarget, DirectoryError, ShardStore,
        StoreError,
    },
};

pub(crate) fn acct(raw: u64) -> AccountId {
    AccountId::new(raw)
}

pub(crate) fn target(raw: u64, shard_count: usize) -> CompactionTarget {
    CompactionTarget {
        account: acct(raw),
        shard_count,
    }
}

/// Shard store fake backed by a fixed candidate list.
pub(crate) struct MemoryShardStore {
    targets: Vec<CompactionTarget>,
    fail_accounts: HashSet<AccountId>,
    fail_listing: bool,
    compacted: Mutex<Vec<(AccountId, bool)>>,
    thresholds_seen: Mutex<Vec<usize>>,
    cancel_after_each: Option<CancellationToken>,
}

impl MemoryShardStore {
    pub(crate) fn with_targets(targets: Vec<CompactionTarget>) -> Self {
        Self {
            targets,
            fail_accounts: HashSet::new(),
            fail_listing: false,
            compacted: Mutex::new(Vec::new()),
            thresholds_seen: Mutex::new(Vec::new()),
            cancel_after_each: None,
        }
    }

    /// Make merges for `account` fail.
    pub(crate) fn fail_for(mut self, account: AccountId) -> Self {
        self.fail_accounts.insert(account);
        self
    }

    /// Make candidate listing fail.
    pub(crate) fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Cancel `token` at the start of every merge call, so the first merge
    /// still completes and the caller observes the signal before the next.
    pub(crate) fn cancel_after_each(mut self, token: CancellationToken) -> Self {
        self.cancel_after_each = Some(token);
        self
    }

    /// Every `(account, fast)` merge call recorded so far, in order.
    pub(crate) fn compaction_calls(&self) -> Vec<(AccountId, bool)> {
        self.compacted
            .lock()
            .expect("merge log mutex should not be poisoned")
            .clone()
    }

    /// Every threshold the candidate listing was queried with, in order.
    pub(crate) fn thresholds_seen(&self) -> Vec<usize> {
        self.thresholds_seen
            .lock()
            .expect("threshold log mutex should not be poisoned")
            .clone()
    }
}

impl ShardStore for MemoryShardStore {
    async fn compaction_targets(
        &self,
        shard_threshold: usize,
    ) -> Result<Vec<CompactionTarget>, StoreError> {
        self.thresholds_seen
            .lock()
            .expect("threshold log mutex should not be poisoned")
            .push(shard_threshold);
        if self.fail_listing {
            return Err(StoreError::backend("synthetic listing failure"));
        }
        Ok(self
            .targets
            .iter()
            .copied()
            .filter(|target| target.shard_count >= shard_threshold)
            .collect())
    }

    async fn compact_account_shards(
        &self,
        account: AccountId,
        fast: bool,
    ) -> Result<CompactionStats, StoreError> {
        if let Some(token) = &self.cancel_after_each {
            token.cancel();
        }
        if self.fail_accounts.contains(&account) {
            return Err(StoreError::backend(format!(
                "synthetic merge failure for account {account}"
            )));
        }
        self.compacted
            .lock()
            .expect("merge log mutex should not be poisoned")
            .push((account, fast));
        Ok(CompactionStats {
            total_refs: 1_000,
            start_shards: 60,
            new_shards: 2,
            skipped_shards: if fast { 5 } else { 0 },
            shards_deleted: 58,
            dupe_count: 4,
        })
    }
}

/// Directory fake over a fixed id-to-handle table.
pub(crate) struct StaticDirectory {
    accounts: HashMap<AccountId, String>,
}

impl StaticDirectory {
    pub(crate) fn with_accounts<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (AccountId, &'static str)>,
    {
        Self {
            accounts: accounts
                .into_iter()
                .map(|(account, handle)| (account, handle.to_string()))
                .collect(),
        }
    }
}

impl AccountDirectory for StaticDirectory {
    async fn lookup_account(&self, account: AccountId) -> Result<Account, DirectoryError> {
        match self.accounts.get(&account) {
            Some(handle) => Ok(Account {
                id: account,
                handle: handle.clone(),
            }),
            None => Err(DirectoryError::NotFound(account)),
        }
    }
}
