//! Compaction scheduling: dedup queue, worker loop, status, and bulk runs.

/// Bulk driver for administrative one-shot runs.
mod batch;
/// Scheduler error kinds.
mod error;
/// Membership-deduplicated pending-work queue.
mod queue;
/// Per-attempt status stages and the shared snapshot.
mod status;
/// The compactor and its background worker loop.
mod worker;

pub use batch::{compact_all_accounts, BatchOutcome, BatchRequest};
pub use error::CompactionError;
pub use status::{CompactionStage, CompactionState};
pub use worker::{Compactor, CompactorHandle};
