//! MVCC (Multi-Version Concurrency Control) subsystem
//!
//! Per-chunk begin/end commit-id bookkeeping for snapshot isolation:
//! - Readers see exactly the rows committed at or before their snapshot
//! - Writers stamp pending markers that become real commit ids at commit
//! - A lock-free per-chunk watermark lets whole chunks skip the per-row scan

pub mod version_store;

pub use version_store::{
    is_row_visible, pending_cid, CommitId, TransactionId, VersionEntries, VersionStore, WriteKind,
    MAX_COMMIT_ID, NO_TRANSACTION_ID, UNSET_COMMIT_ID, UNTRACKED_COMMIT_ID,
};
