//! Transaction Context - Per-transaction state
//!
//! Carries the identity and snapshot of one transaction plus the write set
//! the manager stamps at commit or reverts at rollback. The phase machine is
//! `Active -> Committing -> Committed` or `Active -> RolledBack`; only
//! `Active` contexts may read or write, and a finished context is never
//! reused.

use std::sync::Arc;

use crate::storage::chunk::Chunk;
use crate::storage::mvcc::{CommitId, TransactionId, WriteKind};
use crate::storage::pos_list::ChunkOffset;
use crate::{Error, Result};

/// Lifecycle phase of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Active,
    Committing,
    Committed,
    RolledBack,
}

/// One pending row write, stamped or reverted as a unit at transaction end
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub chunk: Arc<Chunk>,
    pub offset: ChunkOffset,
    pub kind: WriteKind,
}

/// Per-transaction state: identity, snapshot, eventual commit id, write set
#[derive(Debug)]
pub struct TransactionContext {
    transaction_id: TransactionId,
    snapshot_commit_id: CommitId,
    commit_id: Option<CommitId>,
    phase: TransactionPhase,
    writes: Vec<WriteRecord>,
}

impl TransactionContext {
    /// Created by the transaction manager at BEGIN; the snapshot is fixed
    /// here and never advances.
    pub(crate) fn new(transaction_id: TransactionId, snapshot_commit_id: CommitId) -> Self {
        Self {
            transaction_id,
            snapshot_commit_id,
            commit_id: None,
            phase: TransactionPhase::Active,
            writes: Vec::new(),
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// The commit-id boundary this transaction reads as of
    pub fn snapshot_commit_id(&self) -> CommitId {
        self.snapshot_commit_id
    }

    /// Assigned exactly once, at successful commit
    pub fn commit_id(&self) -> Option<CommitId> {
        self.commit_id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    /// Guard for every operation that requires a live transaction
    pub fn ensure_active(&self) -> Result<()> {
        if self.phase == TransactionPhase::Active {
            Ok(())
        } else {
            Err(Error::InvalidTransactionState(format!(
                "transaction {} is {:?}",
                self.transaction_id, self.phase
            )))
        }
    }

    /// Record a pending insert/delete for commit-time stamping.
    /// Called by the storage primitives after the version store mutation.
    pub(crate) fn record_write(&mut self, chunk: Arc<Chunk>, offset: ChunkOffset, kind: WriteKind) {
        debug_assert_eq!(self.phase, TransactionPhase::Active);
        self.writes.push(WriteRecord {
            chunk,
            offset,
            kind,
        });
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    pub(crate) fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub(crate) fn begin_commit(&mut self) {
        debug_assert_eq!(self.phase, TransactionPhase::Active);
        self.phase = TransactionPhase::Committing;
    }

    pub(crate) fn finish_commit(&mut self, commit_id: CommitId) {
        debug_assert_eq!(self.phase, TransactionPhase::Committing);
        debug_assert!(self.commit_id.is_none());
        self.commit_id = Some(commit_id);
        self.phase = TransactionPhase::Committed;
        self.writes.clear();
    }

    pub(crate) fn finish_rollback(&mut self) {
        self.phase = TransactionPhase::RolledBack;
        self.writes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_machine() {
        let mut ctx = TransactionContext::new(1, 10);
        assert_eq!(ctx.phase(), TransactionPhase::Active);
        assert!(ctx.ensure_active().is_ok());
        assert_eq!(ctx.snapshot_commit_id(), 10);
        assert_eq!(ctx.commit_id(), None);

        ctx.begin_commit();
        assert!(ctx.ensure_active().is_err());
        ctx.finish_commit(11);
        assert_eq!(ctx.phase(), TransactionPhase::Committed);
        assert_eq!(ctx.commit_id(), Some(11));
    }

    #[test]
    fn test_rolled_back_context_rejected() {
        let mut ctx = TransactionContext::new(2, 0);
        ctx.finish_rollback();
        let err = ctx.ensure_active().unwrap_err();
        assert!(matches!(err, Error::InvalidTransactionState(_)));
        assert_eq!(ctx.commit_id(), None);
    }
}
