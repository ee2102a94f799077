//! Transaction Manager - Lifecycle management for transactions
//!
//! Issues monotonically increasing transaction ids and commit ids and drives
//! commit/rollback over each transaction's write set. The manager is owned
//! by the embedding engine and lives exactly as long as it does; there is no
//! ambient singleton.
//!
//! Commit protocol (two-phase publication): under a single commit mutex the
//! manager issues the next commit id, stamps every pending version entry,
//! refreshes the watermarks of all touched chunks, and only then publishes
//! the commit id as the new snapshot boundary. A reader snapshot can never
//! observe a half-stamped commit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::storage::chunk::Chunk;
use crate::storage::mvcc::{CommitId, WriteKind};
use crate::txn::context::TransactionContext;
use crate::Result;

/// Central transaction manager
///
/// Thread-safe; commit ordering is total (one commit critical section).
#[derive(Debug)]
pub struct TransactionManager {
    /// Next transaction id to hand out (ids start at 1, never reused)
    next_transaction_id: AtomicU64,
    /// Highest fully published commit id; the snapshot boundary for BEGIN
    last_commit_id: AtomicU64,
    /// Serializes commit id issuance, stamping, and publication
    commit_mutex: Mutex<()>,
    active_transactions: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_transaction_id: AtomicU64::new(1),
            last_commit_id: AtomicU64::new(0),
            commit_mutex: Mutex::new(()),
            active_transactions: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    /// BEGIN - new transaction context reading as of the current snapshot
    pub fn begin(&self) -> TransactionContext {
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.last_commit_id.load(Ordering::Acquire);
        self.active_transactions.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "transaction {} begins at snapshot {}",
            transaction_id,
            snapshot
        );
        TransactionContext::new(transaction_id, snapshot)
    }

    /// The commit-id boundary a transaction beginning now would read as of
    pub fn current_snapshot(&self) -> CommitId {
        self.last_commit_id.load(Ordering::Acquire)
    }

    /// The commit id the next successful commit will receive
    pub fn next_commit_id(&self) -> CommitId {
        self.last_commit_id.load(Ordering::Acquire) + 1
    }

    /// COMMIT - stamp all pending writes with a fresh commit id.
    ///
    /// Once stamping starts it runs to completion; the new commit id becomes
    /// visible to new snapshots only after every entry is stamped and every
    /// touched chunk's watermark is refreshed.
    pub fn commit(&self, ctx: &mut TransactionContext) -> Result<CommitId> {
        ctx.ensure_active()?;
        ctx.begin_commit();

        let guard = self.commit_mutex.lock();
        let commit_id = self.last_commit_id.load(Ordering::Acquire) + 1;

        // Group the write set per chunk so each chunk's version store is
        // locked once per commit, in write order within the chunk.
        let mut touched: AHashMap<usize, (Arc<Chunk>, Vec<(u32, WriteKind)>)> = AHashMap::new();
        for write in ctx.writes() {
            let key = Arc::as_ptr(&write.chunk) as usize;
            touched
                .entry(key)
                .or_insert_with(|| (write.chunk.clone(), Vec::new()))
                .1
                .push((write.offset, write.kind));
        }

        for (chunk, writes) in touched.values() {
            let mut deleted = 0u64;
            {
                let Some(store) = chunk.version_store() else {
                    debug_assert!(false, "write record on a chunk without version store");
                    continue;
                };
                let mut entries = store.lock();
                for &(offset, kind) in writes {
                    entries.commit(offset as usize, commit_id, kind);
                    if kind == WriteKind::Delete {
                        deleted += 1;
                    }
                }
            }
            if deleted > 0 {
                chunk.increase_invalid_row_count(deleted);
            }
            // Synchronous with commit: the watermark is raised from the
            // entries just stamped, inside the same critical section.
            chunk.update_max_begin_cid();
        }

        self.last_commit_id.store(commit_id, Ordering::Release);
        drop(guard);

        ctx.finish_commit(commit_id);
        self.active_transactions.fetch_sub(1, Ordering::Relaxed);
        self.total_committed.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "transaction {} committed at commit id {}",
            ctx.transaction_id(),
            commit_id
        );
        Ok(commit_id)
    }

    /// ROLLBACK - revert all pending writes; no commit id is ever assigned.
    ///
    /// Inserts become "never existed" (their dead slots permanently disable
    /// the chunk fast path), deletes release their row locks.
    pub fn rollback(&self, ctx: &mut TransactionContext) -> Result<()> {
        ctx.ensure_active()?;

        for write in ctx.writes().iter().rev() {
            let Some(store) = write.chunk.version_store() else {
                debug_assert!(false, "write record on a chunk without version store");
                continue;
            };
            let mut entries = store.lock();
            match write.kind {
                WriteKind::Insert => {
                    entries.revert_insert(write.offset as usize);
                    drop(entries);
                    write.chunk.increase_invalid_row_count(1);
                }
                WriteKind::Delete => {
                    entries.revert_delete(write.offset as usize);
                }
            }
        }

        ctx.finish_rollback();
        self.active_transactions.fetch_sub(1, Ordering::Relaxed);
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
        log::debug!("transaction {} rolled back", ctx.transaction_id());
        Ok(())
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    pub fn active_count(&self) -> u64 {
        self.active_transactions.load(Ordering::Relaxed)
    }

    pub fn total_committed(&self) -> u64 {
        self.total_committed.load(Ordering::Relaxed)
    }

    pub fn total_aborted(&self) -> u64 {
        self.total_aborted.load(Ordering::Relaxed)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
