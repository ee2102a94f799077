//! Version Store - Per-chunk transaction-visibility metadata
//!
//! Each mutable chunk owns one `VersionStore`: three parallel arrays indexed
//! by chunk offset, sized to the chunk's row capacity:
//! - `begin_cids[offset]`: commit id at or after which the row is visible
//! - `end_cids[offset]`:   commit id at or after which it stops being visible
//! - `tids[offset]`:       transaction currently holding the row's write lock
//!
//! Until the owning transaction commits, begin/end slots hold a *pending
//! marker*: a value above the commit-id range tagged with the owning
//! transaction id. Pending markers compare greater than every real snapshot,
//! so uncommitted rows stay invisible to other transactions while the owner
//! can recognize its own writes.
//!
//! All mutation and bulk scanning goes through the chunk-scoped lock
//! (`VersionStore::lock`). The cached `max_begin_cid` watermark is an atomic
//! readable without the lock, paired with the row count it certifies: a
//! refresh only publishes a watermark when every stored row's insertion has
//! committed, and consumers must reject the watermark once the chunk has
//! grown past the certified count. The watermark is only ever raised, so
//! staleness can force the slow path but never falsely include a row.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::{Error, Result};

// ============================================================================
// Commit ids and transaction ids
// ============================================================================

/// Monotonically increasing commit id; doubles as snapshot boundary and
/// row-validity stamp.
pub type CommitId = u64;

/// Unique transaction identifier (never reused)
pub type TransactionId = u64;

/// Highest real commit id; also the "never ends" sentinel for `end_cids`
pub const MAX_COMMIT_ID: CommitId = (1 << 63) - 1;

/// `begin_cid` reserved for immutable/pre-populated data that predates
/// transaction tracking
pub const UNTRACKED_COMMIT_ID: CommitId = 0;

/// Watermark sentinel: `max_begin_cid` has never been computed
pub const UNSET_COMMIT_ID: u64 = u64::MAX;

/// Unlocked sentinel for the `tids` array
pub const NO_TRANSACTION_ID: TransactionId = 0;

/// High bit marking a begin/end slot as pending (uncommitted)
const PENDING_BIT: u64 = 1 << 63;

/// Pending marker for a transaction, stored in a begin/end slot until commit
#[inline]
pub fn pending_cid(transaction_id: TransactionId) -> CommitId {
    debug_assert!(transaction_id & PENDING_BIT == 0);
    PENDING_BIT | transaction_id
}

#[inline]
fn is_pending(cid: CommitId) -> bool {
    cid & PENDING_BIT != 0
}

#[inline]
fn pending_owner(cid: CommitId) -> TransactionId {
    cid & !PENDING_BIT
}

/// Kind of a pending row write, decides which slot a commit stamp replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Delete,
}

// ============================================================================
// Row visibility
// ============================================================================

/// Snapshot-isolation visibility test for one row.
///
/// A reader with transaction id `our_tid` and snapshot `snapshot_commit_id`
/// sees the row iff it is not pending-deleted by the reader itself, and
/// either the reader inserted it (pending begin tagged with `our_tid`) or the
/// row was committed at or before the snapshot and not yet deleted by it.
#[inline]
pub fn is_row_visible(
    our_tid: TransactionId,
    snapshot_commit_id: CommitId,
    begin_cid: CommitId,
    end_cid: CommitId,
) -> bool {
    if is_pending(end_cid) && pending_owner(end_cid) == our_tid {
        // Read-your-own-deletes: the row is gone for us even before commit.
        return false;
    }
    let own_insert = is_pending(begin_cid) && pending_owner(begin_cid) == our_tid;
    own_insert || (begin_cid <= snapshot_commit_id && end_cid > snapshot_commit_id)
}

// ============================================================================
// Version entries (guarded)
// ============================================================================

/// The three parallel arrays, accessible only through the chunk-scoped lock
#[derive(Debug)]
pub struct VersionEntries {
    begin_cids: Vec<CommitId>,
    end_cids: Vec<CommitId>,
    tids: Vec<TransactionId>,
}

impl VersionEntries {
    fn new(capacity: usize) -> Self {
        Self {
            // Unwritten slots carry a begin above every real snapshot, so a
            // concurrent reader racing an append sees them as invisible.
            begin_cids: vec![MAX_COMMIT_ID; capacity],
            end_cids: vec![MAX_COMMIT_ID; capacity],
            tids: vec![NO_TRANSACTION_ID; capacity],
        }
    }

    /// Row capacity (chunk capacity, not current size)
    pub fn capacity(&self) -> usize {
        self.begin_cids.len()
    }

    pub fn begin_cid(&self, offset: usize) -> CommitId {
        self.begin_cids[offset]
    }

    pub fn end_cid(&self, offset: usize) -> CommitId {
        self.end_cids[offset]
    }

    /// Transaction holding the row's write lock, or `NO_TRANSACTION_ID`
    pub fn locker(&self, offset: usize) -> TransactionId {
        self.tids[offset]
    }

    /// Visibility of the row at `offset` for the given reader
    #[inline]
    pub fn is_row_visible(
        &self,
        our_tid: TransactionId,
        snapshot_commit_id: CommitId,
        offset: usize,
    ) -> bool {
        is_row_visible(
            our_tid,
            snapshot_commit_id,
            self.begin_cids[offset],
            self.end_cids[offset],
        )
    }

    /// Mark a freshly appended row as inserted by `transaction_id` (pending)
    pub fn mark_inserted(&mut self, offset: usize, transaction_id: TransactionId) {
        debug_assert_eq!(self.begin_cids[offset], MAX_COMMIT_ID);
        self.begin_cids[offset] = pending_cid(transaction_id);
        self.tids[offset] = transaction_id;
    }

    /// Acquire the row's write lock and stamp a pending delete.
    ///
    /// Fails with `WriteConflict` if another transaction holds the lock or
    /// the row already carries a committed delete; the caller must abort (or
    /// retry its transaction), the existing stamp is never overwritten.
    pub fn mark_deleted(&mut self, offset: usize, transaction_id: TransactionId) -> Result<()> {
        let holder = self.tids[offset];
        if holder != NO_TRANSACTION_ID && holder != transaction_id {
            return Err(Error::WriteConflict { held_by: holder });
        }
        let end = self.end_cids[offset];
        if end != MAX_COMMIT_ID {
            if is_pending(end) && pending_owner(end) == transaction_id {
                // Idempotent re-delete within the same transaction.
                return Ok(());
            }
            // Someone else's delete already committed under us.
            return Err(Error::WriteConflict { held_by: holder });
        }
        self.tids[offset] = transaction_id;
        self.end_cids[offset] = pending_cid(transaction_id);
        Ok(())
    }

    /// Replace a pending marker with the real commit id.
    ///
    /// Clears the write lock; after an insert-commit the row is open for
    /// deletion by any transaction that can see it.
    pub fn commit(&mut self, offset: usize, commit_id: CommitId, kind: WriteKind) {
        debug_assert!(commit_id <= MAX_COMMIT_ID);
        match kind {
            WriteKind::Insert => {
                debug_assert!(is_pending(self.begin_cids[offset]));
                self.begin_cids[offset] = commit_id;
            }
            WriteKind::Delete => {
                debug_assert!(is_pending(self.end_cids[offset]));
                self.end_cids[offset] = commit_id;
            }
        }
        self.tids[offset] = NO_TRANSACTION_ID;
    }

    /// Roll back a pending insert: the row never existed.
    ///
    /// The slot keeps a begin above every snapshot forever; the chunk's
    /// invalid-row counter must be bumped by the caller so the fast path
    /// never includes the dead slot.
    pub fn revert_insert(&mut self, offset: usize) {
        debug_assert!(is_pending(self.begin_cids[offset]));
        self.begin_cids[offset] = MAX_COMMIT_ID;
        self.tids[offset] = NO_TRANSACTION_ID;
    }

    /// Roll back a pending delete: the row stays live, the lock is released
    pub fn revert_delete(&mut self, offset: usize) {
        debug_assert!(is_pending(self.end_cids[offset]));
        self.end_cids[offset] = MAX_COMMIT_ID;
        self.tids[offset] = NO_TRANSACTION_ID;
    }

    /// Stamp a row as committed pre-transaction data (loader path)
    pub fn stamp_committed(&mut self, offset: usize, begin_cid: CommitId) {
        debug_assert!(begin_cid <= MAX_COMMIT_ID);
        self.begin_cids[offset] = begin_cid;
        self.end_cids[offset] = MAX_COMMIT_ID;
        self.tids[offset] = NO_TRANSACTION_ID;
    }

    /// Maximum begin commit id over the first `row_count` slots, `None`
    /// unless every one of them holds a committed insertion. A pending or
    /// unset begin anywhere in the prefix disqualifies the whole chunk.
    fn max_committed_begin(&self, row_count: usize) -> Option<CommitId> {
        let begins = &self.begin_cids[..row_count];
        if begins.iter().any(|&cid| cid >= MAX_COMMIT_ID) {
            return None;
        }
        begins.iter().copied().max()
    }
}

// ============================================================================
// Version store
// ============================================================================

/// Per-chunk version metadata: guarded entries plus the lock-free watermark
#[derive(Debug)]
pub struct VersionStore {
    entries: Mutex<VersionEntries>,
    /// Cached max committed `begin_cid`, `UNSET_COMMIT_ID` until first refresh
    max_begin_cid: AtomicU64,
    /// Row count the watermark certified at its last refresh; the watermark
    /// says nothing about rows appended past this count
    watermark_row_count: AtomicU64,
}

impl VersionStore {
    /// Create a store for a chunk with the given row capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VersionEntries::new(capacity)),
            max_begin_cid: AtomicU64::new(UNSET_COMMIT_ID),
            watermark_row_count: AtomicU64::new(0),
        }
    }

    /// Acquire the chunk-scoped lock over the version entries.
    ///
    /// Every bulk scan (visibility checks, commit stamping) holds this guard
    /// for its whole pass; release is tied to scope on every exit path.
    pub fn lock(&self) -> MutexGuard<'_, VersionEntries> {
        self.entries.lock()
    }

    /// Cached watermark, `None` while unset. Lock-free.
    pub fn max_begin_cid(&self) -> Option<CommitId> {
        match self.max_begin_cid.load(Ordering::Acquire) {
            UNSET_COMMIT_ID => None,
            cid => Some(cid),
        }
    }

    /// Cached watermark together with the row count it certifies, `None`
    /// while unset. Lock-free.
    ///
    /// The certified count is loaded before the watermark; refreshes store
    /// the watermark before the count, so a torn read pairs a count with a
    /// watermark at least as new. A count below the chunk's current size
    /// means rows were appended after the refresh and the watermark must not
    /// be trusted for them.
    pub fn watermark(&self) -> Option<(CommitId, u64)> {
        let certified_rows = self.watermark_row_count.load(Ordering::Acquire);
        match self.max_begin_cid.load(Ordering::Acquire) {
            UNSET_COMMIT_ID => None,
            cid => Some((cid, certified_rows)),
        }
    }

    /// Recompute the watermark from committed begin stamps over the chunk's
    /// first `row_count` rows.
    ///
    /// Called after each batch of commits touching the chunk. The refresh
    /// publishes nothing while any stored row's insertion is still pending,
    /// and the watermark only moves up: concurrent staleness keeps it low
    /// (safe, slow path), never high.
    pub fn update_max_begin_cid(&self, row_count: usize) {
        let entries = self.entries.lock();
        let Some(computed) = entries.max_committed_begin(row_count) else {
            return;
        };
        // Writers serialize on the entries lock held above; plain
        // load/store cannot race another update. The watermark lands
        // before the certified count, see `watermark`.
        let current = self.max_begin_cid.load(Ordering::Acquire);
        if current == UNSET_COMMIT_ID || computed > current {
            self.max_begin_cid.store(computed, Ordering::Release);
        }
        self.watermark_row_count.store(row_count as u64, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================
