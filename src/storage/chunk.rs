//! Storage chunks
//!
//! A chunk is a fixed-capacity, column-aligned block of row data. Mutable
//! chunks own a `VersionStore` parallel to their rows; reference chunks and
//! fully immutable chunks have none. Rows are never physically erased here:
//! a delete finalizes the row's `end_cid` and bumps the invalid-row counter,
//! leaving compaction to a separate pass.
//!
//! The invalid-row counter and the version store's watermark are the only
//! two values pure readers consult without taking the chunk lock; both are
//! atomics updated only while the lock (or the table's append path) holds
//! exclusive access.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::data::{ColumnDef, Value};
use crate::storage::mvcc::VersionStore;
use crate::storage::pos_list::ChunkOffset;
use crate::storage::segment::{Segment, ValueSegment};
use crate::storage::table::TableType;
use crate::{Error, Result};

/// Fixed-capacity block of columnar row storage
#[derive(Debug)]
pub struct Chunk {
    segments: RwLock<Vec<Segment>>,
    version_store: Option<VersionStore>,
    /// Rows whose `end_cid` has been finalized (or that were rolled back);
    /// any nonzero value disables the whole-chunk visibility fast path
    invalid_row_count: AtomicU64,
    capacity: u32,
}

impl Chunk {
    /// Empty mutable chunk with a version store sized to `capacity` rows
    pub fn new_mutable(column_defs: &[ColumnDef], capacity: u32) -> Self {
        let segments = column_defs
            .iter()
            .map(|_| Segment::Value(ValueSegment::with_capacity(capacity as usize)))
            .collect();
        Self {
            segments: RwLock::new(segments),
            version_store: Some(VersionStore::new(capacity as usize)),
            invalid_row_count: AtomicU64::new(0),
            capacity,
        }
    }

    /// Chunk over pre-built segments with no version tracking.
    ///
    /// Used for reference chunks and for immutable data that predates
    /// transaction tracking; every row counts as committed at commit id 0.
    pub fn new_immutable(segments: Vec<Segment>) -> Self {
        let capacity = segments.first().map_or(0, |seg| seg.len()) as u32;
        Self {
            segments: RwLock::new(segments),
            version_store: None,
            invalid_row_count: AtomicU64::new(0),
            capacity,
        }
    }

    /// Number of rows currently stored
    pub fn size(&self) -> u32 {
        self.segments.read().first().map_or(0, |seg| seg.len()) as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Full chunks are frozen for inserts; deletes still apply
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn column_count(&self) -> usize {
        self.segments.read().len()
    }

    pub fn version_store(&self) -> Option<&VersionStore> {
        self.version_store.as_ref()
    }

    pub fn invalid_row_count(&self) -> u64 {
        self.invalid_row_count.load(Ordering::Acquire)
    }

    pub fn increase_invalid_row_count(&self, count: u64) {
        self.invalid_row_count.fetch_add(count, Ordering::AcqRel);
    }

    /// Refresh the cached watermark after a batch of commits.
    ///
    /// The refresh certifies only the rows stored at this moment; rows
    /// appended afterwards invalidate the certification until the next
    /// refresh.
    pub fn update_max_begin_cid(&self) {
        if let Some(store) = &self.version_store {
            store.update_max_begin_cid(self.size() as usize);
        }
    }

    /// Read access to the column segments
    pub fn segments(&self) -> RwLockReadGuard<'_, Vec<Segment>> {
        self.segments.read()
    }

    /// Append one row across all segments; returns its offset.
    ///
    /// The caller is responsible for marking the row in the version store
    /// afterwards; until then the fresh slot reads as invisible.
    pub fn append_row(&self, values: &[Value]) -> Result<ChunkOffset> {
        let mut segments = self.segments.write();
        if values.len() != segments.len() {
            return Err(Error::ColumnCountMismatch {
                expected: segments.len(),
                actual: values.len(),
            });
        }
        if segments.iter().any(|segment| segment.as_reference().is_some()) {
            return Err(Error::TableTypeMismatch(TableType::References));
        }
        let offset = segments.first().map_or(0, |seg| seg.len());
        if offset as u32 >= self.capacity {
            return Err(Error::ChunkFull {
                capacity: self.capacity,
            });
        }
        for (segment, value) in segments.iter_mut().zip(values) {
            if let Segment::Value(seg) = segment {
                seg.push(value.clone());
            }
        }
        Ok(offset as ChunkOffset)
    }

    /// Value of one cell, `None` when out of range
    pub fn get_value(&self, column_id: u16, offset: ChunkOffset) -> Option<Value> {
        self.segments.read().get(column_id as usize)?.value_at(offset)
    }
}
