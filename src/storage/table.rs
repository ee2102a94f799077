//! Tables: chunked columnar storage with MVCC-aware mutation primitives
//!
//! A `Data` table physically owns its rows in fixed-capacity chunks; a
//! `References` table presents a positional view over another table through
//! reference segments. Insert and delete go through the chunk version
//! stores and record themselves into the calling transaction's write set so
//! commit/rollback can stamp or revert them.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{ColumnDef, Value};
use crate::storage::chunk::Chunk;
use crate::storage::mvcc::{WriteKind, UNTRACKED_COMMIT_ID};
use crate::storage::pos_list::{ChunkId, RowId};
use crate::txn::context::TransactionContext;
use crate::{Error, Result};

/// Physical vs. positional-view table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Data,
    References,
}

/// Storage tuning knobs
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Row capacity of each chunk; a full chunk is frozen for inserts
    pub target_chunk_size: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: 65_535,
        }
    }
}

/// A chunked columnar table
#[derive(Debug)]
pub struct Table {
    column_defs: Vec<ColumnDef>,
    table_type: TableType,
    target_chunk_size: u32,
    chunks: RwLock<Vec<Arc<Chunk>>>,
}

impl Table {
    pub fn new(column_defs: Vec<ColumnDef>, table_type: TableType, config: TableConfig) -> Self {
        Self {
            column_defs,
            table_type,
            target_chunk_size: config.target_chunk_size,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.column_defs
    }

    pub fn column_count(&self) -> usize {
        self.column_defs.len()
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    pub fn chunk_count(&self) -> ChunkId {
        self.chunks.read().len() as ChunkId
    }

    /// Chunk by id; `OutOfRange` for a nonexistent chunk
    pub fn get_chunk(&self, chunk_id: ChunkId) -> Result<Arc<Chunk>> {
        self.chunks
            .read()
            .get(chunk_id as usize)
            .cloned()
            .ok_or(Error::OutOfRange {
                row: RowId::new(chunk_id, 0),
            })
    }

    /// Append a pre-built chunk (reference chunks, loader output)
    pub fn append_chunk(&self, chunk: Arc<Chunk>) -> Result<()> {
        if chunk.column_count() != self.column_defs.len() {
            return Err(Error::ColumnCountMismatch {
                expected: self.column_defs.len(),
                actual: chunk.column_count(),
            });
        }
        self.chunks.write().push(chunk);
        Ok(())
    }

    /// Total stored rows, including logically deleted ones
    pub fn row_count(&self) -> u64 {
        self.chunks
            .read()
            .iter()
            .map(|chunk| chunk.size() as u64)
            .sum()
    }

    /// Insert one row under the given transaction.
    ///
    /// The row lands in the last open chunk (a new one is created when the
    /// table is empty or the last chunk is frozen) and stays visible only to
    /// `ctx` until commit.
    pub fn insert(&self, values: Vec<Value>, ctx: &mut TransactionContext) -> Result<RowId> {
        ctx.ensure_active()?;
        if self.table_type != TableType::Data {
            return Err(Error::TableTypeMismatch(self.table_type));
        }
        self.check_row_shape(&values)?;

        // The chunks write lock is held across the capacity check and the
        // append, so rollover never races another inserter.
        let mut chunks = self.chunks.write();
        let needs_new = chunks.last().map_or(true, |chunk| chunk.is_full());
        if needs_new {
            chunks.push(Arc::new(Chunk::new_mutable(
                &self.column_defs,
                self.target_chunk_size,
            )));
        }
        let chunk_id = (chunks.len() - 1) as ChunkId;
        let chunk = chunks[chunk_id as usize].clone();

        let offset = chunk.append_row(&values)?;
        let store = chunk
            .version_store()
            .ok_or(Error::ImmutableChunk(chunk_id))?;
        store.lock().mark_inserted(offset as usize, ctx.transaction_id());
        drop(chunks);

        ctx.record_write(chunk, offset, WriteKind::Insert);
        Ok(RowId::new(chunk_id, offset))
    }

    /// Logically delete one row under the given transaction.
    ///
    /// Acquires the row's write lock; a row locked by another transaction
    /// surfaces `WriteConflict` for the caller to abort and retry.
    pub fn delete(&self, row: RowId, ctx: &mut TransactionContext) -> Result<()> {
        ctx.ensure_active()?;
        if self.table_type != TableType::Data {
            return Err(Error::TableTypeMismatch(self.table_type));
        }
        let chunk = self.get_chunk(row.chunk_id)?;
        if row.chunk_offset >= chunk.size() {
            return Err(Error::OutOfRange { row });
        }
        let store = chunk
            .version_store()
            .ok_or(Error::ImmutableChunk(row.chunk_id))?;
        store
            .lock()
            .mark_deleted(row.chunk_offset as usize, ctx.transaction_id())?;

        ctx.record_write(chunk, row.chunk_offset, WriteKind::Delete);
        Ok(())
    }

    /// Bulk-load rows stamped as committed pre-transaction data
    /// (`begin_cid = 0`). Each touched chunk's watermark is refreshed once,
    /// after the whole batch is stamped.
    pub fn append_committed_rows(&self, rows: Vec<Vec<Value>>) -> Result<()> {
        if self.table_type != TableType::Data {
            return Err(Error::TableTypeMismatch(self.table_type));
        }
        for values in &rows {
            self.check_row_shape(values)?;
        }

        let mut touched: Vec<Arc<Chunk>> = Vec::new();
        let mut chunks = self.chunks.write();
        for values in &rows {
            let needs_new = chunks.last().map_or(true, |chunk| chunk.is_full());
            if needs_new {
                chunks.push(Arc::new(Chunk::new_mutable(
                    &self.column_defs,
                    self.target_chunk_size,
                )));
            }
            let chunk = chunks.last().expect("chunk just pushed").clone();
            let offset = chunk.append_row(values)?;
            if let Some(store) = chunk.version_store() {
                store.lock().stamp_committed(offset as usize, UNTRACKED_COMMIT_ID);
            }
            if touched.last().map_or(true, |last| !Arc::ptr_eq(last, &chunk)) {
                touched.push(chunk);
            }
        }
        drop(chunks);

        for chunk in touched {
            chunk.update_max_begin_cid();
        }
        Ok(())
    }

    fn check_row_shape(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.column_defs.len() {
            return Err(Error::ColumnCountMismatch {
                expected: self.column_defs.len(),
                actual: values.len(),
            });
        }
        for (def, value) in self.column_defs.iter().zip(values) {
            match value.data_type() {
                None => {
                    if !def.nullable {
                        return Err(Error::TypeMismatch {
                            column: def.name.clone(),
                        });
                    }
                }
                Some(dt) => {
                    if dt != def.data_type {
                        return Err(Error::TypeMismatch {
                            column: def.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
