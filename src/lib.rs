//! Basalt - in-memory analytical storage core
//!
//! Chunked columnar storage with per-chunk MVCC bookkeeping: concurrent
//! transactions read a consistent snapshot while writers insert and
//! logically delete rows. The `Validate` operator materializes exactly the
//! row set visible to a transaction, whether its input is base storage or a
//! positional view over another table.
//!
//! Single-process, in-memory snapshot isolation only: no durability, no
//! consensus, no on-disk format.

pub mod data;
pub mod query;
pub mod storage;
pub mod txn;

// Re-export main types
pub use data::{ColumnDef, DataType, Value};
pub use query::Validate;
pub use storage::{
    Chunk, ChunkId, ChunkOffset, CommitId, PosList, RowId, Segment, Table, TableConfig, TableType,
    TransactionId, VersionStore,
};
pub use txn::{TransactionContext, TransactionManager, TransactionPhase};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another transaction holds the row's write lock (or its delete already
    /// committed); the caller must abort and may retry the transaction
    #[error("write conflict: row locked by transaction {held_by}")]
    WriteConflict { held_by: storage::TransactionId },

    /// Operation on a transaction that is not active (committed, rolled
    /// back, or mid-commit); fatal to the calling operation
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    /// Row locator names a nonexistent chunk or offset; indicates upstream
    /// corruption
    #[error("row locator {row:?} out of range")]
    OutOfRange { row: storage::RowId },

    #[error("expected {expected} column values, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("value type mismatch for column '{column}'")]
    TypeMismatch { column: String },

    #[error("operation not supported on a {0:?} table")]
    TableTypeMismatch(storage::TableType),

    #[error("chunk is frozen at capacity {capacity}")]
    ChunkFull { capacity: u32 },

    #[error("chunk {0} has no version store")]
    ImmutableChunk(storage::ChunkId),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;
