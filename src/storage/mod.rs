//! Storage module - chunked columnar storage with per-chunk MVCC
//!
//! Layout:
//! - `chunk`: fixed-capacity column-aligned row blocks
//! - `segment`: value vs. reference segments (one per column per chunk)
//! - `pos_list`: row locators and positional indirection lists
//! - `table`: chunk ownership plus insert/delete primitives
//! - `mvcc`: per-chunk version bookkeeping driving snapshot isolation

pub mod chunk;
pub mod mvcc;
pub mod pos_list;
pub mod segment;
pub mod table;

pub use chunk::Chunk;
pub use mvcc::{CommitId, TransactionId, VersionStore, WriteKind, MAX_COMMIT_ID};
pub use pos_list::{ChunkId, ChunkOffset, PosList, RowId, NULL_ROW_ID};
pub use segment::{ReferenceSegment, Segment, ValueSegment};
pub use table::{Table, TableConfig, TableType};
