//! Row locators and position lists
//!
//! A `RowId` addresses one physical row as (chunk id, offset within chunk).
//! A `PosList` is an ordered sequence of row locators, all referencing rows
//! of one base table; it is how a table presents a filtered or reordered
//! view over rows physically stored elsewhere.

use serde::{Deserialize, Serialize};

/// Chunk identifier within a table
pub type ChunkId = u32;

/// Row offset within a chunk
pub type ChunkOffset = u32;

/// Physical row address: (chunk, offset within chunk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub chunk_id: ChunkId,
    pub chunk_offset: ChunkOffset,
}

/// Placeholder locator addressing no physical row (e.g. outer-join NULLs)
pub const NULL_ROW_ID: RowId = RowId {
    chunk_id: ChunkId::MAX,
    chunk_offset: ChunkOffset::MAX,
};

impl RowId {
    pub fn new(chunk_id: ChunkId, chunk_offset: ChunkOffset) -> Self {
        Self {
            chunk_id,
            chunk_offset,
        }
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_ROW_ID
    }
}

/// Ordered list of row locators into one base table; immutable once built
#[derive(Debug, Clone, Default)]
pub struct PosList {
    positions: Vec<RowId>,
    /// All locators name the same chunk (lets consumers skip run detection)
    guarantees_single_chunk: bool,
}

impl PosList {
    /// List that may reference any number of chunks
    pub fn new(positions: Vec<RowId>) -> Self {
        Self {
            positions,
            guarantees_single_chunk: false,
        }
    }

    /// List whose locators all reference the same chunk
    pub fn single_chunk(positions: Vec<RowId>) -> Self {
        debug_assert!(positions
            .windows(2)
            .all(|w| w[0].chunk_id == w[1].chunk_id && !w[1].is_null()));
        Self {
            positions,
            guarantees_single_chunk: true,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RowId> {
        self.positions.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RowId> {
        self.positions.iter()
    }

    pub fn positions(&self) -> &[RowId] {
        &self.positions
    }

    pub fn guarantees_single_chunk(&self) -> bool {
        self.guarantees_single_chunk
    }

    /// The one chunk all locators reference, if guaranteed and non-empty
    pub fn common_chunk_id(&self) -> Option<ChunkId> {
        if self.guarantees_single_chunk {
            self.positions.first().map(|row| row.chunk_id)
        } else {
            None
        }
    }
}
