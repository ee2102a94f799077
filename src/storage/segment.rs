//! Column segments
//!
//! A segment holds one column's worth of one chunk. Two concrete kinds share
//! a single capability surface (`len`, `value_at`, `resolve`):
//! - `ValueSegment`: materialized values stored in the chunk itself
//! - `ReferenceSegment`: an indirection over rows of a base table, addressed
//!   through a shared `PosList`

use std::sync::Arc;

use crate::data::Value;
use crate::storage::pos_list::{ChunkOffset, PosList, RowId};
use crate::storage::table::Table;

/// Materialized column values
#[derive(Debug, Clone, Default)]
pub struct ValueSegment {
    values: Vec<Value>,
}

impl ValueSegment {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn get(&self, offset: usize) -> Option<&Value> {
        self.values.get(offset)
    }
}

/// Indirection over one column of a base table
#[derive(Debug, Clone)]
pub struct ReferenceSegment {
    table: Arc<Table>,
    column_id: u16,
    pos_list: Arc<PosList>,
}

impl ReferenceSegment {
    pub fn new(table: Arc<Table>, column_id: u16, pos_list: Arc<PosList>) -> Self {
        Self {
            table,
            column_id,
            pos_list,
        }
    }

    /// The base table the locators point into
    pub fn referenced_table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn column_id(&self) -> u16 {
        self.column_id
    }

    pub fn pos_list(&self) -> &Arc<PosList> {
        &self.pos_list
    }

    pub fn len(&self) -> usize {
        self.pos_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos_list.is_empty()
    }

    /// Physical locator behind a position, `None` past the end
    pub fn resolve(&self, offset: ChunkOffset) -> Option<RowId> {
        self.pos_list.get(offset as usize)
    }

    /// Value behind a position, resolved through the base table.
    /// `NULL_ROW_ID` locators yield `Value::Null`.
    pub fn value_at(&self, offset: ChunkOffset) -> Option<Value> {
        let row = self.resolve(offset)?;
        if row.is_null() {
            return Some(Value::Null);
        }
        let chunk = self.table.get_chunk(row.chunk_id).ok()?;
        chunk.get_value(self.column_id, row.chunk_offset)
    }
}

/// Tagged variant over the two segment kinds
#[derive(Debug, Clone)]
pub enum Segment {
    Value(ValueSegment),
    Reference(ReferenceSegment),
}

impl Segment {
    pub fn len(&self) -> usize {
        match self {
            Segment::Value(seg) => seg.len(),
            Segment::Reference(seg) => seg.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether chunk-level fast-path checks can apply to this segment's rows
    /// without resolving locators
    pub fn fast_path_eligible(&self) -> bool {
        matches!(self, Segment::Value(_))
    }

    pub fn value_at(&self, offset: ChunkOffset) -> Option<Value> {
        match self {
            Segment::Value(seg) => seg.get(offset as usize).cloned(),
            Segment::Reference(seg) => seg.value_at(offset),
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceSegment> {
        match self {
            Segment::Reference(seg) => Some(seg),
            Segment::Value(_) => None,
        }
    }
}
