//! Schema provider
//!
//! Column types, per-column byte offsets and the partitioning of a schema into tiles.
//! Everything here is immutable once built; the storage layer only reads it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StorageError};
use crate::types::Oid;

/// Fixed-width column types stored inline in tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Boolean,
    /// Inline string of at most `max_len` bytes (u16 length prefix)
    Varchar(u16),
}

impl ValueType {
    /// Bytes occupied in a tile
    pub fn length(&self) -> usize {
        match self {
            ValueType::TinyInt | ValueType::Boolean => 1,
            ValueType::SmallInt => 2,
            ValueType::Integer => 4,
            ValueType::BigInt | ValueType::Double => 8,
            ValueType::Varchar(max_len) => 2 + *max_len as usize,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::TinyInt => write!(f, "TINYINT"),
            ValueType::SmallInt => write!(f, "SMALLINT"),
            ValueType::Integer => write!(f, "INTEGER"),
            ValueType::BigInt => write!(f, "BIGINT"),
            ValueType::Double => write!(f, "DOUBLE"),
            ValueType::Boolean => write!(f, "BOOLEAN"),
            ValueType::Varchar(len) => write!(f, "VARCHAR({})", len),
        }
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
}

impl Column {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            value_type,
        }
    }
}

/// Ordered list of columns with precomputed offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
    offsets: Vec<usize>,
    tuple_length: usize,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut tuple_length = 0;
        for column in &columns {
            offsets.push(tuple_length);
            tuple_length += column.value_type.length();
        }
        Self {
            columns,
            offsets,
            tuple_length,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, col_id: Oid) -> &Column {
        &self.columns[col_id as usize]
    }

    pub fn column_type(&self, col_id: Oid) -> ValueType {
        self.columns[col_id as usize].value_type
    }

    pub fn column_offset(&self, col_id: Oid) -> usize {
        self.offsets[col_id as usize]
    }

    /// Bytes per tuple in this schema
    pub fn tuple_length(&self) -> usize {
        self.tuple_length
    }

    pub fn column_index(&self, name: &str) -> Option<Oid> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .map(|i| i as Oid)
    }

    /// Build the tile partitioning for this schema
    pub fn layout(&self, kind: LayoutKind) -> Result<TileLayout> {
        TileLayout::new(self, kind)
    }
}

/// How columns are grouped into tiles inside a tile group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutKind {
    /// One tile holding every column
    Row,
    /// One tile per column
    Column,
    /// Tiles of `n` consecutive columns
    Hybrid(usize),
}

impl Default for LayoutKind {
    fn default() -> Self {
        LayoutKind::Row
    }
}

/// Per-tile schemas plus the column map `column -> (tile, column in tile)`
#[derive(Debug, Clone)]
pub struct TileLayout {
    tile_schemas: Vec<Schema>,
    column_map: Vec<(usize, Oid)>,
}

impl TileLayout {
    fn new(schema: &Schema, kind: LayoutKind) -> Result<Self> {
        let per_tile = match kind {
            LayoutKind::Row => schema.column_count().max(1),
            LayoutKind::Column => 1,
            LayoutKind::Hybrid(0) => {
                return Err(StorageError::Config(
                    "Hybrid layout needs at least one column per tile".into(),
                ))
            }
            LayoutKind::Hybrid(n) => n,
        };

        let mut tile_schemas = Vec::new();
        let mut column_map = Vec::with_capacity(schema.column_count());
        for (tile_idx, chunk) in schema.columns().chunks(per_tile).enumerate() {
            for col_in_tile in 0..chunk.len() {
                column_map.push((tile_idx, col_in_tile as Oid));
            }
            tile_schemas.push(Schema::new(chunk.to_vec()));
        }

        Ok(Self {
            tile_schemas,
            column_map,
        })
    }

    pub fn tile_count(&self) -> usize {
        self.tile_schemas.len()
    }

    pub fn tile_schema(&self, tile_idx: usize) -> &Schema {
        &self.tile_schemas[tile_idx]
    }

    pub fn tile_schemas(&self) -> &[Schema] {
        &self.tile_schemas
    }

    /// Location of a full-schema column inside the tiles
    pub fn locate(&self, col_id: Oid) -> (usize, Oid) {
        self.column_map[col_id as usize]
    }
}
