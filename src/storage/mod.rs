//! Tile-group storage
//!
//! ## Physical Layout
//!
//! A table is a list of tile groups. A tile group is a fixed number of slots; each slot
//! has a [`TupleHeader`] with the MVCC metadata and its column bytes spread over one or
//! more tiles according to the table's [`TileLayout`](crate::catalog::TileLayout):
//!
//! ```text
//! TileGroup 7 (capacity 4, hybrid layout)
//! ┌────────┬──────────────────┬──────────────────┐
//! │ header │ tile 0: (id, n)  │ tile 1: (name)   │
//! ├────────┼──────────────────┼──────────────────┤
//! │ slot 0 │ ...              │ ...              │
//! │ slot 1 │ ...              │ ...              │
//! │ slot 2 │ ...              │ ...              │
//! │ slot 3 │ ...              │ ...              │
//! └────────┴──────────────────┴──────────────────┘
//! ```
//!
//! A version is addressed by an [`ItemPointer`](crate::types::ItemPointer)
//! `(tile group id, offset)`. Versions of one row form a chain through the headers'
//! `next`/`prev` pointers; the chain may cross tile groups.

pub mod data_table;
pub mod header;
pub mod tile;
pub mod tile_group;
pub mod tuple;
pub mod value;

pub use data_table::DataTable;
pub use header::{OwnerWord, SlotState, TupleHeader};
pub use tile::Tile;
pub use tile_group::{TileGroup, TileGroupHeader};
pub use tuple::Tuple;
pub use value::Value;
