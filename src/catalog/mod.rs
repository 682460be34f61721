//! Catalog boundary: schema provider and tile group registry

pub mod registry;
pub mod schema;

pub use registry::TileGroupRegistry;
pub use schema::{Column, LayoutKind, Schema, TileLayout, ValueType};
