//! Raw columnar tile storage
//!
//! A tile holds `capacity` rows of one tile schema in a single contiguous buffer. The
//! buffer is shared between threads without locks; the MVCC protocol guarantees that a
//! slot is written only while no other transaction can see it.

use std::cell::UnsafeCell;
use std::ptr;

use crate::catalog::Schema;
use crate::types::Oid;

pub struct Tile {
    schema: Schema,
    capacity: usize,
    data: Box<[UnsafeCell<u8>]>,
}

// Concurrent access is coordinated by tuple headers, see `TileGroup`.
unsafe impl Sync for Tile {}

impl Tile {
    pub fn new(schema: Schema, capacity: usize) -> Self {
        let size = schema.tuple_length() * capacity;
        let data = (0..size)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            schema,
            capacity,
            data,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the backing buffer in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn column_ptr(&self, offset: Oid, col_id: Oid) -> *mut u8 {
        assert!((offset as usize) < self.capacity, "slot {} out of range", offset);
        let start = offset as usize * self.schema.tuple_length() + self.schema.column_offset(col_id);
        UnsafeCell::raw_get(self.data[start..].as_ptr())
    }

    /// Copy `src` into column `col_id` of slot `offset`.
    ///
    /// # Safety
    /// No other thread may read or write this slot concurrently.
    pub unsafe fn write_column(&self, offset: Oid, col_id: Oid, src: &[u8]) {
        debug_assert_eq!(src.len(), self.schema.column_type(col_id).length());
        ptr::copy_nonoverlapping(src.as_ptr(), self.column_ptr(offset, col_id), src.len());
    }

    /// Copy column `col_id` of slot `offset` into `dst`.
    ///
    /// # Safety
    /// No other thread may write this slot concurrently.
    pub unsafe fn read_column(&self, offset: Oid, col_id: Oid, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.schema.column_type(col_id).length());
        ptr::copy_nonoverlapping(self.column_ptr(offset, col_id), dst.as_mut_ptr(), dst.len());
    }
}
