//! Tile groups: fixed-capacity row batches plus their MVCC headers
//!
//! A tile group splits every row across one or more tiles according to its
//! [`TileLayout`] and keeps one [`TupleHeader`] per slot. Slots are handed out by an
//! atomic cursor (never-used slots) or from the recycled list the garbage collector fills.
//!
//! Tuple bytes are only written while the slot is invisible to every other transaction
//! (FREE, or speculative and owned by the writer) and only read after an `Acquire` load
//! of a header that was published with `Release`.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{Schema, TileLayout};
use crate::types::{Cid, ItemPointer, Oid, MAX_CID};

use super::header::{SlotState, TupleHeader};
use super::tile::Tile;
use super::tuple::Tuple;

/// Header array and slot cursor of one tile group
pub struct TileGroupHeader {
    headers: Box<[TupleHeader]>,
    next_tuple_slot: AtomicU32,
}

impl TileGroupHeader {
    pub fn new(capacity: usize) -> Self {
        Self {
            headers: (0..capacity).map(|_| TupleHeader::new()).collect(),
            next_tuple_slot: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.headers.len()
    }

    /// Next never-used slot, or `None` once the group is exhausted
    pub fn next_empty_tuple_slot(&self) -> Option<Oid> {
        let capacity = self.capacity();
        self.next_tuple_slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slot| {
                if (slot as usize) < capacity {
                    Some(slot + 1)
                } else {
                    None
                }
            })
            .ok()
    }

    /// Number of slots ever handed out by the cursor
    pub fn allocated_slot_count(&self) -> usize {
        (self.next_tuple_slot.load(Ordering::Acquire) as usize).min(self.capacity())
    }

    pub fn tuple_header(&self, offset: Oid) -> &TupleHeader {
        &self.headers[offset as usize]
    }
}

pub struct TileGroup {
    id: Oid,
    table_id: Oid,
    schema: Arc<Schema>,
    layout: Arc<TileLayout>,
    tiles: Vec<Tile>,
    header: TileGroupHeader,
    recycled: Mutex<Vec<Oid>>,
}

impl TileGroup {
    pub fn new(
        id: Oid,
        table_id: Oid,
        schema: Arc<Schema>,
        layout: Arc<TileLayout>,
        capacity: usize,
    ) -> Self {
        let tiles = layout
            .tile_schemas()
            .iter()
            .map(|tile_schema| Tile::new(tile_schema.clone(), capacity))
            .collect();
        Self {
            id,
            table_id,
            schema,
            layout,
            tiles,
            header: TileGroupHeader::new(capacity),
            recycled: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Oid {
        self.id
    }

    pub fn table_id(&self) -> Oid {
        self.table_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn capacity(&self) -> usize {
        self.header.capacity()
    }

    pub fn tile_group_header(&self) -> &TileGroupHeader {
        &self.header
    }

    pub fn header(&self, offset: Oid) -> &TupleHeader {
        self.header.tuple_header(offset)
    }

    pub fn location(&self, offset: Oid) -> ItemPointer {
        ItemPointer::new(self.id, offset)
    }

    /// Next never-used slot (`None` = FULL)
    pub fn allocate_next_slot(&self) -> Option<Oid> {
        self.header.next_empty_tuple_slot()
    }

    pub fn allocated_slot_count(&self) -> usize {
        self.header.allocated_slot_count()
    }

    /// Copy `tuple` into a free slot, preferring reclaimed slots over fresh ones
    pub fn insert_tuple(&self, tuple: &Tuple) -> Option<Oid> {
        let offset = self
            .pop_recycled()
            .or_else(|| self.allocate_next_slot())?;
        debug_assert_eq!(self.header(offset).state(), SlotState::Free);
        // SAFETY: the slot was just taken from the cursor or the recycled list, so this
        // thread is its only user and its FREE header keeps every reader away.
        unsafe { self.write_tuple(offset, tuple) };
        Some(offset)
    }

    /// Overwrite the payload of slot `offset`.
    ///
    /// # Safety
    /// The slot must be invisible to every other transaction: FREE and exclusively held
    /// by the caller, or a speculative version owned by the caller.
    pub unsafe fn write_tuple(&self, offset: Oid, tuple: &Tuple) {
        debug_assert!(Arc::ptr_eq(tuple.schema(), &self.schema) || **tuple.schema() == *self.schema);
        for col_id in 0..self.schema.column_count() as Oid {
            let (tile_idx, tile_col) = self.layout.locate(col_id);
            self.tiles[tile_idx].write_column(offset, tile_col, tuple.column_bytes(col_id));
        }
    }

    /// Materialize slot `offset` as an owned tuple.
    ///
    /// # Safety
    /// No other transaction may be writing the slot, i.e. the caller found it visible to
    /// its own snapshot or owns it.
    pub unsafe fn copy_tuple(&self, offset: Oid) -> Tuple {
        let mut tuple = Tuple::new(Arc::clone(&self.schema));
        for col_id in 0..self.schema.column_count() as Oid {
            let (tile_idx, tile_col) = self.layout.locate(col_id);
            self.tiles[tile_idx].read_column(offset, tile_col, tuple.column_bytes_mut(col_id));
        }
        tuple
    }

    /// Make a speculative insert the newest committed version as of `cid`.
    /// `end` is settled before `begin` leaves MAX; see [`TupleHeader::cid_window`].
    pub fn commit_inserted_tuple(&self, offset: Oid, cid: Cid) {
        let header = self.header(offset);
        header.set_end_cid(MAX_CID);
        header.set_begin_cid(cid);
    }

    /// Reset a speculative insert so that it can never become visible.
    /// The owner word is left to the caller.
    pub fn abort_inserted_tuple(&self, offset: Oid) {
        self.header(offset).reset_fields();
    }

    /// Return a reclaimed slot to the allocator
    pub fn recycle_slot(&self, offset: Oid) {
        debug_assert_eq!(self.header(offset).state(), SlotState::Free);
        self.recycled
            .lock()
            .expect("recycled slot lock poisoned")
            .push(offset);
    }

    pub fn recycled_count(&self) -> usize {
        self.recycled
            .lock()
            .expect("recycled slot lock poisoned")
            .len()
    }

    fn pop_recycled(&self) -> Option<Oid> {
        self.recycled
            .lock()
            .expect("recycled slot lock poisoned")
            .pop()
    }

    /// Whether an insert into this group can still succeed
    pub fn has_free_slot(&self) -> bool {
        self.allocated_slot_count() < self.capacity() || self.recycled_count() > 0
    }

    /// Newest committed versions that have not been ended
    pub fn live_tuple_count(&self) -> usize {
        (0..self.allocated_slot_count() as Oid)
            .filter(|offset| {
                let (begin, end) = self.header(*offset).cid_window();
                begin != MAX_CID && end == MAX_CID
            })
            .count()
    }

    /// Slots that currently hold a version (anything but FREE)
    pub fn active_tuple_count(&self) -> usize {
        (0..self.allocated_slot_count() as Oid)
            .filter(|offset| self.header(*offset).state() != SlotState::Free)
            .count()
    }
}

impl fmt::Debug for TileGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileGroup")
            .field("id", &self.id)
            .field("table_id", &self.table_id)
            .field("tiles", &self.tiles.len())
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated_slot_count())
            .finish()
    }
}
