//! Tile group registry
//!
//! Maps tile group ids to in-memory tile groups. The registry never owns a tile group:
//! it keeps `Weak` handles so that dropping the owning `DataTable` frees storage even if
//! an entry was not unregistered. The map is behind one short-held mutex, taken only for
//! insert/erase/lookup and never across a tuple mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::storage::TileGroup;
use crate::types::Oid;

pub struct TileGroupRegistry {
    groups: Mutex<HashMap<Oid, Weak<TileGroup>>>,
    next_tile_group_id: AtomicU32,
    next_table_id: AtomicU32,
}

impl TileGroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            next_tile_group_id: AtomicU32::new(0),
            next_table_id: AtomicU32::new(1),
        }
    }

    pub fn next_tile_group_id(&self) -> Oid {
        self.next_tile_group_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_table_id(&self) -> Oid {
        self.next_table_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, tile_group: &Arc<TileGroup>) {
        let id = tile_group.id();
        let previous = self
            .groups
            .lock()
            .expect("registry lock poisoned")
            .insert(id, Arc::downgrade(tile_group));
        debug_assert!(
            previous.map_or(true, |w| w.strong_count() == 0),
            "tile group {} registered twice",
            id
        );
        log::trace!("Registered tile group {}", id);
    }

    /// Resolve an id to a live tile group
    pub fn lookup(&self, id: Oid) -> Option<Arc<TileGroup>> {
        self.groups
            .lock()
            .expect("registry lock poisoned")
            .get(&id)
            .and_then(Weak::upgrade)
    }

    pub fn unregister(&self, id: Oid) {
        self.groups
            .lock()
            .expect("registry lock poisoned")
            .remove(&id);
        log::trace!("Unregistered tile group {}", id);
    }

    /// Number of registered entries (including ones whose table is gone)
    pub fn len(&self) -> usize {
        self.groups.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TileGroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
