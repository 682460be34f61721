//! Data table: a growable list of tile groups behind the transaction manager
//!
//! The table owns its tile groups. The registry only holds weak handles so that the
//! transaction manager and the garbage collector can resolve an `ItemPointer` without
//! knowing which table it belongs to.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::catalog::{Schema, TileGroupRegistry, TileLayout};
use crate::concurrency::{TransactionContext, TransactionManager};
use crate::config::EngineConfig;
use crate::error::{Result, StorageError};
use crate::types::{ItemPointer, Oid, TxnResult, Visibility, MAX_CID};

use super::tile_group::TileGroup;
use super::tuple::Tuple;

pub struct DataTable {
    name: String,
    table_id: Oid,
    schema: Arc<Schema>,
    layout: Arc<TileLayout>,
    tuples_per_tile_group: usize,
    max_tile_groups: usize,
    tile_groups: RwLock<Vec<Arc<TileGroup>>>,
    /// Index into `tile_groups` of the last group an insert succeeded in
    last_used: AtomicUsize,
    registry: Arc<TileGroupRegistry>,
    txn_manager: Arc<dyn TransactionManager>,
}

impl DataTable {
    pub fn new(
        name: impl Into<String>,
        table_id: Oid,
        schema: Arc<Schema>,
        config: &EngineConfig,
        registry: Arc<TileGroupRegistry>,
        txn_manager: Arc<dyn TransactionManager>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = Arc::new(schema.layout(config.layout)?);
        let table = Self {
            name: name.into(),
            table_id,
            schema,
            layout,
            tuples_per_tile_group: config.tuples_per_tile_group,
            max_tile_groups: config.max_tile_groups,
            tile_groups: RwLock::new(Vec::new()),
            last_used: AtomicUsize::new(0),
            registry,
            txn_manager,
        };
        {
            let mut groups = table.tile_groups.write().expect("tile group lock poisoned");
            let first = table.new_tile_group();
            groups.push(first);
        }
        log::debug!(
            "Created table '{}' (id {}, {} slots per tile group, {} tiles)",
            table.name,
            table.table_id,
            table.tuples_per_tile_group,
            table.layout.tile_count()
        );
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
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

    pub fn tile_group_count(&self) -> usize {
        self.tile_groups.read().expect("tile group lock poisoned").len()
    }

    /// Rows whose newest committed version is live. Uncommitted inserts and deletes
    /// are not reflected until they commit.
    pub fn tuple_count(&self) -> usize {
        self.tile_groups()
            .iter()
            .map(|tg| tg.live_tuple_count())
            .sum()
    }

    /// Tile group `id` if it belongs to this table
    pub fn tile_group(&self, id: Oid) -> Option<Arc<TileGroup>> {
        self.tile_groups
            .read()
            .expect("tile group lock poisoned")
            .iter()
            .find(|tg| tg.id() == id)
            .cloned()
    }

    pub fn tile_groups(&self) -> Vec<Arc<TileGroup>> {
        self.tile_groups.read().expect("tile group lock poisoned").clone()
    }

    /// Insert a new row as a speculative version owned by `txn`
    pub fn insert_tuple(&self, txn: &mut TransactionContext, tuple: &Tuple) -> Result<ItemPointer> {
        self.check_schema(tuple)?;
        let (tile_group, offset) = self.allocate_slot(tuple)?;
        self.txn_manager.perform_insert(txn, &tile_group, offset);
        Ok(tile_group.location(offset))
    }

    /// Replace the row version at `location` and return the location of the new version.
    ///
    /// A version this transaction inserted itself is overwritten in place; anything else
    /// gets a new version linked behind the old one.
    pub fn update_tuple(
        &self,
        txn: &mut TransactionContext,
        location: ItemPointer,
        tuple: &Tuple,
    ) -> Result<ItemPointer> {
        self.check_schema(tuple)?;
        let tile_group = self.resolve(location)?;
        let offset = location.offset;
        let header = tile_group.header(offset);

        let acquired_here = if self.txn_manager.is_owner(txn, header) {
            Self::check_writable(txn, &tile_group, offset)?;
            if header.begin_cid() == MAX_CID {
                // SAFETY: the version is speculative and owned by `txn`, so it is
                // invisible to every other transaction.
                unsafe { tile_group.write_tuple(offset, tuple) };
                self.txn_manager.perform_update_in_place(txn, &tile_group, offset);
                return Ok(location);
            }
            false
        } else {
            self.take_ownership(txn, &tile_group, offset)?;
            true
        };

        let (new_group, new_offset) = match self.allocate_slot(tuple) {
            Ok(slot) => slot,
            Err(e) => {
                if acquired_here {
                    self.txn_manager.yield_ownership(txn, &tile_group, offset);
                }
                return Err(e);
            }
        };
        self.txn_manager
            .perform_update(txn, &tile_group, offset, &new_group, new_offset);
        Ok(new_group.location(new_offset))
    }

    /// Delete the row version at `location`
    pub fn delete_tuple(&self, txn: &mut TransactionContext, location: ItemPointer) -> Result<()> {
        let tile_group = self.resolve(location)?;
        let offset = location.offset;

        if self.txn_manager.is_owner(txn, tile_group.header(offset)) {
            Self::check_writable(txn, &tile_group, offset)?;
        } else {
            self.take_ownership(txn, &tile_group, offset)?;
        }
        self.txn_manager.perform_delete(txn, &tile_group, offset);
        Ok(())
    }

    /// The version at `location` if it is visible to `txn`
    pub fn get_tuple(
        &self,
        txn: &mut TransactionContext,
        location: ItemPointer,
    ) -> Result<Option<Tuple>> {
        let tile_group = self.resolve(location)?;
        self.read_visible(txn, &tile_group, location.offset)
    }

    /// Every version visible to `txn`, in physical order
    pub fn scan(&self, txn: &mut TransactionContext) -> Result<Vec<(ItemPointer, Tuple)>> {
        let mut rows = Vec::new();
        for tile_group in self.tile_groups() {
            for offset in 0..tile_group.allocated_slot_count() as Oid {
                if let Some(tuple) = self.read_visible(txn, &tile_group, offset)? {
                    rows.push((tile_group.location(offset), tuple));
                }
            }
        }
        Ok(rows)
    }

    /// Follow `next` pointers from `location` to the newest version of the row
    pub fn latest_version(&self, location: ItemPointer) -> Result<ItemPointer> {
        let chain = self.version_chain(location)?;
        Ok(chain.last().copied().unwrap_or(location))
    }

    /// `location` followed by every newer version of the same row
    pub fn version_chain(&self, location: ItemPointer) -> Result<Vec<ItemPointer>> {
        let mut chain = vec![location];
        let mut current = self.resolve(location)?.header(location.offset).next();
        while !current.is_null() {
            chain.push(current);
            current = self.resolve(current)?.header(current.offset).next();
        }
        Ok(chain)
    }

    fn read_visible(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) -> Result<Option<Tuple>> {
        if self.txn_manager.is_visible(txn, tile_group.header(offset)) != Visibility::Visible {
            return Ok(None);
        }
        if !self.txn_manager.perform_read(txn, tile_group, offset) {
            return Err(StorageError::Conflict(format!(
                "Could not read-lock tuple ({}, {})",
                tile_group.id(),
                offset
            )));
        }
        // SAFETY: the version is visible to `txn`, so it is either committed (and never
        // written again) or `txn`'s own speculative version.
        Ok(Some(unsafe { tile_group.copy_tuple(offset) }))
    }

    fn take_ownership(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) -> Result<()> {
        let location = tile_group.location(offset);
        if !self.txn_manager.is_ownable(txn, tile_group, offset) {
            log::trace!("Txn {} cannot own {}", txn.txn_id(), location);
            txn.set_result(TxnResult::Failure);
            return Err(StorageError::write_conflict(location));
        }
        if !self.txn_manager.acquire_ownership(txn, tile_group, offset) {
            return Err(StorageError::write_conflict(location));
        }
        Ok(())
    }

    /// A version the caller already owns may only be written while it is still the row's
    /// newest, undeleted version
    fn check_writable(txn: &TransactionContext, tile_group: &TileGroup, offset: Oid) -> Result<()> {
        let header = tile_group.header(offset);
        let location = tile_group.location(offset);
        if header.is_tombstone() {
            return Err(StorageError::Transaction(format!(
                "Txn {} already deleted tuple {}",
                txn.txn_id(),
                location
            )));
        }
        if !header.next().is_null() {
            return Err(StorageError::Transaction(format!(
                "Txn {} already replaced tuple {} with {}",
                txn.txn_id(),
                location,
                header.next()
            )));
        }
        Ok(())
    }

    fn check_schema(&self, tuple: &Tuple) -> Result<()> {
        if **tuple.schema() != *self.schema {
            return Err(StorageError::Type(format!(
                "Tuple schema does not match table '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Tile group of `location`, which must belong to this table
    fn resolve(&self, location: ItemPointer) -> Result<Arc<TileGroup>> {
        match self.registry.lookup(location.block) {
            Some(tg) if tg.table_id() == self.table_id && location.offset < tg.capacity() as Oid => {
                Ok(tg)
            }
            _ => Err(StorageError::TileGroupNotFound(location.block)),
        }
    }

    /// Find a slot for `tuple` and copy it in.
    ///
    /// Tries the last group that accepted an insert, then any group with reclaimed slots,
    /// then appends a new group.
    fn allocate_slot(&self, tuple: &Tuple) -> Result<(Arc<TileGroup>, Oid)> {
        {
            let groups = self.tile_groups.read().expect("tile group lock poisoned");
            let last = self.last_used.load(Ordering::Relaxed);
            if let Some(tg) = groups.get(last) {
                if let Some(offset) = tg.insert_tuple(tuple) {
                    return Ok((Arc::clone(tg), offset));
                }
            }
            for (idx, tg) in groups.iter().enumerate() {
                if idx == last || tg.recycled_count() == 0 {
                    continue;
                }
                if let Some(offset) = tg.insert_tuple(tuple) {
                    self.last_used.store(idx, Ordering::Relaxed);
                    return Ok((Arc::clone(tg), offset));
                }
            }
        }

        // other inserters may fill the group before we get to it; grow() reports
        // StorageFull once the table may not grow any further
        loop {
            let (idx, tile_group) = self.grow()?;
            if let Some(offset) = tile_group.insert_tuple(tuple) {
                self.last_used.store(idx, Ordering::Relaxed);
                return Ok((tile_group, offset));
            }
        }
    }

    /// Append a tile group unless the newest one still has room (another thread may have
    /// grown the table since we looked)
    fn grow(&self) -> Result<(usize, Arc<TileGroup>)> {
        let mut groups = self.tile_groups.write().expect("tile group lock poisoned");
        if let Some(last) = groups.last() {
            if last.has_free_slot() {
                return Ok((groups.len() - 1, Arc::clone(last)));
            }
        }
        if self.max_tile_groups > 0 && groups.len() >= self.max_tile_groups {
            return Err(StorageError::table_full(&self.name, groups.len()));
        }
        let tile_group = self.new_tile_group();
        groups.push(Arc::clone(&tile_group));
        log::debug!(
            "Table '{}' grew to {} tile groups (new id {})",
            self.name,
            groups.len(),
            tile_group.id()
        );
        Ok((groups.len() - 1, tile_group))
    }

    fn new_tile_group(&self) -> Arc<TileGroup> {
        let tile_group = Arc::new(TileGroup::new(
            self.registry.next_tile_group_id(),
            self.table_id,
            Arc::clone(&self.schema),
            Arc::clone(&self.layout),
            self.tuples_per_tile_group,
        ));
        self.registry.register(&tile_group);
        tile_group
    }
}

impl Drop for DataTable {
    fn drop(&mut self) {
        if let Ok(groups) = self.tile_groups.read() {
            for tg in groups.iter() {
                self.registry.unregister(tg.id());
            }
        }
    }
}

impl fmt::Debug for DataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTable")
            .field("name", &self.name)
            .field("table_id", &self.table_id)
            .field("tile_groups", &self.tile_group_count())
            .field("tuple_count", &self.tuple_count())
            .finish()
    }
}
