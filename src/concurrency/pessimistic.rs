//! Pessimistic transaction manager
//!
//! Reads take a shared lock by bumping the reader count in the version's owner word.
//! A writer can only acquire a version nobody else is reading, and a reader can't lock a
//! version a writer owns. Both sides fail immediately instead of waiting.

use crate::storage::{TileGroup, TupleHeader};
use crate::types::{ItemPointer, Oid, TxnResult, Visibility};

use super::core::MvccCore;
use super::transaction::TransactionContext;
use super::{ConcurrencyProtocol, TransactionManager};

pub struct PessimisticTxnManager {
    core: MvccCore,
}

impl PessimisticTxnManager {
    pub fn new(core: MvccCore) -> Self {
        Self { core }
    }

    fn release_read_locks(&self, txn: &mut TransactionContext) {
        for location in txn.take_read_set() {
            match self.core.registry().lookup(location.block) {
                Some(tile_group) => tile_group.header(location.offset).remove_reader(),
                None => log::warn!("Tile group of read lock {} is gone", location),
            }
        }
    }

    fn drop_own_read_lock(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid) {
        let location: ItemPointer = tile_group.location(offset);
        if txn.forget_read(location) {
            tile_group.header(offset).remove_reader();
        }
    }
}

impl TransactionManager for PessimisticTxnManager {
    fn protocol(&self) -> ConcurrencyProtocol {
        ConcurrencyProtocol::Pessimistic
    }

    fn begin_transaction(&self) -> TransactionContext {
        self.core.begin()
    }

    fn is_visible(&self, txn: &TransactionContext, header: &TupleHeader) -> Visibility {
        self.core.is_visible(txn, header)
    }

    fn is_owner(&self, txn: &TransactionContext, header: &TupleHeader) -> bool {
        self.core.is_owner(txn, header)
    }

    fn is_ownable(&self, txn: &TransactionContext, tile_group: &TileGroup, offset: Oid) -> bool {
        let header = tile_group.header(offset);
        let own_readers = txn.holds_read_lock(tile_group.location(offset)) as u8;
        header.reader_count() <= own_readers && self.core.is_ownable(txn, header)
    }

    fn acquire_ownership(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) -> bool {
        if self.core.is_owner(txn, tile_group.header(offset)) {
            return true;
        }
        self.drop_own_read_lock(txn, tile_group, offset);
        self.core.acquire_ownership(txn, tile_group.header(offset))
    }

    fn yield_ownership(&self, txn: &TransactionContext, tile_group: &TileGroup, offset: Oid) {
        self.core.yield_ownership(txn, tile_group.header(offset))
    }

    fn perform_read(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) -> bool {
        let location = tile_group.location(offset);
        let header = tile_group.header(offset);
        if self.core.is_owner(txn, header) || txn.holds_read_lock(location) {
            return true;
        }
        if header.try_add_reader() {
            txn.record_read(location);
            log::trace!("Txn {} read-locked {}", txn.txn_id(), location);
            true
        } else {
            log::trace!("Txn {} failed to read-lock {}", txn.txn_id(), location);
            txn.set_result(TxnResult::Failure);
            false
        }
    }

    fn perform_insert(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid) {
        self.core.perform_insert(txn, tile_group, offset)
    }

    fn perform_update(
        &self,
        txn: &mut TransactionContext,
        old_group: &TileGroup,
        old_offset: Oid,
        new_group: &TileGroup,
        new_offset: Oid,
    ) {
        self.core
            .perform_update(txn, old_group, old_offset, new_group, new_offset)
    }

    fn perform_update_in_place(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) {
        self.core.perform_update_in_place(txn, tile_group, offset)
    }

    fn perform_delete(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid) {
        self.core.perform_delete(txn, tile_group, offset)
    }

    fn commit_transaction(&self, mut txn: TransactionContext) -> TxnResult {
        self.release_read_locks(&mut txn);
        self.core.commit(txn)
    }

    fn abort_transaction(&self, mut txn: TransactionContext) -> TxnResult {
        self.release_read_locks(&mut txn);
        self.core.abort(txn)
    }
}
