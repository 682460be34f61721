//! Optimistic transaction manager
//!
//! Reads take no locks. Conflicts surface only when two writers race for the same
//! version, and the loser aborts.

use crate::storage::{TileGroup, TupleHeader};
use crate::types::{Oid, TxnResult, Visibility};

use super::core::MvccCore;
use super::transaction::TransactionContext;
use super::{ConcurrencyProtocol, TransactionManager};

pub struct OptimisticTxnManager {
    core: MvccCore,
}

impl OptimisticTxnManager {
    pub fn new(core: MvccCore) -> Self {
        Self { core }
    }
}

impl TransactionManager for OptimisticTxnManager {
    fn protocol(&self) -> ConcurrencyProtocol {
        ConcurrencyProtocol::Optimistic
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
        self.core.is_ownable(txn, tile_group.header(offset))
    }

    fn acquire_ownership(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) -> bool {
        self.core.acquire_ownership(txn, tile_group.header(offset))
    }

    fn yield_ownership(&self, txn: &TransactionContext, tile_group: &TileGroup, offset: Oid) {
        self.core.yield_ownership(txn, tile_group.header(offset))
    }

    fn perform_read(
        &self,
        _txn: &mut TransactionContext,
        _tile_group: &TileGroup,
        _offset: Oid,
    ) -> bool {
        true
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

    fn commit_transaction(&self, txn: TransactionContext) -> TxnResult {
        self.core.commit(txn)
    }

    fn abort_transaction(&self, txn: TransactionContext) -> TxnResult {
        self.core.abort(txn)
    }
}
