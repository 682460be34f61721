//! Protocol-independent MVCC machinery
//!
//! Visibility, ownership, version installation and the commit/abort finalization passes
//! live here. The optimistic and pessimistic managers wrap [`MvccCore`] and differ only
//! in how reads interact with writers.
//!
//! ## Version lifecycle
//! 1. INSERT: slot header becomes `{owner = txn, begin = MAX, end = MAX}`
//! 2. UPDATE: old version owned by txn gets `next = new`; new version is a speculative insert
//!    with `prev = old`
//! 3. DELETE: version owned by txn gets the TOMBSTONE flag; no new version is created
//! 4. COMMIT: speculative inserts get `begin = cid`; superseded and deleted versions get
//!    `end = cid`; ownership released; cid published
//! 5. ABORT: speculative inserts reset to FREE; superseded versions get `next = NULL`;
//!    tombstones cleared; ownership released

use std::sync::Arc;

use crate::catalog::TileGroupRegistry;
use crate::gc::GarbageCollector;
use crate::storage::{TileGroup, TupleHeader};
use crate::types::{ItemPointer, Oid, TxnResult, Visibility, INVALID_CID, INVALID_TXN_ID, MAX_CID};
use crate::wal::{LogOperation, LogSink};

use super::clock::CommitClock;
use super::transaction::{TransactionContext, TxnState};

pub struct MvccCore {
    clock: Arc<CommitClock>,
    registry: Arc<TileGroupRegistry>,
    gc: Arc<GarbageCollector>,
    log: Arc<dyn LogSink>,
}

impl MvccCore {
    pub fn new(
        clock: Arc<CommitClock>,
        registry: Arc<TileGroupRegistry>,
        gc: Arc<GarbageCollector>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            clock,
            registry,
            gc,
            log,
        }
    }

    pub fn clock(&self) -> &Arc<CommitClock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<TileGroupRegistry> {
        &self.registry
    }

    pub fn begin(&self) -> TransactionContext {
        let (txn_id, snapshot) = self.clock.begin();
        self.log.emit(txn_id, LogOperation::Begin);
        log::trace!("Begin txn {} at snapshot {}", txn_id, snapshot);
        TransactionContext::new(txn_id, snapshot)
    }

    pub fn is_visible(&self, txn: &TransactionContext, header: &TupleHeader) -> Visibility {
        let owner = header.owner();
        // end before begin, so a slot reclaimed mid-check reads as begin == MAX
        let (begin, end) = header.cid_window();

        if owner == txn.txn_id() {
            if begin == MAX_CID {
                // own uncommitted version
                return if header.is_tombstone() {
                    Visibility::Deleted
                } else {
                    Visibility::Visible
                };
            }
            if header.is_tombstone() {
                return Visibility::Deleted;
            }
            if !header.next().is_null() {
                // superseded by our own newer version
                return Visibility::Invisible;
            }
        }

        if begin == MAX_CID {
            // free, or somebody else's uncommitted insert
            return Visibility::Invisible;
        }

        let snapshot = txn.snapshot();
        if begin <= snapshot && snapshot < end {
            Visibility::Visible
        } else if begin <= snapshot && header.next().is_null() {
            Visibility::Deleted
        } else {
            Visibility::Invisible
        }
    }

    pub fn is_owner(&self, txn: &TransactionContext, header: &TupleHeader) -> bool {
        header.owner() == txn.txn_id()
    }

    /// Unowned (or ours), the newest committed version, and visible to our snapshot
    pub fn is_ownable(&self, txn: &TransactionContext, header: &TupleHeader) -> bool {
        let owner = header.owner();
        (owner == INVALID_TXN_ID || owner == txn.txn_id()) && Self::is_latest_committed(txn, header)
    }

    fn is_latest_committed(txn: &TransactionContext, header: &TupleHeader) -> bool {
        let (begin, end) = header.cid_window();
        end == MAX_CID
            && header.next().is_null()
            && !header.is_tombstone()
            && begin != MAX_CID
            && begin <= txn.snapshot()
    }

    pub fn acquire_ownership(&self, txn: &mut TransactionContext, header: &TupleHeader) -> bool {
        let txn_id = txn.txn_id();
        if header.owner() == txn_id {
            return true;
        }
        if !header.try_acquire(txn_id) {
            log::trace!("Txn {} lost ownership race (owner {})", txn_id, header.owner());
            txn.set_result(TxnResult::Failure);
            return false;
        }
        // the previous owner may have committed or aborted between our check and the CAS
        if !Self::is_latest_committed(txn, header) {
            header.release(txn_id);
            log::trace!("Txn {} acquired a stale version, releasing", txn_id);
            txn.set_result(TxnResult::Failure);
            return false;
        }
        true
    }

    pub fn yield_ownership(&self, txn: &TransactionContext, header: &TupleHeader) {
        let released = header.release(txn.txn_id());
        debug_assert!(released, "txn {} yielded a slot it does not own", txn.txn_id());
    }

    pub fn perform_insert(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid) {
        let location = tile_group.location(offset);
        tile_group.header(offset).init_speculative(txn.txn_id());
        txn.record_insert(location);
        self.log.emit(txn.txn_id(), LogOperation::Insert { location });
        log::trace!("Txn {} inserted {}", txn.txn_id(), location);
    }

    pub fn perform_update(
        &self,
        txn: &mut TransactionContext,
        old_group: &TileGroup,
        old_offset: Oid,
        new_group: &TileGroup,
        new_offset: Oid,
    ) {
        let txn_id = txn.txn_id();
        let old = old_group.location(old_offset);
        let new = new_group.location(new_offset);
        let old_header = old_group.header(old_offset);
        assert_eq!(old_header.owner(), txn_id, "txn {} updating {} without owning it", txn_id, old);
        assert!(old_header.next().is_null(), "{} already has a newer version", old);
        debug_assert_ne!(old_header.begin_cid(), MAX_CID);

        let new_header = new_group.header(new_offset);
        new_header.init_speculative(txn_id);
        new_header.set_prev(old);
        old_header.set_next(new);

        txn.record_update(old);
        txn.record_insert(new);
        self.log.emit(txn_id, LogOperation::Update { old, new });
        log::trace!("Txn {} updated {} -> {}", txn_id, old, new);
    }

    /// Overwrite of a version this transaction created. The caller has already written the
    /// payload; only bookkeeping happens here.
    pub fn perform_update_in_place(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) {
        let location = tile_group.location(offset);
        let header = tile_group.header(offset);
        assert_eq!(header.owner(), txn.txn_id(), "txn {} updating {} without owning it", txn.txn_id(), location);
        assert_eq!(header.begin_cid(), MAX_CID, "in-place update of committed version {}", location);
        self.log.emit(
            txn.txn_id(),
            LogOperation::Update {
                old: location,
                new: location,
            },
        );
        log::trace!("Txn {} updated {} in place", txn.txn_id(), location);
    }

    pub fn perform_delete(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid) {
        let location = tile_group.location(offset);
        let header = tile_group.header(offset);
        assert_eq!(header.owner(), txn.txn_id(), "txn {} deleting {} without owning it", txn.txn_id(), location);
        debug_assert!(!header.is_tombstone(), "{} deleted twice", location);

        header.set_tombstone(true);
        if header.begin_cid() != MAX_CID {
            // our own speculative versions are already tracked as inserts
            txn.record_delete(location);
        }
        self.log.emit(txn.txn_id(), LogOperation::Delete { location });
        log::trace!("Txn {} deleted {}", txn.txn_id(), location);
    }

    fn lookup(&self, location: ItemPointer) -> Option<Arc<TileGroup>> {
        let tile_group = self.registry.lookup(location.block);
        if tile_group.is_none() {
            log::warn!("Tile group of {} is gone, skipping", location);
        }
        tile_group
    }

    pub fn commit(&self, mut txn: TransactionContext) -> TxnResult {
        assert_eq!(txn.state(), TxnState::InProgress, "txn {} finished twice", txn.txn_id());
        if txn.result() == TxnResult::Failure {
            log::debug!("Txn {} failed to acquire ownership, aborting", txn.txn_id());
            return self.abort(txn);
        }

        let txn_id = txn.txn_id();
        if txn.is_read_only() {
            self.log.emit(txn_id, LogOperation::Commit { cid: INVALID_CID });
            self.clock.end_transaction(txn_id);
            txn.set_state(TxnState::Committed);
            log::debug!("Txn {} committed (read-only)", txn_id);
            return TxnResult::Success;
        }

        let cid = self.clock.allocate_cid();
        txn.set_commit_id(cid);
        let mut retired = Vec::new();

        for &location in txn.inserted_slots() {
            let Some(tile_group) = self.lookup(location) else { continue };
            let header = tile_group.header(location.offset);
            if header.is_tombstone() {
                // inserted and deleted by this transaction: never becomes visible
                let prev = header.prev();
                if !prev.is_null() {
                    if let Some(prev_group) = self.lookup(prev) {
                        prev_group.header(prev.offset).unlink_next(location);
                    }
                }
                tile_group.abort_inserted_tuple(location.offset);
                retired.push(location);
            } else {
                tile_group.commit_inserted_tuple(location.offset, cid);
            }
            header.release(txn_id);
        }

        for &location in txn.updated_slots() {
            let Some(tile_group) = self.lookup(location) else { continue };
            let header = tile_group.header(location.offset);
            header.set_end_cid(cid);
            header.release(txn_id);
            retired.push(location);
        }

        for &location in txn.deleted_slots() {
            let Some(tile_group) = self.lookup(location) else { continue };
            let header = tile_group.header(location.offset);
            header.set_end_cid(cid);
            header.set_tombstone(false);
            header.release(txn_id);
            retired.push(location);
        }

        self.gc.retire_all(cid, retired);
        self.clock.publish(cid);
        self.log.emit(txn_id, LogOperation::Commit { cid });
        self.clock.end_transaction(txn_id);
        txn.set_state(TxnState::Committed);
        log::debug!(
            "Txn {} committed at cid {} ({} inserted, {} updated, {} deleted)",
            txn_id,
            cid,
            txn.inserted_slots().len(),
            txn.updated_slots().len(),
            txn.deleted_slots().len()
        );
        TxnResult::Success
    }

    pub fn abort(&self, mut txn: TransactionContext) -> TxnResult {
        assert_eq!(txn.state(), TxnState::InProgress, "txn {} finished twice", txn.txn_id());
        let txn_id = txn.txn_id();

        for &location in txn.updated_slots() {
            let Some(tile_group) = self.lookup(location) else { continue };
            let header = tile_group.header(location.offset);
            header.set_next(ItemPointer::INVALID);
            header.release(txn_id);
        }

        for &location in txn.deleted_slots() {
            let Some(tile_group) = self.lookup(location) else { continue };
            let header = tile_group.header(location.offset);
            header.set_tombstone(false);
            header.release(txn_id);
        }

        let mut freed = Vec::with_capacity(txn.inserted_slots().len());
        for &location in txn.inserted_slots() {
            let Some(tile_group) = self.lookup(location) else { continue };
            tile_group.abort_inserted_tuple(location.offset);
            tile_group.header(location.offset).release(txn_id);
            freed.push(location);
        }
        self.gc.retire_all(self.clock.published_cid(), freed);

        self.log.emit(txn_id, LogOperation::Abort);
        self.clock.end_transaction(txn_id);
        txn.set_state(TxnState::Aborted);
        txn.set_result(TxnResult::Aborted);
        log::debug!("Txn {} aborted", txn_id);
        TxnResult::Aborted
    }
}
