//! Per-transaction state

use crate::types::{Cid, ItemPointer, TxnId, TxnResult, INVALID_CID};

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    InProgress,
    Committed,
    Aborted,
}

/// In-memory transaction context
///
/// Created by `begin_transaction`, mutated only by its own calls into the transaction
/// manager and consumed by `commit_transaction` or `abort_transaction`.
#[derive(Debug)]
pub struct TransactionContext {
    txn_id: TxnId,
    /// Snapshot: every commit with cid <= this is visible
    begin_cid: Cid,
    commit_id: Cid,
    state: TxnState,
    result: TxnResult,
    /// Speculative versions created by this transaction (inserts and update targets)
    inserted_slots: Vec<ItemPointer>,
    /// Versions superseded by an update
    updated_slots: Vec<ItemPointer>,
    /// Versions tombstoned by a delete
    deleted_slots: Vec<ItemPointer>,
    /// Shared read locks held (pessimistic protocol only)
    read_set: Vec<ItemPointer>,
}

impl TransactionContext {
    pub fn new(txn_id: TxnId, begin_cid: Cid) -> Self {
        Self {
            txn_id,
            begin_cid,
            commit_id: INVALID_CID,
            state: TxnState::InProgress,
            result: TxnResult::Success,
            inserted_slots: Vec::new(),
            updated_slots: Vec::new(),
            deleted_slots: Vec::new(),
            read_set: Vec::new(),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn begin_cid(&self) -> Cid {
        self.begin_cid
    }

    /// Alias of `begin_cid`: the snapshot this transaction reads at
    pub fn snapshot(&self) -> Cid {
        self.begin_cid
    }

    pub fn commit_id(&self) -> Cid {
        self.commit_id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn result(&self) -> TxnResult {
        self.result
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == TxnState::InProgress
    }

    /// Nothing inserted, updated or deleted
    pub fn is_read_only(&self) -> bool {
        self.inserted_slots.is_empty()
            && self.updated_slots.is_empty()
            && self.deleted_slots.is_empty()
    }

    pub fn inserted_slots(&self) -> &[ItemPointer] {
        &self.inserted_slots
    }

    pub fn updated_slots(&self) -> &[ItemPointer] {
        &self.updated_slots
    }

    pub fn deleted_slots(&self) -> &[ItemPointer] {
        &self.deleted_slots
    }

    pub fn read_set(&self) -> &[ItemPointer] {
        &self.read_set
    }

    pub(crate) fn set_result(&mut self, result: TxnResult) {
        self.result = result;
    }

    pub(crate) fn set_commit_id(&mut self, cid: Cid) {
        self.commit_id = cid;
    }

    pub(crate) fn set_state(&mut self, state: TxnState) {
        self.state = state;
    }

    pub(crate) fn record_insert(&mut self, location: ItemPointer) {
        self.inserted_slots.push(location);
    }

    pub(crate) fn record_update(&mut self, old: ItemPointer) {
        self.updated_slots.push(old);
    }

    pub(crate) fn record_delete(&mut self, location: ItemPointer) {
        self.deleted_slots.push(location);
    }

    pub(crate) fn record_read(&mut self, location: ItemPointer) {
        self.read_set.push(location);
    }

    pub(crate) fn holds_read_lock(&self, location: ItemPointer) -> bool {
        self.read_set.contains(&location)
    }

    /// Forget a read lock; returns whether one was held
    pub(crate) fn forget_read(&mut self, location: ItemPointer) -> bool {
        match self.read_set.iter().position(|l| *l == location) {
            Some(idx) => {
                self.read_set.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_read_set(&mut self) -> Vec<ItemPointer> {
        std::mem::take(&mut self.read_set)
    }
}
