use super::*;
use crate::catalog::{Column, LayoutKind, Schema, TileGroupRegistry, ValueType};
use crate::config::GcConfig;
use crate::gc::GarbageCollector;
use crate::storage::{SlotState, Tuple, Value};
use crate::types::{ItemPointer, Cid, INVALID_CID, INVALID_TXN_ID, MAX_CID};
use crate::wal::{LogOperation, MemoryLogSink};

struct Fixture {
    clock: Arc<CommitClock>,
    gc: Arc<GarbageCollector>,
    log: Arc<MemoryLogSink>,
    tg: Arc<TileGroup>,
    mgr: Arc<dyn TransactionManager>,
}

fn fixture(protocol: ConcurrencyProtocol) -> Fixture {
    let registry = Arc::new(TileGroupRegistry::new());
    let clock = Arc::new(CommitClock::new());
    let gc = Arc::new(GarbageCollector::new(Arc::clone(&registry), &GcConfig::manual()));
    let log = Arc::new(MemoryLogSink::new());

    let schema = Arc::new(Schema::new(vec![Column::new("v", ValueType::Integer)]));
    let layout = Arc::new(schema.layout(LayoutKind::Row).unwrap());
    let tg = Arc::new(TileGroup::new(registry.next_tile_group_id(), 1, schema, layout, 10));
    registry.register(&tg);

    let core = MvccCore::new(
        Arc::clone(&clock),
        registry,
        Arc::clone(&gc),
        Arc::clone(&log) as Arc<dyn crate::wal::LogSink>,
    );
    let mgr = create_transaction_manager(protocol, core);
    Fixture {
        clock,
        gc,
        log,
        tg,
        mgr,
    }
}

impl Fixture {
    fn insert(&self, txn: &mut TransactionContext, value: i32) -> Oid {
        let tuple = Tuple::from_values(Arc::clone(self.tg.schema()), &[Value::Integer(value)]).unwrap();
        let offset = self.tg.insert_tuple(&tuple).unwrap();
        self.mgr.perform_insert(txn, &self.tg, offset);
        offset
    }

    fn update(&self, txn: &mut TransactionContext, offset: Oid, value: i32) -> Oid {
        assert!(self.mgr.acquire_ownership(txn, &self.tg, offset));
        let tuple = Tuple::from_values(Arc::clone(self.tg.schema()), &[Value::Integer(value)]).unwrap();
        let new_offset = self.tg.insert_tuple(&tuple).unwrap();
        self.mgr
            .perform_update(txn, &self.tg, offset, &self.tg, new_offset);
        new_offset
    }

    fn delete(&self, txn: &mut TransactionContext, offset: Oid) {
        assert!(self.mgr.acquire_ownership(txn, &self.tg, offset));
        self.mgr.perform_delete(txn, &self.tg, offset);
    }

    /// Insert one committed row and return its slot
    fn committed_row(&self, value: i32) -> Oid {
        let mut txn = self.mgr.begin_transaction();
        let offset = self.insert(&mut txn, value);
        assert_eq!(self.mgr.commit_transaction(txn), TxnResult::Success);
        offset
    }

    fn visibility(&self, txn: &TransactionContext, offset: Oid) -> Visibility {
        self.mgr.is_visible(txn, self.tg.header(offset))
    }

    fn value(&self, offset: Oid) -> Value {
        unsafe { self.tg.copy_tuple(offset) }.get_value(0)
    }
}

/// A context that only reads, with an arbitrary snapshot
fn reader_at(snapshot: Cid) -> TransactionContext {
    TransactionContext::new(1_000_000, snapshot)
}

#[test]
fn test_insert_commit_at_cid_five() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    for i in 0..4 {
        f.committed_row(i);
    }
    assert_eq!(f.clock.published_cid(), 4);

    let mut t1 = f.mgr.begin_transaction();
    let offset = f.insert(&mut t1, 100);
    let header = f.tg.header(offset);
    assert_eq!(header.owner(), t1.txn_id());
    assert_eq!(header.begin_cid(), MAX_CID);
    assert_eq!(header.end_cid(), MAX_CID);

    let t2 = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&t2, offset), Visibility::Invisible);
    assert_eq!(f.visibility(&t1, offset), Visibility::Visible);

    assert_eq!(f.mgr.commit_transaction(t1), TxnResult::Success);
    assert_eq!(header.begin_cid(), 5);
    assert_eq!(header.end_cid(), MAX_CID);
    assert_eq!(header.owner(), INVALID_TXN_ID);

    assert_eq!(f.visibility(&reader_at(6), offset), Visibility::Visible);
    assert_eq!(f.visibility(&reader_at(3), offset), Visibility::Invisible);
    // t2's snapshot predates the commit
    assert_eq!(f.visibility(&t2, offset), Visibility::Invisible);
    f.mgr.commit_transaction(t2);
}

#[test]
fn test_update_abort_restores_old_version() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let old = f.committed_row(1);
    let begin_before = f.tg.header(old).begin_cid();

    let mut t1 = f.mgr.begin_transaction();
    let new = f.update(&mut t1, old, 2);
    assert_eq!(f.tg.header(old).next(), f.tg.location(new));
    assert_eq!(f.visibility(&t1, old), Visibility::Invisible);
    assert_eq!(f.visibility(&t1, new), Visibility::Visible);

    let other = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&other, old), Visibility::Visible);
    assert_eq!(f.visibility(&other, new), Visibility::Invisible);

    assert_eq!(f.mgr.abort_transaction(t1), TxnResult::Aborted);
    let header = f.tg.header(old);
    assert_eq!(header.begin_cid(), begin_before);
    assert_eq!(header.end_cid(), MAX_CID);
    assert!(header.next().is_null());
    assert_eq!(header.owner(), INVALID_TXN_ID);
    assert_eq!(f.tg.header(new).state(), SlotState::Free);

    let later = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&later, old), Visibility::Visible);
    assert_eq!(f.visibility(&later, new), Visibility::Invisible);
    f.mgr.commit_transaction(other);
    f.mgr.commit_transaction(later);
}

#[test]
fn test_update_commit_switches_versions() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let old = f.committed_row(1);

    let before = f.mgr.begin_transaction();
    let mut t1 = f.mgr.begin_transaction();
    let new = f.update(&mut t1, old, 2);
    assert_eq!(f.mgr.commit_transaction(t1), TxnResult::Success);

    let cid = f.clock.published_cid();
    assert_eq!(f.tg.header(old).end_cid(), cid);
    assert_eq!(f.tg.header(new).begin_cid(), cid);
    assert_eq!(f.tg.header(new).prev(), f.tg.location(old));

    assert_eq!(f.visibility(&before, old), Visibility::Visible);
    assert_eq!(f.visibility(&before, new), Visibility::Invisible);

    let after = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&after, old), Visibility::Invisible);
    assert_eq!(f.visibility(&after, new), Visibility::Visible);
    assert_eq!(f.value(new), Value::Integer(2));
    assert_eq!(f.gc.pending_count(), 1);
    f.mgr.commit_transaction(before);
    f.mgr.commit_transaction(after);
}

#[test]
fn test_delete_commit_and_abort() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let kept = f.committed_row(1);
    let gone = f.committed_row(2);
    let kept_begin = f.tg.header(kept).begin_cid();

    let mut t1 = f.mgr.begin_transaction();
    f.delete(&mut t1, kept);
    assert_eq!(f.visibility(&t1, kept), Visibility::Deleted);
    assert_eq!(f.mgr.abort_transaction(t1), TxnResult::Aborted);
    assert!(!f.tg.header(kept).is_tombstone());
    assert_eq!(f.tg.header(kept).begin_cid(), kept_begin);

    let before = f.mgr.begin_transaction();
    let mut t2 = f.mgr.begin_transaction();
    f.delete(&mut t2, gone);
    // other transactions still see the row until commit
    assert_eq!(f.visibility(&before, gone), Visibility::Visible);
    assert_eq!(f.mgr.commit_transaction(t2), TxnResult::Success);

    let after = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&before, gone), Visibility::Visible);
    assert_eq!(f.visibility(&after, gone), Visibility::Deleted);
    assert_eq!(f.visibility(&after, kept), Visibility::Visible);
    assert!(!f.tg.header(gone).is_tombstone());
    f.mgr.commit_transaction(before);
    f.mgr.commit_transaction(after);
}

#[test]
fn test_insert_then_delete_frees_slot() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let mut t1 = f.mgr.begin_transaction();
    let offset = f.insert(&mut t1, 7);
    f.mgr.perform_delete(&mut t1, &f.tg, offset);
    assert_eq!(f.visibility(&t1, offset), Visibility::Deleted);
    assert!(t1.deleted_slots().is_empty());

    assert_eq!(f.mgr.commit_transaction(t1), TxnResult::Success);
    assert_eq!(f.tg.header(offset).state(), SlotState::Free);

    let reader = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&reader, offset), Visibility::Invisible);
    f.mgr.commit_transaction(reader);

    f.gc.collect(f.clock.safepoint());
    assert_eq!(f.tg.recycled_count(), 1);
}

#[test]
fn test_update_then_delete_leaves_row_deleted() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let old = f.committed_row(1);

    let mut t1 = f.mgr.begin_transaction();
    let new = f.update(&mut t1, old, 2);
    f.mgr.perform_delete(&mut t1, &f.tg, new);
    assert_eq!(f.mgr.commit_transaction(t1), TxnResult::Success);

    let reader = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&reader, old), Visibility::Deleted);
    assert_eq!(f.visibility(&reader, new), Visibility::Invisible);
    assert!(f.tg.header(old).next().is_null());
    f.mgr.commit_transaction(reader);
}

#[test]
fn test_in_place_update_of_own_version() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let mut t1 = f.mgr.begin_transaction();
    let offset = f.insert(&mut t1, 1);
    let tuple = Tuple::from_values(Arc::clone(f.tg.schema()), &[Value::Integer(9)]).unwrap();
    unsafe { f.tg.write_tuple(offset, &tuple) };
    f.mgr.perform_update_in_place(&mut t1, &f.tg, offset);
    assert_eq!(t1.inserted_slots().len(), 1);
    assert_eq!(f.mgr.commit_transaction(t1), TxnResult::Success);
    assert_eq!(f.value(offset), Value::Integer(9));
}

#[test]
#[should_panic(expected = "without owning it")]
fn test_update_without_ownership_panics() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let old = f.committed_row(1);
    let mut t1 = f.mgr.begin_transaction();
    let new = f.tg.allocate_next_slot().unwrap();
    f.mgr.perform_update(&mut t1, &f.tg, old, &f.tg, new);
}

#[test]
fn test_write_conflict_fails_second_owner() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let row = f.committed_row(1);

    let mut t1 = f.mgr.begin_transaction();
    let mut t2 = f.mgr.begin_transaction();
    assert!(f.mgr.is_ownable(&t1, &f.tg, row));
    assert!(f.mgr.acquire_ownership(&mut t1, &f.tg, row));
    assert!(f.mgr.is_owner(&t1, f.tg.header(row)));
    assert!(!f.mgr.is_ownable(&t2, &f.tg, row));
    assert!(!f.mgr.acquire_ownership(&mut t2, &f.tg, row));
    assert_eq!(t2.result(), TxnResult::Failure);

    assert_eq!(f.mgr.commit_transaction(t2), TxnResult::Aborted);
    f.mgr.yield_ownership(&t1, &f.tg, row);
    assert_eq!(f.tg.header(row).owner(), INVALID_TXN_ID);
    assert_eq!(f.mgr.commit_transaction(t1), TxnResult::Success);
}

#[test]
fn test_first_updater_wins() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let old = f.committed_row(1);

    let mut slow = f.mgr.begin_transaction();
    let mut fast = f.mgr.begin_transaction();
    let new = f.update(&mut fast, old, 2);
    assert_eq!(f.mgr.commit_transaction(fast), TxnResult::Success);

    // the old version is superseded and the new one is beyond slow's snapshot
    assert!(!f.mgr.is_ownable(&slow, &f.tg, old));
    assert!(!f.mgr.is_ownable(&slow, &f.tg, new));
    assert!(!f.mgr.acquire_ownership(&mut slow, &f.tg, old));
    assert_eq!(f.tg.header(old).owner(), INVALID_TXN_ID);
    assert_eq!(f.mgr.commit_transaction(slow), TxnResult::Aborted);
}

#[test]
fn test_read_only_commit_allocates_no_cid() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    f.committed_row(1);
    let published = f.clock.published_cid();

    let txn = f.mgr.begin_transaction();
    let txn_id = txn.txn_id();
    assert_eq!(f.mgr.commit_transaction(txn), TxnResult::Success);
    assert_eq!(f.clock.published_cid(), published);
    assert_eq!(f.clock.active_count(), 0);
    assert_eq!(
        f.log.operations_for(txn_id),
        vec![LogOperation::Begin, LogOperation::Commit { cid: INVALID_CID }]
    );
}

#[test]
fn test_operations_are_logged_in_order() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let old = f.committed_row(1);

    let mut txn = f.mgr.begin_transaction();
    let txn_id = txn.txn_id();
    let new = f.update(&mut txn, old, 2);
    f.mgr.commit_transaction(txn);

    assert_eq!(
        f.log.operations_for(txn_id),
        vec![
            LogOperation::Begin,
            LogOperation::Update {
                old: f.tg.location(old),
                new: f.tg.location(new),
            },
            LogOperation::Commit { cid: 2 },
        ]
    );
}

#[test]
fn test_abort_returns_slot_to_gc() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    let mut t1 = f.mgr.begin_transaction();
    let offset = f.insert(&mut t1, 1);
    f.mgr.abort_transaction(t1);

    assert_eq!(f.gc.pending_count(), 1);
    f.gc.collect(f.clock.safepoint());
    assert_eq!(f.tg.recycled_count(), 1);
    assert_eq!(f.tg.header(offset).state(), SlotState::Free);
}

#[test]
fn test_pessimistic_reader_blocks_writer() {
    let f = fixture(ConcurrencyProtocol::Pessimistic);
    let row = f.committed_row(1);

    let mut reader = f.mgr.begin_transaction();
    let mut writer = f.mgr.begin_transaction();
    assert!(f.mgr.perform_read(&mut reader, &f.tg, row));
    assert_eq!(f.tg.header(row).reader_count(), 1);

    assert!(!f.mgr.is_ownable(&writer, &f.tg, row));
    assert!(!f.mgr.acquire_ownership(&mut writer, &f.tg, row));
    assert_eq!(f.mgr.commit_transaction(writer), TxnResult::Aborted);

    assert_eq!(f.mgr.commit_transaction(reader), TxnResult::Success);
    assert_eq!(f.tg.header(row).reader_count(), 0);

    let mut writer = f.mgr.begin_transaction();
    assert!(f.mgr.acquire_ownership(&mut writer, &f.tg, row));
    f.mgr.yield_ownership(&writer, &f.tg, row);
    f.mgr.commit_transaction(writer);
}

#[test]
fn test_pessimistic_writer_blocks_reader() {
    let f = fixture(ConcurrencyProtocol::Pessimistic);
    let row = f.committed_row(1);

    let mut writer = f.mgr.begin_transaction();
    let mut reader = f.mgr.begin_transaction();
    assert!(f.mgr.acquire_ownership(&mut writer, &f.tg, row));
    assert!(!f.mgr.perform_read(&mut reader, &f.tg, row));
    assert_eq!(reader.result(), TxnResult::Failure);
    assert!(f.mgr.perform_read(&mut writer, &f.tg, row));

    assert_eq!(f.mgr.abort_transaction(reader), TxnResult::Aborted);
    f.mgr.yield_ownership(&writer, &f.tg, row);
    f.mgr.commit_transaction(writer);
}

#[test]
fn test_pessimistic_upgrade_own_read_lock() {
    let f = fixture(ConcurrencyProtocol::Pessimistic);
    let old = f.committed_row(1);

    let mut txn = f.mgr.begin_transaction();
    assert!(f.mgr.perform_read(&mut txn, &f.tg, old));
    assert!(f.mgr.perform_read(&mut txn, &f.tg, old));
    assert_eq!(f.tg.header(old).reader_count(), 1);
    assert!(f.mgr.is_ownable(&txn, &f.tg, old));

    let new = f.update(&mut txn, old, 2);
    assert!(txn.read_set().is_empty());
    assert_eq!(f.tg.header(old).reader_count(), 0);
    assert_eq!(f.mgr.commit_transaction(txn), TxnResult::Success);

    let reader = f.mgr.begin_transaction();
    assert_eq!(f.visibility(&reader, new), Visibility::Visible);
    f.mgr.commit_transaction(reader);
}

#[test]
fn test_pessimistic_abort_releases_read_locks() {
    let f = fixture(ConcurrencyProtocol::Pessimistic);
    let a = f.committed_row(1);
    let b = f.committed_row(2);

    let mut txn = f.mgr.begin_transaction();
    assert!(f.mgr.perform_read(&mut txn, &f.tg, a));
    assert!(f.mgr.perform_read(&mut txn, &f.tg, b));
    f.mgr.abort_transaction(txn);
    assert_eq!(f.tg.header(a).reader_count(), 0);
    assert_eq!(f.tg.header(b).reader_count(), 0);
}

#[test]
fn test_protocol_parsing() {
    assert_eq!("OCC".parse::<ConcurrencyProtocol>(), Ok(ConcurrencyProtocol::Optimistic));
    assert_eq!(
        "pessimistic".parse::<ConcurrencyProtocol>(),
        Ok(ConcurrencyProtocol::Pessimistic)
    );
    assert!("mvto".parse::<ConcurrencyProtocol>().is_err());
    assert_eq!(ConcurrencyProtocol::Pessimistic.to_string(), "pessimistic");
    assert_eq!(
        fixture(ConcurrencyProtocol::Pessimistic).mgr.protocol(),
        ConcurrencyProtocol::Pessimistic
    );
}

#[test]
fn test_location_names_tile_group_and_offset() {
    let f = fixture(ConcurrencyProtocol::Optimistic);
    assert_eq!(f.tg.location(3), ItemPointer::new(f.tg.id(), 3));
}
