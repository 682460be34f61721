//! Transaction ids, commit ids and snapshot publication
//!
//! Commit ids come from one fetch-and-add counter. A committer stages all of its header
//! writes and then publishes its cid, strictly in cid order. New snapshots read the last
//! published cid, so no snapshot can include a commit whose header writes are still in
//! flight.

use std::collections::HashMap;
use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::thread;

use crate::storage::header::MAX_OWNER_ID;
use crate::types::{Cid, TxnId, START_TXN_ID};

const SPIN_LIMIT: u32 = 64;

pub struct CommitClock {
    next_txn_id: AtomicU64,
    next_cid: AtomicU64,
    published_cid: AtomicU64,
    /// Active transactions and their snapshots
    active: RwLock<HashMap<TxnId, Cid>>,
}

impl CommitClock {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(START_TXN_ID),
            next_cid: AtomicU64::new(1),
            published_cid: AtomicU64::new(0),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a transaction id and register its snapshot
    pub fn begin(&self) -> (TxnId, Cid) {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        assert!(txn_id < MAX_OWNER_ID, "transaction id space exhausted");

        let mut active = self.active.write().expect("active txns lock poisoned");
        let snapshot = self.published_cid.load(Ordering::Acquire);
        active.insert(txn_id, snapshot);
        (txn_id, snapshot)
    }

    pub fn allocate_cid(&self) -> Cid {
        self.next_cid.fetch_add(1, Ordering::AcqRel)
    }

    /// Make `cid` visible to new snapshots once every earlier cid is published
    pub fn publish(&self, cid: Cid) {
        let mut spins = 0;
        while self.published_cid.load(Ordering::Acquire) != cid - 1 {
            if spins < SPIN_LIMIT {
                hint::spin_loop();
                spins += 1;
            } else {
                thread::yield_now();
            }
        }
        self.published_cid.store(cid, Ordering::Release);
    }

    pub fn end_transaction(&self, txn_id: TxnId) {
        self.active
            .write()
            .expect("active txns lock poisoned")
            .remove(&txn_id);
    }

    pub fn published_cid(&self) -> Cid {
        self.published_cid.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.active.read().expect("active txns lock poisoned").len()
    }

    pub fn oldest_active_snapshot(&self) -> Option<Cid> {
        self.active
            .read()
            .expect("active txns lock poisoned")
            .values()
            .copied()
            .min()
    }

    /// Highest cid no running or future transaction can read below
    pub fn safepoint(&self) -> Cid {
        let active = self.active.read().expect("active txns lock poisoned");
        let published = self.published_cid.load(Ordering::Acquire);
        active.values().copied().min().unwrap_or(published).min(published)
    }
}

impl Default for CommitClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_snapshot_and_cid() {
        let clock = CommitClock::new();
        let (txn_id, snapshot) = clock.begin();
        assert_eq!(txn_id, START_TXN_ID);
        assert_eq!(snapshot, 0);
        assert_eq!(clock.allocate_cid(), 1);
    }

    #[test]
    fn test_snapshot_follows_publication() {
        let clock = CommitClock::new();
        let cid = clock.allocate_cid();
        let (_, before) = clock.begin();
        clock.publish(cid);
        let (_, after) = clock.begin();
        assert_eq!(before, 0);
        assert_eq!(after, cid);
    }

    #[test]
    fn test_safepoint_tracks_oldest_snapshot() {
        let clock = CommitClock::new();
        let (old_txn, _) = clock.begin();
        for _ in 0..3 {
            let cid = clock.allocate_cid();
            clock.publish(cid);
        }
        assert_eq!(clock.safepoint(), 0);
        assert_eq!(clock.oldest_active_snapshot(), Some(0));

        clock.end_transaction(old_txn);
        assert_eq!(clock.safepoint(), 3);
        assert_eq!(clock.active_count(), 0);
    }

    #[test]
    fn test_out_of_order_publication_waits() {
        let clock = Arc::new(CommitClock::new());
        let first = clock.allocate_cid();
        let second = clock.allocate_cid();

        let publisher = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || clock.publish(second))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(clock.published_cid(), 0);

        clock.publish(first);
        publisher.join().unwrap();
        assert_eq!(clock.published_cid(), second);
    }
}
