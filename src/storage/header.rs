//! Per-slot MVCC header
//!
//! Every field is an atomic. Loads use `Acquire`, publishing stores use `Release`, and
//! ownership changes are compare-and-swap on the packed owner word. Nothing here decides
//! visibility; the transaction managers interpret these fields.
//!
//! ## Owner word
//!
//! ```text
//! 63                                8 7        0
//! +----------------------------------+----------+
//! |        owner transaction id      |  readers |
//! +----------------------------------+----------+
//! ```
//!
//! The reader count is only used by the pessimistic manager (shared read locks).

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::types::{Cid, ItemPointer, TxnId, INVALID_TXN_ID, MAX_CID};

const READER_BITS: u32 = 8;
const READER_MASK: u64 = (1 << READER_BITS) - 1;

/// Largest transaction id that fits in the owner word
pub const MAX_OWNER_ID: TxnId = (1 << (64 - READER_BITS)) - 1;

/// Owner id the garbage collector uses to reserve a slot while resetting it
pub const GC_OWNER_ID: TxnId = MAX_OWNER_ID;

/// Maximum number of concurrent shared readers on one slot
pub const MAX_READERS: u8 = u8::MAX;

const FLAG_TOMBSTONE: u8 = 0b0000_0001;

/// Decoded owner word: exclusive owner plus shared reader count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerWord {
    pub owner: TxnId,
    pub readers: u8,
}

impl OwnerWord {
    pub const FREE: OwnerWord = OwnerWord {
        owner: INVALID_TXN_ID,
        readers: 0,
    };

    pub fn owned_by(owner: TxnId) -> Self {
        OwnerWord { owner, readers: 0 }
    }

    pub fn pack(self) -> u64 {
        debug_assert!(self.owner <= MAX_OWNER_ID, "txn id {} overflows owner word", self.owner);
        (self.owner << READER_BITS) | self.readers as u64
    }

    pub fn unpack(raw: u64) -> Self {
        OwnerWord {
            owner: raw >> READER_BITS,
            readers: (raw & READER_MASK) as u8,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owner != INVALID_TXN_ID
    }
}

/// Lifecycle state of a slot, derived from its header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never used, aborted, or reclaimed
    Free,
    /// Inserted by a running transaction
    SpeculativeInsert,
    /// Committed and the newest version
    CommittedVisible,
    /// Committed, currently owned by a writer that is updating or deleting it
    SpeculativeDeleteOrUpdate,
    /// Committed and superseded or deleted
    CommittedInvisible,
}

/// MVCC header for one tuple slot
pub struct TupleHeader {
    owner: AtomicU64,
    begin_cid: AtomicU64,
    end_cid: AtomicU64,
    next: AtomicU64,
    prev: AtomicU64,
    flags: AtomicU8,
}

impl TupleHeader {
    /// A FREE header
    pub fn new() -> Self {
        Self {
            owner: AtomicU64::new(OwnerWord::FREE.pack()),
            begin_cid: AtomicU64::new(MAX_CID),
            end_cid: AtomicU64::new(MAX_CID),
            next: AtomicU64::new(ItemPointer::INVALID.to_u64()),
            prev: AtomicU64::new(ItemPointer::INVALID.to_u64()),
            flags: AtomicU8::new(0),
        }
    }

    // ---- owner word ----

    pub fn owner_word(&self) -> OwnerWord {
        OwnerWord::unpack(self.owner.load(Ordering::Acquire))
    }

    pub fn owner(&self) -> TxnId {
        self.owner_word().owner
    }

    pub fn reader_count(&self) -> u8 {
        self.owner_word().readers
    }

    /// CAS the owner word; on failure returns the word actually found
    pub fn compare_exchange_owner(
        &self,
        current: OwnerWord,
        new: OwnerWord,
    ) -> Result<(), OwnerWord> {
        self.owner
            .compare_exchange(
                current.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(OwnerWord::unpack)
    }

    /// Take exclusive ownership of an unowned, unread slot
    pub fn try_acquire(&self, txn_id: TxnId) -> bool {
        self.compare_exchange_owner(OwnerWord::FREE, OwnerWord::owned_by(txn_id))
            .is_ok()
    }

    /// Give up ownership held by `txn_id`. A no-op if someone else holds the slot.
    pub fn release(&self, txn_id: TxnId) -> bool {
        self.compare_exchange_owner(OwnerWord::owned_by(txn_id), OwnerWord::FREE)
            .is_ok()
    }

    /// Add a shared reader; fails if a writer owns the slot or the count is saturated
    pub fn try_add_reader(&self) -> bool {
        let mut current = self.owner_word();
        loop {
            if current.is_owned() || current.readers == MAX_READERS {
                return false;
            }
            let next = OwnerWord {
                owner: INVALID_TXN_ID,
                readers: current.readers + 1,
            };
            match self.compare_exchange_owner(current, next) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn remove_reader(&self) {
        let mut current = self.owner_word();
        loop {
            debug_assert!(current.readers > 0, "reader count underflow");
            if current.readers == 0 {
                return;
            }
            let next = OwnerWord {
                owner: current.owner,
                readers: current.readers - 1,
            };
            match self.compare_exchange_owner(current, next) {
                Ok(()) => return,
                Err(actual) => current = actual,
            }
        }
    }

    // ---- timestamps ----

    pub fn begin_cid(&self) -> Cid {
        self.begin_cid.load(Ordering::Acquire)
    }

    pub fn set_begin_cid(&self, cid: Cid) {
        self.begin_cid.store(cid, Ordering::Release);
    }

    pub fn end_cid(&self) -> Cid {
        self.end_cid.load(Ordering::Acquire)
    }

    pub fn set_end_cid(&self, cid: Cid) {
        self.end_cid.store(cid, Ordering::Release);
    }

    /// `(begin_cid, end_cid)` for a visibility decision.
    ///
    /// `end` is loaded first. Writers that retire a version store `begin` before `end`,
    /// so a reader that observes a reset `end == MAX` also observes the reset
    /// `begin == MAX` and never pairs a live `end` with a reclaimed slot's old `begin`.
    pub fn cid_window(&self) -> (Cid, Cid) {
        let end = self.end_cid.load(Ordering::Acquire);
        let begin = self.begin_cid.load(Ordering::Acquire);
        (begin, end)
    }

    // ---- version chain ----

    /// Next-newer version
    pub fn next(&self) -> ItemPointer {
        ItemPointer::from_u64(self.next.load(Ordering::Acquire))
    }

    pub fn set_next(&self, location: ItemPointer) {
        self.next.store(location.to_u64(), Ordering::Release);
    }

    /// Next-older version
    pub fn prev(&self) -> ItemPointer {
        ItemPointer::from_u64(self.prev.load(Ordering::Acquire))
    }

    pub fn set_prev(&self, location: ItemPointer) {
        self.prev.store(location.to_u64(), Ordering::Release);
    }

    /// Clear `prev` only if it still points at `expected`
    pub fn unlink_prev(&self, expected: ItemPointer) -> bool {
        self.prev
            .compare_exchange(
                expected.to_u64(),
                ItemPointer::INVALID.to_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Clear `next` only if it still points at `expected`
    pub fn unlink_next(&self, expected: ItemPointer) -> bool {
        self.next
            .compare_exchange(
                expected.to_u64(),
                ItemPointer::INVALID.to_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // ---- flags ----

    pub fn is_tombstone(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_TOMBSTONE != 0
    }

    pub fn set_tombstone(&self, tombstone: bool) {
        if tombstone {
            self.flags.fetch_or(FLAG_TOMBSTONE, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!FLAG_TOMBSTONE, Ordering::AcqRel);
        }
    }

    // ---- whole-header transitions ----

    /// Speculative insert by `txn_id`: owned, begin/end = MAX, no chain links
    pub fn init_speculative(&self, txn_id: TxnId) {
        self.set_begin_cid(MAX_CID);
        self.set_end_cid(MAX_CID);
        self.set_next(ItemPointer::INVALID);
        self.set_prev(ItemPointer::INVALID);
        self.flags.store(0, Ordering::Release);
        self.owner
            .store(OwnerWord::owned_by(txn_id).pack(), Ordering::Release);
    }

    /// Reset every field except the owner word to the FREE values.
    ///
    /// `begin` must be stored before `end`; see [`TupleHeader::cid_window`].
    pub fn reset_fields(&self) {
        self.set_begin_cid(MAX_CID);
        self.set_end_cid(MAX_CID);
        self.set_next(ItemPointer::INVALID);
        self.set_prev(ItemPointer::INVALID);
        self.flags.store(0, Ordering::Release);
    }

    pub fn state(&self) -> SlotState {
        let owner = self.owner();
        let owned = owner != INVALID_TXN_ID && owner != GC_OWNER_ID;
        let (begin, end) = self.cid_window();
        match (owned, begin == MAX_CID, end == MAX_CID) {
            (false, true, _) => SlotState::Free,
            (true, true, _) => SlotState::SpeculativeInsert,
            (true, false, true) => SlotState::SpeculativeDeleteOrUpdate,
            (false, false, true) => SlotState::CommittedVisible,
            (_, false, false) => SlotState::CommittedInvisible,
        }
    }
}

impl Default for TupleHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TupleHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.owner_word();
        f.debug_struct("TupleHeader")
            .field("owner", &word.owner)
            .field("readers", &word.readers)
            .field("begin_cid", &self.begin_cid())
            .field("end_cid", &self.end_cid())
            .field("next", &self.next())
            .field("prev", &self.prev())
            .field("tombstone", &self.is_tombstone())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_owner_word_packing() {
        let word = OwnerWord {
            owner: 0x12_3456,
            readers: 7,
        };
        assert_eq!(OwnerWord::unpack(word.pack()), word);
        assert_eq!(OwnerWord::FREE.pack(), 0);
        assert_eq!(OwnerWord::unpack(OwnerWord::owned_by(MAX_OWNER_ID).pack()).owner, MAX_OWNER_ID);
    }

    #[test]
    fn test_new_header_is_free() {
        let header = TupleHeader::new();
        assert_eq!(header.state(), SlotState::Free);
        assert_eq!(header.owner(), INVALID_TXN_ID);
        assert!(header.next().is_null());
        assert!(header.prev().is_null());
        assert!(!header.is_tombstone());
    }

    #[test]
    fn test_state_transitions() {
        let header = TupleHeader::new();
        header.init_speculative(3);
        assert_eq!(header.state(), SlotState::SpeculativeInsert);

        header.set_begin_cid(5);
        assert!(header.release(3));
        assert_eq!(header.state(), SlotState::CommittedVisible);

        assert!(header.try_acquire(4));
        assert_eq!(header.state(), SlotState::SpeculativeDeleteOrUpdate);

        header.set_end_cid(9);
        assert!(header.release(4));
        assert_eq!(header.state(), SlotState::CommittedInvisible);

        header.reset_fields();
        assert_eq!(header.state(), SlotState::Free);
    }

    #[test]
    fn test_release_requires_current_owner() {
        let header = TupleHeader::new();
        assert!(header.try_acquire(10));
        assert!(!header.try_acquire(11));
        assert!(!header.release(11));
        assert_eq!(header.owner(), 10);
        assert!(header.release(10));
        assert!(header.try_acquire(11));
    }

    #[test]
    fn test_readers_block_writers() {
        let header = TupleHeader::new();
        assert!(header.try_add_reader());
        assert!(header.try_add_reader());
        assert_eq!(header.reader_count(), 2);
        assert!(!header.try_acquire(1));

        header.remove_reader();
        header.remove_reader();
        assert!(header.try_acquire(1));
        assert!(!header.try_add_reader());
    }

    #[test]
    fn test_reader_count_saturates() {
        let header = TupleHeader::new();
        for _ in 0..MAX_READERS {
            assert!(header.try_add_reader());
        }
        assert!(!header.try_add_reader());
        assert_eq!(header.reader_count(), MAX_READERS);
    }

    #[test]
    fn test_tombstone_flag() {
        let header = TupleHeader::new();
        header.set_tombstone(true);
        assert!(header.is_tombstone());
        header.set_tombstone(false);
        assert!(!header.is_tombstone());
    }

    #[test]
    fn test_cid_window_never_sees_end_ahead_of_begin() {
        // Each round stores begin before end, like `reset_fields`, so any end a reader
        // observes must be matched by a begin at least as new.
        let header = Arc::new(TupleHeader::new());
        header.set_begin_cid(0);
        header.set_end_cid(0);
        let barrier = Arc::new(Barrier::new(3));

        let writer = {
            let header = Arc::clone(&header);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for cid in 1..=200_000 {
                    header.set_begin_cid(cid);
                    header.set_end_cid(cid);
                }
            })
        };
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let header = Arc::clone(&header);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200_000 {
                        let (begin, end) = header.cid_window();
                        assert!(begin >= end, "torn window: begin {} end {}", begin, end);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(header.cid_window(), (200_000, 200_000));
    }

    #[test]
    fn test_cid_window_during_reset() {
        let header = TupleHeader::new();
        header.set_begin_cid(4);
        header.set_end_cid(9);
        // halfway through `reset_fields`
        header.set_begin_cid(MAX_CID);
        assert_eq!(header.cid_window(), (MAX_CID, 9));
        header.reset_fields();
        assert_eq!(header.cid_window(), (MAX_CID, MAX_CID));
    }

    #[test]
    fn test_unlink_is_conditional() {
        let header = TupleHeader::new();
        header.set_prev(ItemPointer::new(1, 2));
        assert!(!header.unlink_prev(ItemPointer::new(1, 3)));
        assert_eq!(header.prev(), ItemPointer::new(1, 2));
        assert!(header.unlink_prev(ItemPointer::new(1, 2)));
        assert!(header.prev().is_null());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let header = Arc::new(TupleHeader::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (1..=8u64)
            .map(|txn_id| {
                let header = Arc::clone(&header);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    header.try_acquire(txn_id)
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
