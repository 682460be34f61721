//! Core identifier types for tilestore
//!
//! Ids, sentinels, physical tuple locations and the small result enums shared by the
//! storage and concurrency layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object id: tile groups, tables and slot offsets
pub type Oid = u32;

/// Transaction ID
pub type TxnId = u64;

/// Commit ID (the total order used for snapshot decisions)
pub type Cid = u64;

pub const INVALID_OID: Oid = u32::MAX;

/// No transaction owns the slot
pub const INVALID_TXN_ID: TxnId = 0;

/// First id handed out to a real transaction
pub const START_TXN_ID: TxnId = 1;

pub const INVALID_CID: Cid = 0;

/// "Not yet" for begin timestamps, "still newest" for end timestamps
pub const MAX_CID: Cid = u64::MAX;

/// Physical location of one tuple version: (tile group id, slot offset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemPointer {
    pub block: Oid,
    pub offset: Oid,
}

impl ItemPointer {
    /// The NULL location
    pub const INVALID: ItemPointer = ItemPointer {
        block: INVALID_OID,
        offset: INVALID_OID,
    };

    pub fn new(block: Oid, offset: Oid) -> Self {
        ItemPointer { block, offset }
    }

    pub fn is_null(&self) -> bool {
        self.block == INVALID_OID
    }

    /// Pack into a single word for atomic storage in tuple headers
    pub fn to_u64(self) -> u64 {
        ((self.block as u64) << 32) | self.offset as u64
    }

    pub fn from_u64(raw: u64) -> Self {
        ItemPointer {
            block: (raw >> 32) as Oid,
            offset: raw as Oid,
        }
    }
}

impl Default for ItemPointer {
    fn default() -> Self {
        ItemPointer::INVALID
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "(null)")
        } else {
            write!(f, "({}, {})", self.block, self.offset)
        }
    }
}

/// Outcome of a visibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Invisible,
    /// The row existed for this snapshot but has been deleted
    Deleted,
    Visible,
}

/// Result reported by commit/abort and recorded on a failed ownership attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnResult {
    Success,
    Failure,
    Aborted,
}
