//! Transaction managers
//!
//! ## Protocols
//!
//! - **Optimistic** (default): reads never touch tuple headers; write-write conflicts
//!   are detected by the ownership CAS and resolved by aborting the loser.
//! - **Pessimistic**: reads additionally take a shared read lock in the header's owner
//!   word, which keeps writers off the version until the reader finishes.
//!
//! Neither protocol ever blocks: every conflict is an immediate `false` and the caller
//! must abort the transaction.
//!
//! ### Isolation Level: Snapshot Isolation
//! - A transaction reads the state as of the last commit published before it began
//! - First updater wins: a version committed after our snapshot can't be acquired
//! - Write skew is possible

pub mod clock;
pub mod core;
pub mod optimistic;
pub mod pessimistic;
pub mod transaction;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::storage::{TileGroup, TupleHeader};
use crate::types::{Oid, TxnResult, Visibility};

pub use self::clock::CommitClock;
pub use self::core::MvccCore;
pub use self::optimistic::OptimisticTxnManager;
pub use self::pessimistic::PessimisticTxnManager;
pub use self::transaction::{TransactionContext, TxnState};

/// Transaction manager variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyProtocol {
    Optimistic,
    Pessimistic,
}

impl Default for ConcurrencyProtocol {
    fn default() -> Self {
        ConcurrencyProtocol::Optimistic
    }
}

impl fmt::Display for ConcurrencyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyProtocol::Optimistic => write!(f, "optimistic"),
            ConcurrencyProtocol::Pessimistic => write!(f, "pessimistic"),
        }
    }
}

impl std::str::FromStr for ConcurrencyProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "optimistic" | "occ" => Ok(ConcurrencyProtocol::Optimistic),
            "pessimistic" | "2pl" => Ok(ConcurrencyProtocol::Pessimistic),
            other => Err(format!("Unknown concurrency protocol '{}'", other)),
        }
    }
}

/// The MVCC protocol as seen by tables and executors
///
/// Operations address one physical slot as `(tile group, offset)`. The `perform_*`
/// methods require the caller to own the slot (or, for inserts, to have just allocated
/// it); violating that is a programming error and panics.
pub trait TransactionManager: Send + Sync {
    fn protocol(&self) -> ConcurrencyProtocol;

    fn begin_transaction(&self) -> TransactionContext;

    fn is_visible(&self, txn: &TransactionContext, header: &TupleHeader) -> Visibility;

    fn is_owner(&self, txn: &TransactionContext, header: &TupleHeader) -> bool;

    /// Could `txn` take ownership of this version right now
    fn is_ownable(&self, txn: &TransactionContext, tile_group: &TileGroup, offset: Oid) -> bool;

    /// Take exclusive ownership. On failure the transaction is marked failed and must abort.
    fn acquire_ownership(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    ) -> bool;

    /// Give back ownership acquired but not used
    fn yield_ownership(&self, txn: &TransactionContext, tile_group: &TileGroup, offset: Oid);

    /// Register a read of a visible version. `false` means the transaction must abort.
    fn perform_read(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid)
        -> bool;

    fn perform_insert(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid);

    fn perform_update(
        &self,
        txn: &mut TransactionContext,
        old_group: &TileGroup,
        old_offset: Oid,
        new_group: &TileGroup,
        new_offset: Oid,
    );

    /// Record an overwrite of the transaction's own uncommitted version
    fn perform_update_in_place(
        &self,
        txn: &mut TransactionContext,
        tile_group: &TileGroup,
        offset: Oid,
    );

    fn perform_delete(&self, txn: &mut TransactionContext, tile_group: &TileGroup, offset: Oid);

    /// Returns `Success`, or `Aborted` if the transaction had failed
    fn commit_transaction(&self, txn: TransactionContext) -> TxnResult;

    fn abort_transaction(&self, txn: TransactionContext) -> TxnResult;
}

pub fn create_transaction_manager(
    protocol: ConcurrencyProtocol,
    core: MvccCore,
) -> Arc<dyn TransactionManager> {
    match protocol {
        ConcurrencyProtocol::Optimistic => Arc::new(OptimisticTxnManager::new(core)),
        ConcurrencyProtocol::Pessimistic => Arc::new(PessimisticTxnManager::new(core)),
    }
}
