//! tilestore - multi-version tile-group storage with pluggable transaction managers
//!
//! Architecture Overview:
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Executors / callers                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DataTable                              │
//! │   (slot routing, update/delete decisions, scans)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transaction Manager                         │
//! │   (optimistic | pessimistic, commit clock, WAL records)     │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌──────────────────────────┐ ┌────────────────────────────────┐
//! │   Tile groups + headers  │ │   Garbage collector            │
//! │  (versions, ownership)   │ │  (safepoint slot reclamation)  │
//! └──────────────────────────┘ └────────────────────────────────┘
//!
//! Everything is wired together by [`Engine`]; there are no global singletons.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod gc;
pub mod storage;
pub mod types;
pub mod wal;

pub use crate::catalog::{Column, LayoutKind, Schema, TileGroupRegistry, ValueType};
pub use crate::concurrency::{
    CommitClock, ConcurrencyProtocol, TransactionContext, TransactionManager, TxnState,
};
pub use crate::config::{EngineConfig, GcConfig, WalConfig};
pub use crate::error::{Result, StorageError};
pub use crate::gc::{GarbageCollector, GcStatsSnapshot, GcSweepResult};
pub use crate::storage::{DataTable, TileGroup, Tuple, Value};
pub use crate::types::{ItemPointer, TxnResult, Visibility};

use crate::concurrency::{create_transaction_manager, MvccCore};
use crate::gc::GcRunner;
use crate::wal::{LogSink, NullLogSink, WalWriter};

/// One storage engine instance: registry, clock, transaction manager, GC and tables
pub struct Engine {
    config: EngineConfig,
    registry: Arc<TileGroupRegistry>,
    clock: Arc<CommitClock>,
    gc: Arc<GarbageCollector>,
    txn_manager: Arc<dyn TransactionManager>,
    wal: Option<Arc<WalWriter>>,
    tables: RwLock<HashMap<String, Arc<DataTable>>>,
    gc_runner: Mutex<Option<GcRunner>>,
}

impl Engine {
    /// Build an engine. Opens the WAL if `config.wal.path` is set and starts the GC thread
    /// if `config.gc.enabled`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        match config.wal.path {
            Some(_) => {
                let wal = Arc::new(WalWriter::open(&config.wal)?);
                let sink: Arc<dyn LogSink> = Arc::clone(&wal) as Arc<dyn LogSink>;
                Self::build(config, sink, Some(wal))
            }
            None => Self::build(config, Arc::new(NullLogSink), None),
        }
    }

    /// Build an engine that sends log records to `sink` instead of the configured WAL
    pub fn with_log_sink(config: EngineConfig, sink: Arc<dyn LogSink>) -> Result<Self> {
        config.validate()?;
        Self::build(config, sink, None)
    }

    fn build(
        config: EngineConfig,
        sink: Arc<dyn LogSink>,
        wal: Option<Arc<WalWriter>>,
    ) -> Result<Self> {
        let registry = Arc::new(TileGroupRegistry::new());
        let clock = Arc::new(CommitClock::new());
        let gc = Arc::new(GarbageCollector::new(Arc::clone(&registry), &config.gc));
        let core = MvccCore::new(
            Arc::clone(&clock),
            Arc::clone(&registry),
            Arc::clone(&gc),
            sink,
        );
        let txn_manager = create_transaction_manager(config.protocol, core);

        let gc_runner = if config.gc.enabled {
            Some(GcRunner::start(Arc::clone(&gc), Arc::clone(&clock), &config.gc)?)
        } else {
            None
        };

        log::info!(
            "Engine started: protocol={}, tuples_per_tile_group={}, layout={:?}, gc={}",
            config.protocol,
            config.tuples_per_tile_group,
            config.layout,
            if config.gc.enabled { "background" } else { "manual" }
        );

        Ok(Self {
            config,
            registry,
            clock,
            gc,
            txn_manager,
            wal,
            tables: RwLock::new(HashMap::new()),
            gc_runner: Mutex::new(gc_runner),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TileGroupRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<CommitClock> {
        &self.clock
    }

    pub fn txn_manager(&self) -> &Arc<dyn TransactionManager> {
        &self.txn_manager
    }

    pub fn garbage_collector(&self) -> &Arc<GarbageCollector> {
        &self.gc
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<DataTable>> {
        let mut tables = self.tables.write().expect("table map lock poisoned");
        if tables.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        let table = Arc::new(DataTable::new(
            name,
            self.registry.next_table_id(),
            Arc::new(schema),
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.txn_manager),
        )?);
        tables.insert(name.to_string(), Arc::clone(&table));
        log::info!("Created table '{}'", name);
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Result<Arc<DataTable>> {
        self.tables
            .read()
            .expect("table map lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    /// Remove a table. Its tile groups go away once the last handle to it is dropped.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .write()
            .expect("table map lock poisoned")
            .remove(name)
            .map(|_| log::info!("Dropped table '{}'", name))
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .expect("table map lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn begin(&self) -> TransactionContext {
        self.txn_manager.begin_transaction()
    }

    pub fn commit(&self, txn: TransactionContext) -> TxnResult {
        self.txn_manager.commit_transaction(txn)
    }

    pub fn abort(&self, txn: TransactionContext) -> TxnResult {
        self.txn_manager.abort_transaction(txn)
    }

    /// Run one GC sweep at the current safepoint
    pub fn collect_garbage(&self) -> GcSweepResult {
        self.gc.collect(self.clock.safepoint())
    }

    pub fn gc_stats(&self) -> GcStatsSnapshot {
        self.gc.stats()
    }

    /// Block until every log record emitted so far is on disk (no-op without a WAL)
    pub fn flush_wal(&self) -> Result<()> {
        match &self.wal {
            Some(wal) => wal.flush(),
            None => Ok(()),
        }
    }

    /// Stop the background GC thread, if any
    pub fn stop_gc(&self) {
        if let Some(mut runner) = self.gc_runner.lock().expect("gc runner lock poisoned").take() {
            runner.stop();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_gc();
        if let Err(e) = self.flush_wal() {
            log::warn!("Final WAL flush failed: {}", e);
        }
    }
}
