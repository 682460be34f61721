//! Version reclamation
//!
//! Commit and abort retire slots that no future snapshot can need, keyed by the commit id
//! after which they are unreachable:
//! - superseded and deleted versions at the committing transaction's cid
//! - slots freed by insert-then-delete at the committing transaction's cid
//! - aborted inserts at the last published cid
//!
//! A sweep reclaims every entry with `cid <= safepoint`, where
//! `safepoint = min(oldest active snapshot, last published cid)`. Any transaction that can
//! still see a version retired at `c` has a snapshot `< c`, which holds the safepoint back.
//!
//! Reclaiming a slot reserves it with a CAS on the owner word, unlinks it from the newer
//! version's `prev` pointer, resets it to FREE and hands the offset back to its tile group.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::catalog::TileGroupRegistry;
use crate::concurrency::CommitClock;
use crate::config::GcConfig;
use crate::storage::header::GC_OWNER_ID;
use crate::types::{Cid, ItemPointer};

/// Result of a single sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcSweepResult {
    /// Safepoint used for this sweep
    pub safepoint: Cid,
    /// Slots returned to their tile groups
    pub reclaimed: u64,
    /// Slots that were busy and stay queued for the next sweep
    pub skipped: u64,
    /// Entries dropped because their tile group no longer exists
    pub discarded: u64,
    /// Entries left in the queue after the sweep
    pub remaining: u64,
    /// Wall-clock duration of the sweep (microseconds)
    pub sweep_duration_us: u64,
}

/// Cumulative GC statistics (atomic, lock-free)
#[derive(Debug, Default)]
pub struct GcStats {
    pub total_sweeps: AtomicU64,
    pub total_reclaimed: AtomicU64,
    pub total_skipped: AtomicU64,
    pub total_discarded: AtomicU64,
    pub total_retired: AtomicU64,
    pub last_safepoint: AtomicU64,
    pub last_sweep_duration_us: AtomicU64,
}

impl GcStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sweep(&self, result: &GcSweepResult) {
        self.total_sweeps.fetch_add(1, Ordering::Relaxed);
        self.total_reclaimed
            .fetch_add(result.reclaimed, Ordering::Relaxed);
        self.total_skipped.fetch_add(result.skipped, Ordering::Relaxed);
        self.total_discarded
            .fetch_add(result.discarded, Ordering::Relaxed);
        self.last_safepoint
            .store(result.safepoint, Ordering::Relaxed);
        self.last_sweep_duration_us
            .store(result.sweep_duration_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GcStatsSnapshot {
        GcStatsSnapshot {
            total_sweeps: self.total_sweeps.load(Ordering::Relaxed),
            total_reclaimed: self.total_reclaimed.load(Ordering::Relaxed),
            total_skipped: self.total_skipped.load(Ordering::Relaxed),
            total_discarded: self.total_discarded.load(Ordering::Relaxed),
            total_retired: self.total_retired.load(Ordering::Relaxed),
            last_safepoint: self.last_safepoint.load(Ordering::Relaxed),
            last_sweep_duration_us: self.last_sweep_duration_us.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of GC statistics for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStatsSnapshot {
    pub total_sweeps: u64,
    pub total_reclaimed: u64,
    pub total_skipped: u64,
    pub total_discarded: u64,
    pub total_retired: u64,
    pub last_safepoint: Cid,
    pub last_sweep_duration_us: u64,
}

enum Reclaim {
    Done,
    Busy,
    Gone,
}

pub struct GarbageCollector {
    registry: Arc<TileGroupRegistry>,
    retired: Mutex<BTreeMap<Cid, Vec<ItemPointer>>>,
    batch_size: usize,
    stats: GcStats,
}

impl GarbageCollector {
    pub fn new(registry: Arc<TileGroupRegistry>, config: &GcConfig) -> Self {
        Self {
            registry,
            retired: Mutex::new(BTreeMap::new()),
            batch_size: config.batch_size,
            stats: GcStats::new(),
        }
    }

    /// Queue `location` for reclamation once the safepoint reaches `cid`
    pub fn retire(&self, cid: Cid, location: ItemPointer) {
        self.retire_all(cid, vec![location]);
    }

    pub fn retire_all(&self, cid: Cid, locations: Vec<ItemPointer>) {
        if locations.is_empty() {
            return;
        }
        self.stats
            .total_retired
            .fetch_add(locations.len() as u64, Ordering::Relaxed);
        self.retired
            .lock()
            .expect("gc queue lock poisoned")
            .entry(cid)
            .or_default()
            .extend(locations);
    }

    /// Entries waiting for the safepoint
    pub fn pending_count(&self) -> usize {
        self.retired
            .lock()
            .expect("gc queue lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn stats(&self) -> GcStatsSnapshot {
        self.stats.snapshot()
    }

    /// Reclaim everything retired at or before `safepoint`, oldest first
    pub fn collect(&self, safepoint: Cid) -> GcSweepResult {
        let start = Instant::now();
        let mut result = GcSweepResult {
            safepoint,
            ..Default::default()
        };

        let ready = {
            let mut retired = self.retired.lock().expect("gc queue lock poisoned");
            match safepoint.checked_add(1) {
                Some(bound) => {
                    let later = retired.split_off(&bound);
                    std::mem::replace(&mut *retired, later)
                }
                None => std::mem::take(&mut *retired),
            }
        };

        let mut requeue: Vec<(Cid, ItemPointer)> = Vec::new();
        for (cid, locations) in ready {
            for location in locations {
                if self.batch_size > 0 && result.reclaimed >= self.batch_size as u64 {
                    requeue.push((cid, location));
                    continue;
                }
                match self.reclaim(location) {
                    Reclaim::Done => result.reclaimed += 1,
                    Reclaim::Busy => {
                        result.skipped += 1;
                        requeue.push((cid, location));
                    }
                    Reclaim::Gone => result.discarded += 1,
                }
            }
        }

        {
            let mut retired = self.retired.lock().expect("gc queue lock poisoned");
            for (cid, location) in requeue {
                retired.entry(cid).or_default().push(location);
            }
            result.remaining = retired.values().map(|v| v.len() as u64).sum();
        }

        result.sweep_duration_us = start.elapsed().as_micros() as u64;
        self.stats.record_sweep(&result);
        if result.reclaimed > 0 || result.discarded > 0 {
            log::debug!(
                "GC sweep: safepoint={}, reclaimed={}, skipped={}, discarded={}, {}us",
                safepoint,
                result.reclaimed,
                result.skipped,
                result.discarded,
                result.sweep_duration_us
            );
        }
        result
    }

    fn reclaim(&self, location: ItemPointer) -> Reclaim {
        let tile_group = match self.registry.lookup(location.block) {
            Some(tg) => tg,
            None => return Reclaim::Gone,
        };
        let header = tile_group.header(location.offset);
        if !header.try_acquire(GC_OWNER_ID) {
            return Reclaim::Busy;
        }

        let next = header.next();
        if !next.is_null() {
            if let Some(next_tg) = self.registry.lookup(next.block) {
                next_tg.header(next.offset).unlink_prev(location);
            }
        }
        let prev = header.prev();
        if !prev.is_null() {
            if let Some(prev_tg) = self.registry.lookup(prev.block) {
                prev_tg.header(prev.offset).unlink_next(location);
            }
        }

        header.reset_fields();
        header.release(GC_OWNER_ID);
        tile_group.recycle_slot(location.offset);
        log::trace!("Reclaimed slot {}", location);
        Reclaim::Done
    }
}

/// Background thread that sweeps every `interval_ms`
pub struct GcRunner {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GcRunner {
    pub fn start(
        gc: Arc<GarbageCollector>,
        clock: Arc<CommitClock>,
        config: &GcConfig,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let interval = Duration::from_millis(config.interval_ms);

        let handle = thread::Builder::new()
            .name("tilestore-gc".into())
            .spawn(move || {
                log::info!("GC runner started (interval: {:?})", interval);
                let tick = interval.min(Duration::from_millis(10));
                let mut last_sweep = Instant::now();
                while !worker_shutdown.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    if last_sweep.elapsed() < interval {
                        continue;
                    }
                    gc.collect(clock.safepoint());
                    last_sweep = Instant::now();
                }
                log::info!("GC runner stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the runner to stop and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GcRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
