//! Engine configuration
//!
//! Every knob has a default, so a config file only needs the fields it changes.
//!
//! # Presets
//!
//! - [`EngineConfig::default()`] - optimistic protocol, 1000-slot tile groups, GC every 100ms
//! - [`EngineConfig::pessimistic()`] - reads take shared locks on tuple headers
//! - [`EngineConfig::small_tile_groups()`] - tiny tile groups, useful to exercise growth

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::LayoutKind;
use crate::concurrency::ConcurrencyProtocol;
use crate::error::{Result, StorageError};

/// Top-level configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which transaction manager variant to run
    pub protocol: ConcurrencyProtocol,
    /// Slots per tile group
    pub tuples_per_tile_group: usize,
    /// Upper bound on tile groups per table (0 = unlimited)
    pub max_tile_groups: usize,
    /// Column partitioning of new tile groups
    pub layout: LayoutKind,
    pub gc: GcConfig,
    pub wal: WalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: ConcurrencyProtocol::Optimistic,
            tuples_per_tile_group: 1000,
            max_tile_groups: 0,
            layout: LayoutKind::Row,
            gc: GcConfig::default(),
            wal: WalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Pessimistic reads (shared read locks in tuple headers)
    pub fn pessimistic() -> Self {
        Self {
            protocol: ConcurrencyProtocol::Pessimistic,
            ..Default::default()
        }
    }

    /// Tile groups of `tuples` slots each
    pub fn small_tile_groups(tuples: usize) -> Self {
        Self {
            tuples_per_tile_group: tuples,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tuples_per_tile_group == 0 {
            return Err(StorageError::Config(
                "tuples_per_tile_group must be greater than zero".into(),
            ));
        }
        if self.tuples_per_tile_group >= crate::types::INVALID_OID as usize {
            return Err(StorageError::Config(format!(
                "tuples_per_tile_group {} exceeds the slot id range",
                self.tuples_per_tile_group
            )));
        }
        if let LayoutKind::Hybrid(0) = self.layout {
            return Err(StorageError::Config(
                "Hybrid layout needs at least one column per tile".into(),
            ));
        }
        if self.gc.enabled && self.gc.interval_ms == 0 {
            return Err(StorageError::Config(
                "gc.interval_ms must be greater than zero when GC is enabled".into(),
            ));
        }
        if self.wal.path.is_some() && self.wal.flush_every == 0 {
            return Err(StorageError::Config(
                "wal.flush_every must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Version reclamation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Run the background GC thread
    pub enabled: bool,
    /// Interval between background sweeps (milliseconds)
    pub interval_ms: u64,
    /// Maximum slots reclaimed per sweep (0 = unlimited)
    pub batch_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 100,
            batch_size: 0,
        }
    }
}

impl GcConfig {
    /// No background thread; sweeps only happen on `Engine::collect_garbage`
    pub fn manual() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Write-ahead log sink settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// WAL file path; `None` disables logging
    pub path: Option<PathBuf>,
    /// Flush the file every N records
    pub flush_every: usize,
    /// Capacity of the channel feeding the writer thread
    pub channel_capacity: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_every: 64,
            channel_capacity: 10000,
        }
    }
}

impl WalConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}
