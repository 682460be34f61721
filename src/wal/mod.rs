//! Write-ahead log collaborator
//!
//! The transaction managers report every physical mutation to a [`LogSink`] after it is
//! applied. Emission is fire-and-forget: the core never waits on the log and never sees
//! a sink error. There is no replay; [`read_wal_file`] exists for inspection and tests.
//!
//! ### WAL Format
//! Each record is binary-encoded (bincode):
//! - 4-byte little-endian length prefix
//! - Serialized [`LogRecord`]

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::WalConfig;
use crate::error::{Result, StorageError};
use crate::types::{Cid, ItemPointer, TxnId, INVALID_CID};

/// Log sequence number
pub type Lsn = u64;

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOperation {
    /// Transaction started
    Begin,
    /// Speculative insert at `location`
    Insert { location: ItemPointer },
    /// New version `new` supersedes `old`
    Update { old: ItemPointer, new: ItemPointer },
    /// Version at `location` tombstoned
    Delete { location: ItemPointer },
    /// Transaction committed with `cid` (`INVALID_CID` for read-only transactions)
    Commit { cid: Cid },
    /// Transaction rolled back
    Abort,
}

/// A WAL log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub op: LogOperation,
    /// Unix epoch millis
    pub timestamp: u64,
}

impl LogRecord {
    pub fn is_commit(&self) -> bool {
        matches!(self.op, LogOperation::Commit { cid } if cid != INVALID_CID)
    }
}

fn timestamp() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(dur) => dur.as_millis() as u64,
        Err(_) => 0,
    }
}

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn emit(&self, txn_id: TxnId, op: LogOperation);
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn emit(&self, _txn_id: TxnId, _op: LogOperation) {}
}

/// Keeps records in memory for inspection
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    next_lsn: AtomicU64,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("log sink lock poisoned").clone()
    }

    /// Operations logged by one transaction, in order
    pub fn operations_for(&self, txn_id: TxnId) -> Vec<LogOperation> {
        self.records
            .lock()
            .expect("log sink lock poisoned")
            .iter()
            .filter(|r| r.txn_id == txn_id)
            .map(|r| r.op.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("log sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, txn_id: TxnId, op: LogOperation) {
        let mut records = self.records.lock().expect("log sink lock poisoned");
        let lsn = self.next_lsn.fetch_add(1, Ordering::Relaxed) + 1;
        records.push(LogRecord {
            lsn,
            txn_id,
            op,
            timestamp: timestamp(),
        });
    }
}

enum WalMessage {
    /// A record waiting for its LSN, which the worker assigns in file order
    Record {
        txn_id: TxnId,
        op: LogOperation,
        timestamp: u64,
    },
    Flush(mpsc::SyncSender<Result<()>>),
    Shutdown,
}

/// Appends records to a file from a background thread
pub struct WalWriter {
    path: PathBuf,
    next_lsn: Arc<AtomicU64>,
    sender: Mutex<Option<mpsc::SyncSender<WalMessage>>>,
    handle: Option<JoinHandle<()>>,
}

impl WalWriter {
    pub fn open(config: &WalConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| StorageError::Config("WAL path not configured".into()))?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::sync_channel::<WalMessage>(config.channel_capacity.max(1));
        let flush_every = config.flush_every.max(1);
        let next_lsn = Arc::new(AtomicU64::new(1));
        let worker_lsn = Arc::clone(&next_lsn);
        let worker_path = path.clone();
        let handle = thread::Builder::new()
            .name("tilestore-wal".into())
            .spawn(move || wal_worker_thread(file, rx, flush_every, worker_lsn, worker_path))?;

        log::info!("WAL writer started: {:?} (flush every {} records)", path, flush_every);

        Ok(Self {
            path,
            next_lsn,
            sender: Mutex::new(Some(tx)),
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// LSN the next record written by the worker will receive
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::Acquire)
    }

    /// Wait until every record emitted so far has been written to the file
    pub fn flush(&self) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(WalMessage::Flush(tx))?;
        rx.recv().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("WAL flush response lost: {}", e),
            ))
        })?
    }

    fn send(&self, message: WalMessage) -> Result<()> {
        // a full channel blocks only this emitter, not everyone waiting on the lock
        let sender = self
            .sender
            .lock()
            .expect("wal sender lock poisoned")
            .as_ref()
            .cloned();
        match sender {
            Some(tx) => tx.send(message).map_err(|e| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("WAL worker channel closed: {}", e),
                ))
            }),
            None => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "WAL writer is shut down",
            ))),
        }
    }

    /// Flush outstanding records and stop the worker
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.sender.lock().expect("wal sender lock poisoned").take() {
            let _ = tx.send(WalMessage::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LogSink for WalWriter {
    fn emit(&self, txn_id: TxnId, op: LogOperation) {
        let message = WalMessage::Record {
            txn_id,
            op,
            timestamp: timestamp(),
        };
        if let Err(e) = self.send(message) {
            log::warn!("Dropping WAL record for txn {}: {}", txn_id, e);
        }
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wal_worker_thread(
    mut file: File,
    rx: mpsc::Receiver<WalMessage>,
    flush_every: usize,
    next_lsn: Arc<AtomicU64>,
    path: PathBuf,
) {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut pending = 0usize;

    loop {
        match rx.recv() {
            Ok(WalMessage::Record {
                txn_id,
                op,
                timestamp,
            }) => {
                let record = LogRecord {
                    lsn: next_lsn.fetch_add(1, Ordering::AcqRel),
                    txn_id,
                    op,
                    timestamp,
                };
                match bincode::serialize(&record) {
                    Ok(encoded) => {
                        buffer.put_u32_le(encoded.len() as u32);
                        buffer.extend_from_slice(&encoded);
                        pending += 1;
                    }
                    Err(e) => log::error!("Failed to encode WAL record {}: {}", record.lsn, e),
                }
                if pending >= flush_every {
                    if let Err(e) = write_buffer(&mut file, &mut buffer) {
                        log::error!("WAL write to {:?} failed: {}", path, e);
                    }
                    pending = 0;
                }
            }
            Ok(WalMessage::Flush(responder)) => {
                let result = write_buffer(&mut file, &mut buffer);
                pending = 0;
                let _ = responder.send(result);
            }
            Ok(WalMessage::Shutdown) | Err(_) => {
                if let Err(e) = write_buffer(&mut file, &mut buffer) {
                    log::error!("Final WAL write to {:?} failed: {}", path, e);
                }
                log::info!("WAL writer shutting down");
                break;
            }
        }
    }
}

fn write_buffer(file: &mut File, buffer: &mut BytesMut) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    file.write_all(buffer)?;
    file.flush()?;
    log::debug!("WAL wrote {} bytes", buffer.len());
    buffer.clear();
    Ok(())
}

/// Decode every complete record in a WAL file. A truncated trailing frame is ignored.
pub fn read_wal_file(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let data = fs::read(path.as_ref())?;
    let mut buf = &data[..];
    let mut records = Vec::new();

    while buf.remaining() >= 4 {
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            log::warn!("Ignoring truncated WAL frame ({} of {} bytes)", buf.remaining(), len);
            break;
        }
        let record: LogRecord = bincode::deserialize(&buf[..len])?;
        records.push(record);
        buf.advance(len);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_sink_assigns_lsns() {
        let sink = MemoryLogSink::new();
        sink.emit(1, LogOperation::Begin);
        sink.emit(
            1,
            LogOperation::Insert {
                location: ItemPointer::new(0, 3),
            },
        );
        sink.emit(2, LogOperation::Abort);

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().map(|r| r.lsn).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(sink.operations_for(2), vec![LogOperation::Abort]);
    }

    #[test]
    fn test_wal_writer_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::with_path(dir.path().join("wal.log"));
        let writer = WalWriter::open(&config).unwrap();

        writer.emit(7, LogOperation::Begin);
        writer.emit(
            7,
            LogOperation::Update {
                old: ItemPointer::new(0, 0),
                new: ItemPointer::new(0, 1),
            },
        );
        writer.emit(7, LogOperation::Commit { cid: 1 });
        writer.flush().unwrap();

        let records = read_wal_file(writer.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].op, LogOperation::Begin);
        assert!(records[2].is_commit());
        assert!(records.iter().all(|r| r.txn_id == 7));
        assert_eq!(writer.next_lsn(), 4);
    }

    #[test]
    fn test_wal_writer_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let config = WalConfig {
            flush_every: 1000,
            ..WalConfig::with_path(&path)
        };
        let mut writer = WalWriter::open(&config).unwrap();
        for txn_id in 1..=10 {
            writer.emit(txn_id, LogOperation::Begin);
        }
        writer.shutdown();

        assert_eq!(read_wal_file(&path).unwrap().len(), 10);
        // emitting after shutdown is dropped, not a panic
        writer.emit(11, LogOperation::Begin);
    }

    #[test]
    fn test_wal_writer_concurrent_emitters() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::with_path(dir.path().join("wal.log"));
        let writer = Arc::new(WalWriter::open(&config).unwrap());

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for _ in 0..25 {
                        writer.emit(t + 1, LogOperation::Begin);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        writer.flush().unwrap();

        let lsns: Vec<_> = read_wal_file(writer.path())
            .unwrap()
            .into_iter()
            .map(|r| r.lsn)
            .collect();
        // file order is LSN order
        assert_eq!(lsns, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_wal_writer_full_channel() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig {
            channel_capacity: 1,
            flush_every: 7,
            ..WalConfig::with_path(dir.path().join("wal.log"))
        };
        let writer = Arc::new(WalWriter::open(&config).unwrap());

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for n in 0..50 {
                        writer.emit(t + 1, LogOperation::Commit { cid: n + 1 });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        writer.flush().unwrap();

        let records = read_wal_file(writer.path()).unwrap();
        let lsns: Vec<_> = records.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, (1..=400).collect::<Vec<_>>());
        // each emitter's records keep their emission order
        for txn_id in 1..=8 {
            let cids: Vec<_> = records
                .iter()
                .filter(|r| r.txn_id == txn_id)
                .map(|r| match r.op {
                    LogOperation::Commit { cid } => cid,
                    _ => unreachable!(),
                })
                .collect();
            assert_eq!(cids, (1..=50).collect::<Vec<_>>());
        }
        assert_eq!(writer.next_lsn(), 401);
    }

    #[test]
    fn test_read_ignores_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let record = LogRecord {
            lsn: 1,
            txn_id: 1,
            op: LogOperation::Commit { cid: 4 },
            timestamp: 0,
        };
        let encoded = bincode::serialize(&record).unwrap();
        let mut bytes = BytesMut::new();
        bytes.put_u32_le(encoded.len() as u32);
        bytes.extend_from_slice(&encoded);
        bytes.put_u32_le(100);
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, &bytes).unwrap();

        assert_eq!(read_wal_file(&path).unwrap(), vec![record]);
    }

    #[test]
    fn test_open_without_path() {
        assert!(matches!(
            WalWriter::open(&WalConfig::default()),
            Err(StorageError::Config(_))
        ));
    }
}
