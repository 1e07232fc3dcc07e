//! Write-ahead log contracts
//!
//! Records are made durable in a WAL before they reach the buffer pool. The
//! pool never replays anything itself: after a crash, every record past the
//! last committed LSN of a stream is read back and appended again. The
//! traits here describe what the engine needs from a WAL; the log itself is
//! provided by the embedder ([`InMemoryWal`] serves tests and tools).

mod consumer;
mod memory;

pub use consumer::{ingest_records, ConsumeStats, WalConsumer};
pub use memory::{InMemoryWal, InMemoryWalReader};

use crate::{Document, Lsn, Result, StreamKey};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One durable WAL record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub lsn: Lsn,
    pub payload: Bytes,
}

/// Appends batches of payloads
pub trait WalWriter: Send + Sync {
    /// Append all payloads atomically; returns the LSN of the last one
    fn append_batch(&self, payloads: Vec<Bytes>) -> Result<Lsn>;
}

/// Sequential WAL cursor
pub trait WalReader: Send {
    /// The entry at the cursor, without moving it
    fn read_next(&mut self) -> Result<Option<WalEntry>>;

    /// Move the cursor past the entry last returned by `read_next`
    fn advance(&mut self) -> Result<()>;
}

/// Records the highest LSN of a stream known to be durable in a partition
pub trait LsnCommitter: Send + Sync {
    fn commit(&self, key: &StreamKey, lsn: Lsn) -> Result<()>;
}

/// Payload format of log records in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub stream: StreamKey,
    pub document: Document,
}

impl WalRecord {
    /// Create a new record
    pub fn new(stream: StreamKey, document: Document) -> Self {
        Self { stream, document }
    }
}
