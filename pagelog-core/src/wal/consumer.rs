//! Moves WAL records into the buffer pool

use super::{WalReader, WalRecord, WalWriter};
use crate::page::Page;
use crate::pool::BufferPool;
use crate::{LogsError, Lsn, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one consume pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub applied: usize,
    pub skipped: usize,
    /// LSN of the last entry consumed, applied or not
    pub last_lsn: Option<Lsn>,
}

/// Reads WAL entries and appends them to the pool with their LSN
pub struct WalConsumer<R: WalReader> {
    reader: R,
    pool: Arc<BufferPool<Page>>,
    batch_size: usize,
}

impl<R: WalReader> WalConsumer<R> {
    /// Create a new consumer
    pub fn new(reader: R, pool: Arc<BufferPool<Page>>, batch_size: usize) -> Self {
        Self {
            reader,
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Consume up to one batch of entries
    pub fn poll_once(&mut self) -> Result<ConsumeStats> {
        let mut stats = ConsumeStats::default();

        while stats.applied + stats.skipped < self.batch_size {
            let Some(entry) = self.reader.read_next()? else {
                break;
            };

            match serde_json::from_slice::<WalRecord>(&entry.payload) {
                Ok(record) => {
                    self.pool.append(entry.lsn, &record.stream, record.document);
                    stats.applied += 1;
                }
                Err(e) => {
                    warn!("Skipping undecodable WAL entry {}: {}", entry.lsn, e);
                    stats.skipped += 1;
                }
            }
            stats.last_lsn = Some(entry.lsn);
            self.reader.advance()?;
        }

        if stats.applied + stats.skipped > 0 {
            debug!(
                "Consumed {} WAL entries ({} skipped)",
                stats.applied + stats.skipped,
                stats.skipped
            );
        }
        Ok(stats)
    }

    /// Consume until the reader is exhausted
    pub fn drain(&mut self) -> Result<ConsumeStats> {
        let mut total = ConsumeStats::default();
        loop {
            let stats = self.poll_once()?;
            if stats.applied + stats.skipped == 0 {
                return Ok(total);
            }
            total.applied += stats.applied;
            total.skipped += stats.skipped;
            total.last_lsn = stats.last_lsn;
        }
    }
}

/// Encode records and append them to the WAL as one batch
pub fn ingest_records(writer: &dyn WalWriter, records: &[WalRecord]) -> Result<Lsn> {
    let payloads = records
        .iter()
        .map(|record| {
            serde_json::to_vec(record)
                .map(Bytes::from)
                .map_err(|e| LogsError::InvalidFormat(format!("Failed to encode record: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;
    writer.append_batch(payloads)
}
