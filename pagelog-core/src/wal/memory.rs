//! WAL kept in memory

use super::{LsnCommitter, WalEntry, WalReader, WalRecord, WalWriter};
use crate::{LogsError, Lsn, Result, StreamKey};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct WalState {
    entries: Vec<WalEntry>,
    /// Newest LSN of every stream seen in a decodable record
    heads: HashMap<StreamKey, Lsn>,
    committed: HashMap<StreamKey, Lsn>,
}

/// In-memory WAL; LSNs start at 1
#[derive(Debug, Clone, Default)]
pub struct InMemoryWal {
    state: Arc<RwLock<WalState>>,
}

impl InMemoryWal {
    /// Create an empty WAL
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor positioned at the first entry after `after`
    pub fn reader(&self, after: Lsn) -> InMemoryWalReader {
        InMemoryWalReader {
            state: self.state.clone(),
            next: after.number() as usize,
            pending: false,
        }
    }

    /// LSN of the newest entry
    pub fn last_lsn(&self) -> Lsn {
        Lsn(self.state.read().entries.len() as u64)
    }

    /// Last committed LSN of a stream
    pub fn committed(&self, key: &StreamKey) -> Lsn {
        self.state
            .read()
            .committed
            .get(key)
            .copied()
            .unwrap_or(Lsn::ZERO)
    }

    /// Position a single reader must start after so that no stream loses a
    /// record past its committed LSN. Streams with nothing uncommitted do not
    /// hold the floor back; a stream that never committed pins it to zero.
    pub fn replay_floor(&self) -> Lsn {
        let state = self.state.read();
        state
            .heads
            .iter()
            .map(|(key, head)| (state.committed.get(key).copied().unwrap_or(Lsn::ZERO), *head))
            .filter(|(committed, head)| committed < head)
            .map(|(committed, _)| committed)
            .min()
            .unwrap_or(Lsn(state.entries.len() as u64))
    }
}

impl WalWriter for InMemoryWal {
    fn append_batch(&self, payloads: Vec<Bytes>) -> Result<Lsn> {
        let mut state = self.state.write();
        for payload in payloads {
            let lsn = Lsn(state.entries.len() as u64 + 1);
            if let Ok(record) = serde_json::from_slice::<WalRecord>(&payload) {
                state.heads.insert(record.stream, lsn);
            }
            state.entries.push(WalEntry { lsn, payload });
        }
        Ok(Lsn(state.entries.len() as u64))
    }
}

impl LsnCommitter for InMemoryWal {
    fn commit(&self, key: &StreamKey, lsn: Lsn) -> Result<()> {
        let mut state = self.state.write();
        if lsn.number() > state.entries.len() as u64 {
            return Err(LogsError::Internal(format!(
                "Commit of lsn {} beyond end of log",
                lsn
            )));
        }
        let slot = state.committed.entry(key.clone()).or_insert(Lsn::ZERO);
        *slot = (*slot).max(lsn);
        Ok(())
    }
}

/// Cursor over an [`InMemoryWal`]
#[derive(Debug)]
pub struct InMemoryWalReader {
    state: Arc<RwLock<WalState>>,
    next: usize,
    pending: bool,
}

impl WalReader for InMemoryWalReader {
    fn read_next(&mut self) -> Result<Option<WalEntry>> {
        let entry = self.state.read().entries.get(self.next).cloned();
        self.pending = entry.is_some();
        Ok(entry)
    }

    fn advance(&mut self) -> Result<()> {
        if self.pending {
            self.next += 1;
            self.pending = false;
        }
        Ok(())
    }
}
