//! Page index files
//!
//! `logfile.idx` is a flat run of fixed 36-byte big-endian records, one per
//! page appended to the matching `logfile.bin`. The reader loads it once and
//! uses the time ranges to skip pages without touching their bytes.

use crate::config::INDEX_ENTRY_BYTES;
use crate::{LogsError, Result, TimeRange, Timestamp};
use bytes::{Buf, BufMut, BytesMut};
use std::path::Path;
use tracing::warn;

/// Location and summary of one page inside a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndexEntry {
    /// Byte offset of the page in the data file
    pub offset: i64,
    /// Encoded page length
    pub length: i32,
    pub ts_start: Timestamp,
    pub ts_end: Timestamp,
    pub doc_count: i32,
    /// CRC32 of the encoded page bytes
    pub crc32: u32,
}

impl PageIndexEntry {
    /// Append the 36-byte record to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(self.offset);
        buf.put_i32(self.length);
        buf.put_i64(self.ts_start);
        buf.put_i64(self.ts_end);
        buf.put_i32(self.doc_count);
        buf.put_u32(self.crc32);
    }

    /// Decode one record from exactly [`INDEX_ENTRY_BYTES`] bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < INDEX_ENTRY_BYTES {
            return Err(LogsError::TruncatedRead {
                expected: INDEX_ENTRY_BYTES,
                actual: data.len(),
            });
        }

        let entry = Self {
            offset: data.get_i64(),
            length: data.get_i32(),
            ts_start: data.get_i64(),
            ts_end: data.get_i64(),
            doc_count: data.get_i32(),
            crc32: data.get_u32(),
        };
        if entry.offset < 0 || entry.length < 0 {
            return Err(LogsError::InvalidFormat(format!(
                "Negative page location {}+{}",
                entry.offset, entry.length
            )));
        }
        Ok(entry)
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.ts_start, self.ts_end)
    }

    pub fn overlaps(&self, range: &TimeRange) -> bool {
        self.range().overlaps(range)
    }

    /// Byte range of the page in the data file
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        let start = self.offset as u64;
        start..start + self.length as u64
    }
}

/// All index entries of one partition, in write order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageIndex {
    entries: Vec<PageIndexEntry>,
}

impl PageIndex {
    /// Parse a whole index file.
    ///
    /// A torn final record (the writer died mid-append) is ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let chunks = data.chunks_exact(INDEX_ENTRY_BYTES);
        let torn = chunks.remainder().len();
        if torn > 0 {
            warn!("Ignoring {} trailing bytes of partial index entry", torn);
        }

        let entries = chunks
            .map(PageIndexEntry::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Read and parse an index file
    pub fn read_from(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    pub fn entries(&self) -> &[PageIndexEntry] {
        &self.entries
    }

    /// Entries whose time range overlaps `range`
    pub fn overlapping<'a>(
        &'a self,
        range: &'a TimeRange,
    ) -> impl Iterator<Item = &'a PageIndexEntry> + 'a {
        self.entries.iter().filter(move |e| e.overlaps(range))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total documents across all pages
    pub fn total_docs(&self) -> u64 {
        self.entries.iter().map(|e| e.doc_count.max(0) as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: i64, ts_start: i64, ts_end: i64) -> PageIndexEntry {
        PageIndexEntry {
            offset,
            length: 128,
            ts_start,
            ts_end,
            doc_count: 4,
            crc32: 0xdead_beef,
        }
    }

    #[test]
    fn test_entry_layout_is_36_bytes_big_endian() {
        let mut buf = BytesMut::new();
        entry(1, 2, 3).encode(&mut buf);
        assert_eq!(buf.len(), INDEX_ENTRY_BYTES);
        assert_eq!(&buf[0..8], &1i64.to_be_bytes());
        assert_eq!(&buf[8..12], &128i32.to_be_bytes());
        assert_eq!(&buf[32..36], &0xdead_beefu32.to_be_bytes());
        assert_eq!(PageIndexEntry::decode(&buf).unwrap(), entry(1, 2, 3));
    }

    #[test]
    fn test_parse_ignores_torn_tail() {
        let mut buf = BytesMut::new();
        entry(0, 10, 20).encode(&mut buf);
        entry(128, 30, 40).encode(&mut buf);
        buf.put_slice(&[1, 2, 3]);

        let index = PageIndex::parse(&buf).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[1].offset, 128);
        assert_eq!(index.total_docs(), 8);
    }

    #[test]
    fn test_overlapping_entries() {
        let mut buf = BytesMut::new();
        entry(0, 0, 99).encode(&mut buf);
        entry(128, 100, 199).encode(&mut buf);
        entry(256, 200, 299).encode(&mut buf);
        let index = PageIndex::parse(&buf).unwrap();

        let range = TimeRange::new(150, 200);
        let hits: Vec<_> = index.overlapping(&range).map(|e| e.offset).collect();
        assert_eq!(hits, vec![128, 256]);
    }

    #[test]
    fn test_negative_location_is_rejected() {
        let mut buf = BytesMut::new();
        entry(-5, 0, 1).encode(&mut buf);
        assert!(matches!(
            PageIndexEntry::decode(&buf),
            Err(LogsError::InvalidFormat(_))
        ));
        assert!(PageIndexEntry::decode(&buf[..10]).is_err());
    }
}
