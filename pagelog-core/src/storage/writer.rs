//! Partition writer - persists sealed pages to hour partitions

use super::{PageIndexEntry, StorageLayoutConfig, DATA_FILE, INDEX_FILE};
use crate::page::{Page, PageCodec};
use crate::pool::{AppendOnlyPage, PageFlusher};
use crate::wal::LsnCommitter;
use crate::{LogsError, Lsn, Result, StreamKey};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Appends encoded pages to `logfile.bin` and their index records to
/// `logfile.idx` in the partition of the page's start time.
///
/// The data file is written before the index, so a crash between the two
/// leaves unreferenced bytes but never an index entry pointing nowhere.
pub struct PartitionWriter {
    layout: StorageLayoutConfig,
    committer: Option<Arc<dyn LsnCommitter>>,
    write_lock: Mutex<()>,
}

impl PartitionWriter {
    /// Create a new partition writer
    pub fn new(layout: StorageLayoutConfig) -> Self {
        Self {
            layout,
            committer: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Report each persisted page's max LSN to `committer`
    pub fn with_committer(mut self, committer: Arc<dyn LsnCommitter>) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn layout(&self) -> &StorageLayoutConfig {
        &self.layout
    }

    /// Persist one page; returns the index entry written
    pub fn write_page(&self, key: &StreamKey, page: &Page) -> Result<PageIndexEntry> {
        let range = page
            .range()
            .ok_or_else(|| LogsError::FlushFailed(format!("Refusing to write empty page for {}", key)))?;

        let bytes = PageCodec::encode(page)?;
        let bucket = self.layout.bucket_of(range.start);
        let dir = self.layout.partition_dir(key, bucket);

        let _guard = self.write_lock.lock();
        std::fs::create_dir_all(&dir)?;

        let mut data = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(DATA_FILE))?;
        let offset = data.metadata()?.len();
        data.write_all(&bytes)?;
        if self.layout.sync_writes {
            data.sync_data()?;
        }

        let entry = PageIndexEntry {
            offset: offset as i64,
            length: bytes.len() as i32,
            ts_start: range.start,
            ts_end: range.end,
            doc_count: page.doc_count() as i32,
            crc32: crc32fast::hash(&bytes),
        };
        let mut record = BytesMut::with_capacity(crate::config::INDEX_ENTRY_BYTES);
        entry.encode(&mut record);

        let mut index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(INDEX_FILE))?;
        index.write_all(&record)?;
        if self.layout.sync_writes {
            index.sync_data()?;
        }

        debug!(
            "Wrote page for {} to bucket {} at offset {} ({} bytes, {} docs)",
            key,
            bucket,
            offset,
            bytes.len(),
            entry.doc_count
        );
        Ok(entry)
    }

    fn commit(&self, key: &StreamKey, lsn: Lsn) {
        let Some(committer) = &self.committer else {
            return;
        };
        if lsn == Lsn::ZERO {
            return;
        }
        // Page is already durable; a failed commit only widens WAL replay.
        if let Err(e) = committer.commit(key, lsn) {
            warn!("Failed to commit lsn {} for {}: {}", lsn, key, e);
        }
    }
}

impl PageFlusher<Page> for PartitionWriter {
    fn flush(&self, key: &StreamKey, page: &Page) -> Result<()> {
        self.write_page(key, page)?;
        self.commit(key, page.max_lsn());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageConfig;
    use crate::storage::PageIndex;
    use crate::Document;
    use tempfile::tempdir;

    struct RecordingCommitter(Mutex<Vec<(StreamKey, Lsn)>>);

    impl LsnCommitter for RecordingCommitter {
        fn commit(&self, key: &StreamKey, lsn: Lsn) -> Result<()> {
            self.0.lock().push((key.clone(), lsn));
            Ok(())
        }
    }

    fn page_at(ts: i64, n: usize) -> Page {
        let mut page = Page::new(&PageConfig::default());
        for i in 0..n {
            page.append(Document::new(ts + i as i64, 20, format!("line {}", i)));
        }
        page
    }

    #[test]
    fn test_pages_append_to_data_and_index() {
        let dir = tempdir().unwrap();
        let layout = StorageLayoutConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let writer = PartitionWriter::new(layout.clone());
        let key = StreamKey::new("t", "s");

        let first = writer.write_page(&key, &page_at(1_000, 3)).unwrap();
        let second = writer.write_page(&key, &page_at(2_000, 5)).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, first.length as i64);

        let part = layout.partition_dir(&key, 0);
        let index = PageIndex::read_from(&part.join(INDEX_FILE)).unwrap();
        assert_eq!(index.entries(), &[first, second]);

        let data = std::fs::read(part.join(DATA_FILE)).unwrap();
        let raw = &data[second.offset as usize..][..second.length as usize];
        assert_eq!(crc32fast::hash(raw), second.crc32);
        let page = PageCodec::decode(raw).unwrap();
        assert_eq!(page.doc_count(), 5);
        assert_eq!(page.ts_start(), 2_000);
    }

    #[test]
    fn test_partition_follows_page_start() {
        let dir = tempdir().unwrap();
        let layout = StorageLayoutConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let writer = PartitionWriter::new(layout.clone());
        let key = StreamKey::new("t", "s");

        writer.write_page(&key, &page_at(3 * 3_600_000 + 5, 1)).unwrap();
        assert!(layout.partition_dir(&key, 3).join(DATA_FILE).exists());
        assert!(!layout.partition_dir(&key, 0).exists());
    }

    #[test]
    fn test_flush_commits_max_lsn() {
        let dir = tempdir().unwrap();
        let committer = Arc::new(RecordingCommitter(Mutex::new(Vec::new())));
        let writer = PartitionWriter::new(StorageLayoutConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .with_committer(committer.clone());
        let key = StreamKey::new("t", "s");

        let mut page = page_at(10, 2);
        page.update_lsn(Lsn(42));
        writer.flush(&key, &page).unwrap();

        assert_eq!(committer.0.lock().as_slice(), &[(key, Lsn(42))]);
    }

    #[test]
    fn test_empty_page_is_rejected() {
        let dir = tempdir().unwrap();
        let writer = PartitionWriter::new(StorageLayoutConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let err = writer
            .write_page(&StreamKey::new("t", "s"), &Page::new(&PageConfig::default()))
            .unwrap_err();
        assert!(matches!(err, LogsError::FlushFailed(_)));
    }
}
