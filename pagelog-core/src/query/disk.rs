//! Local partition tier

use super::{FilterEvaluator, LogQuery, QueryProcessor, ScanConfig};
use crate::page::{Page, PageCodec};
use crate::storage::{PageIndex, PageIndexEntry, StorageLayoutConfig, DATA_FILE, INDEX_FILE};
use crate::{Document, LogsError, Result};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Counters shared by the disk and object-store tiers
#[derive(Debug, Default)]
pub struct ScanStats {
    index_entries_loaded: AtomicU64,
    index_cache_hits: AtomicU64,
    index_cache_misses: AtomicU64,
    pages_skipped: AtomicU64,
    pages_decoded: AtomicU64,
    corrupt_pages: AtomicU64,
    bytes_read: AtomicU64,
}

/// Point-in-time copy of [`ScanStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatsSnapshot {
    pub index_entries_loaded: u64,
    pub index_cache_hits: u64,
    pub index_cache_misses: u64,
    pub pages_skipped: u64,
    pub pages_decoded: u64,
    pub corrupt_pages: u64,
    pub bytes_read: u64,
}

impl ScanStats {
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            index_entries_loaded: self.index_entries_loaded.load(Ordering::Relaxed),
            index_cache_hits: self.index_cache_hits.load(Ordering::Relaxed),
            index_cache_misses: self.index_cache_misses.load(Ordering::Relaxed),
            pages_skipped: self.pages_skipped.load(Ordering::Relaxed),
            pages_decoded: self.pages_decoded.load(Ordering::Relaxed),
            corrupt_pages: self.corrupt_pages.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn index_loaded(&self, entries: usize) {
        self.index_entries_loaded
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub(crate) fn page_skipped(&self) {
        self.pages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn page_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn page_corrupt(&self) {
        self.corrupt_pages.fetch_add(1, Ordering::Relaxed);
    }

    /// Verify and decode one page, counting the attempt
    pub(crate) fn decode_page(&self, entry: &PageIndexEntry, bytes: &[u8]) -> Result<Page> {
        self.pages_decoded.fetch_add(1, Ordering::Relaxed);
        let actual = crc32fast::hash(bytes);
        if actual != entry.crc32 {
            return Err(LogsError::Integrity {
                expected: entry.crc32,
                actual,
            });
        }
        PageCodec::decode(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexCacheKey {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

/// Answers queries from hour partitions under the data directory
#[derive(Clone)]
pub struct OnDiskQueryProcessor {
    layout: StorageLayoutConfig,
    index_cache: Arc<Mutex<LruCache<IndexCacheKey, Arc<PageIndex>>>>,
    stats: Arc<ScanStats>,
}

impl OnDiskQueryProcessor {
    /// Create a new on-disk query processor
    pub fn new(layout: StorageLayoutConfig, scan: &ScanConfig) -> Self {
        let capacity = NonZeroUsize::new(scan.index_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            layout,
            index_cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            stats: Arc::new(ScanStats::default()),
        }
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        self.stats.snapshot()
    }

    /// Blocking scan of every partition overlapping the query
    pub fn scan(&self, query: &LogQuery) -> Result<Vec<Document>> {
        query.validate()?;
        let mut out = Vec::new();

        for (bucket, dir) in self.partitions(query)? {
            let Some(index) = self.load_index(&dir.join(INDEX_FILE))? else {
                continue;
            };
            self.stats.index_loaded(index.len());

            match self.scan_partition(&dir, &index, query, &mut out) {
                Ok(()) => {}
                Err(e) if e.is_missing() => {
                    warn!("Partition {}/{} has an index but no data file", query.stream, bucket);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn scan_partition(
        &self,
        dir: &Path,
        index: &PageIndex,
        query: &LogQuery,
        out: &mut Vec<Document>,
    ) -> Result<()> {
        let mut data: Option<File> = None;

        for entry in index.entries() {
            if !entry.overlaps(&query.range) {
                self.stats.page_skipped();
                continue;
            }

            if data.is_none() {
                data = Some(File::open(dir.join(DATA_FILE))?);
            }
            let Some(file) = data.as_mut() else {
                continue;
            };
            let bytes = read_page(file, entry)?;
            self.stats.page_read(bytes.len());

            match self.stats.decode_page(entry, &bytes) {
                Ok(page) => out.extend(FilterEvaluator::apply(&page, &query.filter)),
                Err(e) if e.is_corruption() => {
                    self.stats.page_corrupt();
                    warn!(
                        "Skipping corrupt page at {}:{}: {}",
                        dir.display(),
                        entry.offset,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Existing partition directories in the query range, oldest first
    fn partitions(&self, query: &LogQuery) -> Result<Vec<(i64, PathBuf)>> {
        let base = self.layout.stream_dir(&query.stream);
        let entries = match std::fs::read_dir(&base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let first = self.layout.bucket_of(query.range.start);
        let last = self.layout.bucket_of(query.range.end);
        let mut partitions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(bucket) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            else {
                continue;
            };
            if bucket >= first && bucket <= last {
                partitions.push((bucket, entry.path()));
            }
        }
        partitions.sort_by_key(|(bucket, _)| *bucket);
        Ok(partitions)
    }

    fn load_index(&self, path: &Path) -> Result<Option<Arc<PageIndex>>> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key = IndexCacheKey {
            path: path.to_path_buf(),
            len: meta.len(),
            modified: meta.modified().ok(),
        };

        if let Some(index) = self.index_cache.lock().get(&key) {
            self.stats.index_cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(index.clone()));
        }
        self.stats.index_cache_misses.fetch_add(1, Ordering::Relaxed);

        let index = Arc::new(PageIndex::read_from(path)?);
        debug!("Loaded {} index entries from {}", index.len(), path.display());
        self.index_cache.lock().put(key, index.clone());
        Ok(Some(index))
    }
}

fn read_page(file: &mut File, entry: &PageIndexEntry) -> Result<Vec<u8>> {
    let range = entry.byte_range();
    let file_len = file.metadata()?.len();
    if range.end > file_len {
        return Err(LogsError::TruncatedRead {
            expected: entry.length as usize,
            actual: file_len.saturating_sub(range.start) as usize,
        });
    }

    let mut buf = vec![0u8; entry.length as usize];
    file.seek(SeekFrom::Start(range.start))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[async_trait]
impl QueryProcessor for OnDiskQueryProcessor {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Document>> {
        let this = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || this.scan(&query))
            .await
            .map_err(|e| LogsError::Internal(format!("Disk scan task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageConfig;
    use crate::query::Filter;
    use crate::storage::PartitionWriter;
    use crate::StreamKey;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    const HOUR: i64 = 3_600_000;

    struct Fixture {
        _dir: TempDir,
        layout: StorageLayoutConfig,
        writer: PartitionWriter,
        key: StreamKey,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let layout = StorageLayoutConfig {
                data_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            Self {
                writer: PartitionWriter::new(layout.clone()),
                layout,
                key: StreamKey::new("acme", "api"),
                _dir: dir,
            }
        }

        fn write(&self, start: i64, bodies: &[(i32, &str)]) -> PageIndexEntry {
            let mut page = Page::new(&PageConfig::default());
            for (i, (level, body)) in bodies.iter().enumerate() {
                page.append(Document::new(start + i as i64, *level, *body));
            }
            self.writer.write_page(&self.key, &page).unwrap()
        }

        fn processor(&self) -> OnDiskQueryProcessor {
            OnDiskQueryProcessor::new(self.layout.clone(), &ScanConfig::default())
        }

        fn query(&self, start: i64, end: i64, filter: Filter) -> LogQuery {
            LogQuery::new(self.key.clone(), start, end, filter)
        }
    }

    #[tokio::test]
    async fn test_reads_matching_docs_across_partitions() {
        let fx = Fixture::new();
        fx.write(10, &[(30, "disk full"), (20, "ok")]);
        fx.write(HOUR + 10, &[(30, "disk still full")]);
        fx.write(2 * HOUR + 10, &[(30, "outside")]);

        let processor = fx.processor();
        let docs = processor
            .get_logs(&fx.query(0, HOUR + 100, Filter::level(30)))
            .await
            .unwrap();
        let bodies: Vec<_> = docs.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["disk full", "disk still full"]);
    }

    #[test]
    fn test_never_decodes_pages_outside_range() {
        let fx = Fixture::new();
        fx.write(0, &[(20, "a")]);
        fx.write(1_000, &[(20, "b")]);
        fx.write(2_000, &[(20, "c")]);
        fx.write(3_000, &[(20, "d")]);

        let processor = fx.processor();
        let docs = processor
            .scan(&fx.query(900, 2_100, Filter::level(20)))
            .unwrap();
        assert_eq!(docs.len(), 2);

        let stats = processor.stats();
        assert_eq!(stats.index_entries_loaded, 4);
        assert_eq!(stats.pages_decoded, 2);
        assert_eq!(stats.pages_skipped, 2);
    }

    #[test]
    fn test_index_cache_hits_until_file_changes() {
        let fx = Fixture::new();
        fx.write(0, &[(20, "a")]);
        let processor = fx.processor();
        let query = fx.query(0, 10_000, Filter::level(20));

        processor.scan(&query).unwrap();
        processor.scan(&query).unwrap();
        let stats = processor.stats();
        assert_eq!(stats.index_cache_misses, 1);
        assert_eq!(stats.index_cache_hits, 1);

        fx.write(5_000, &[(20, "b")]);
        assert_eq!(processor.scan(&query).unwrap().len(), 2);
        assert_eq!(processor.stats().index_cache_misses, 2);
    }

    #[test]
    fn test_corrupt_page_is_skipped() {
        let fx = Fixture::new();
        let bad = fx.write(0, &[(20, "first")]);
        fx.write(100, &[(20, "second")]);

        let path = fx.layout.partition_dir(&fx.key, 0).join(DATA_FILE);
        let mut data = std::fs::read(&path).unwrap();
        data[bad.offset as usize + 90] ^= 0xff;
        std::fs::write(&path, data).unwrap();

        let processor = fx.processor();
        let docs = processor.scan(&fx.query(0, 1_000, Filter::level(20))).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].body, "second");
        assert_eq!(processor.stats().corrupt_pages, 1);
    }

    #[test]
    fn test_truncated_data_file_is_an_error() {
        let fx = Fixture::new();
        let entry = fx.write(0, &[(20, "first")]);

        let path = fx.layout.partition_dir(&fx.key, 0).join(DATA_FILE);
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(entry.length as u64 / 2).unwrap();

        let err = fx
            .processor()
            .scan(&fx.query(0, 1_000, Filter::level(20)))
            .unwrap_err();
        assert!(matches!(err, LogsError::TruncatedRead { .. }));
    }

    #[test]
    fn test_missing_partitions_are_empty() {
        let fx = Fixture::new();
        let processor = fx.processor();
        assert!(processor
            .scan(&fx.query(0, 10 * HOUR, Filter::level(20)))
            .unwrap()
            .is_empty());

        // Stray entries in the stream directory are ignored
        let stream_dir = fx.layout.stream_dir(&fx.key);
        std::fs::create_dir_all(stream_dir.join("not-a-bucket")).unwrap();
        std::fs::create_dir_all(stream_dir.join("0")).unwrap();
        let mut stray = File::create(stream_dir.join("notes.txt")).unwrap();
        stray.write_all(b"hello").unwrap();
        assert!(processor
            .scan(&fx.query(0, 10 * HOUR, Filter::level(20)))
            .unwrap()
            .is_empty());
    }
}
