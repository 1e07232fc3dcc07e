//! Object store tier

use super::{FilterEvaluator, LogQuery, QueryProcessor, ScanConfig, ScanStats, ScanStatsSnapshot};
use crate::storage::{ObjectStore, PageIndex, StorageLayoutConfig, DATA_FILE, INDEX_FILE};
use crate::{Document, LogsError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers queries from partitions uploaded to the object store
pub struct ObjectStoreQueryProcessor {
    layout: StorageLayoutConfig,
    store: Arc<dyn ObjectStore>,
    max_partitions: usize,
    stats: ScanStats,
}

impl ObjectStoreQueryProcessor {
    /// Create a new object-store query processor
    pub fn new(layout: StorageLayoutConfig, store: Arc<dyn ObjectStore>, scan: &ScanConfig) -> Self {
        Self {
            layout,
            store,
            max_partitions: scan.max_partitions_per_query,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        self.stats.snapshot()
    }

    async fn scan_partition(
        &self,
        query: &LogQuery,
        bucket: i64,
        out: &mut Vec<Document>,
    ) -> Result<()> {
        let index_key = self.layout.object_key(&query.stream, bucket, INDEX_FILE);
        let raw = self.store.get_object(&index_key).await?;
        let index = PageIndex::parse(&raw)?;
        self.stats.index_loaded(index.len());

        let data_key = self.layout.object_key(&query.stream, bucket, DATA_FILE);
        for entry in index.entries() {
            if !entry.overlaps(&query.range) {
                self.stats.page_skipped();
                continue;
            }

            let bytes = self
                .store
                .get_object_range(&data_key, entry.offset as u64, entry.length as usize)
                .await?;
            self.stats.page_read(bytes.len());

            match self.stats.decode_page(entry, &bytes) {
                Ok(page) => out.extend(FilterEvaluator::apply(&page, &query.filter)),
                Err(e) if e.is_corruption() => {
                    self.stats.page_corrupt();
                    warn!("Skipping corrupt page {}@{}: {}", data_key, entry.offset, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueryProcessor for ObjectStoreQueryProcessor {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Document>> {
        query.validate()?;

        let first = self.layout.bucket_of(query.range.start);
        let last = self.layout.bucket_of(query.range.end);
        let span = last
            .checked_sub(first)
            .and_then(|d| u64::try_from(d).ok())
            .and_then(|d| d.checked_add(1))
            .ok_or_else(|| {
                LogsError::Query(format!(
                    "Query range {}..{} spans too many partitions",
                    query.range.start, query.range.end
                ))
            })?;
        if span > self.max_partitions as u64 {
            return Err(LogsError::Query(format!(
                "Query spans {} partitions, limit is {}",
                span, self.max_partitions
            )));
        }

        let mut out = Vec::new();
        for bucket in first..=last {
            match self.scan_partition(query, bucket, &mut out).await {
                Ok(()) => {}
                Err(e) if e.is_missing() => {
                    debug!("No uploaded partition {}/{}", query.stream, bucket);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Page, PageConfig};
    use crate::query::Filter;
    use crate::storage::{InMemoryObjectStore, PartitionUploader, PartitionWriter};
    use crate::StreamKey;
    use bytes::Bytes;
    use tempfile::tempdir;

    const HOUR: i64 = 3_600_000;

    async fn uploaded(pages: &[(i64, &str)]) -> (StorageLayoutConfig, Arc<InMemoryObjectStore>) {
        let dir = tempdir().unwrap();
        let layout = StorageLayoutConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let writer = PartitionWriter::new(layout.clone());
        let key = StreamKey::new("acme", "api");
        for (ts, body) in pages {
            let mut page = Page::new(&PageConfig::default());
            page.append(Document::new(*ts, 30, *body).with_trace("req-1"));
            writer.write_page(&key, &page).unwrap();
        }

        let store = Arc::new(InMemoryObjectStore::new());
        PartitionUploader::new(layout.clone(), store.clone())
            .upload_all()
            .await
            .unwrap();
        (layout, store)
    }

    fn query(start: i64, end: i64) -> LogQuery {
        LogQuery::new(StreamKey::new("acme", "api"), start, end, Filter::trace("req-1"))
    }

    #[tokio::test]
    async fn test_reads_uploaded_partitions_and_skips_gaps() {
        let (layout, store) =
            uploaded(&[(10, "hour zero"), (2 * HOUR + 5, "hour two"), (2 * HOUR + 9, "also two")]).await;
        let processor = ObjectStoreQueryProcessor::new(layout, store, &ScanConfig::default());

        let docs = processor.get_logs(&query(0, 3 * HOUR)).await.unwrap();
        let bodies: Vec<_> = docs.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["hour zero", "hour two", "also two"]);

        let docs = processor.get_logs(&query(2 * HOUR + 6, 3 * HOUR)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(processor.stats().pages_skipped, 1);
    }

    #[tokio::test]
    async fn test_corrupt_uploaded_page_is_skipped() {
        let (layout, store) = uploaded(&[(10, "first"), (20, "second")]).await;
        let key = layout.object_key(&StreamKey::new("acme", "api"), 0, DATA_FILE);
        let mut data = store.get_object(&key).await.unwrap().to_vec();
        data[100] ^= 0x55;
        store.put_object(&key, Bytes::from(data)).await.unwrap();

        let processor = ObjectStoreQueryProcessor::new(layout, store, &ScanConfig::default());
        let docs = processor.get_logs(&query(0, HOUR)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].body, "second");
        assert_eq!(processor.stats().corrupt_pages, 1);
    }

    #[tokio::test]
    async fn test_too_wide_range_is_rejected() {
        let processor = ObjectStoreQueryProcessor::new(
            StorageLayoutConfig::default(),
            Arc::new(InMemoryObjectStore::new()),
            &ScanConfig {
                max_partitions_per_query: 10,
                ..ScanConfig::default()
            },
        );
        let err = processor.get_logs(&query(0, 10 * HOUR)).await.unwrap_err();
        assert!(matches!(err, LogsError::Query(_)));
        assert!(processor.get_logs(&query(0, 9 * HOUR)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extreme_range_with_narrow_partitions_is_rejected() {
        let processor = ObjectStoreQueryProcessor::new(
            StorageLayoutConfig {
                partition_ms: 1,
                ..StorageLayoutConfig::default()
            },
            Arc::new(InMemoryObjectStore::new()),
            &ScanConfig::default(),
        );
        let err = processor
            .get_logs(&query(i64::MIN, i64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, LogsError::Query(_)));
    }
}
