//! Fan-out across query tiers

use super::{LogQuery, QueryProcessor};
use crate::{Document, LogsError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Queries every enabled tier concurrently and concatenates the results in
/// tier order: buffer pool, disk, object store.
#[derive(Clone, Default)]
pub struct MultiSourceQueryProcessor {
    buffer_pool: Option<Arc<dyn QueryProcessor>>,
    disk: Option<Arc<dyn QueryProcessor>>,
    object_store: Option<Arc<dyn QueryProcessor>>,
}

impl MultiSourceQueryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_pool(mut self, processor: Arc<dyn QueryProcessor>) -> Self {
        self.buffer_pool = Some(processor);
        self
    }

    pub fn with_disk(mut self, processor: Arc<dyn QueryProcessor>) -> Self {
        self.disk = Some(processor);
        self
    }

    pub fn with_object_store(mut self, processor: Arc<dyn QueryProcessor>) -> Self {
        self.object_store = Some(processor);
        self
    }

    fn spawn(
        processor: Option<&Arc<dyn QueryProcessor>>,
        enabled: bool,
        query: &LogQuery,
    ) -> Option<JoinHandle<Result<Vec<Document>>>> {
        let processor = processor.filter(|_| enabled)?.clone();
        let query = query.clone();
        Some(tokio::spawn(async move { processor.get_logs(&query).await }))
    }
}

#[async_trait]
impl QueryProcessor for MultiSourceQueryProcessor {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Document>> {
        query.validate()?;
        let sources = query.sources;

        let tasks = [
            ("buffer pool", Self::spawn(self.buffer_pool.as_ref(), sources.buffer_pool, query)),
            ("disk", Self::spawn(self.disk.as_ref(), sources.disk, query)),
            (
                "object store",
                Self::spawn(self.object_store.as_ref(), sources.object_store, query),
            ),
        ];

        let mut out = Vec::new();
        for (name, task) in tasks {
            let Some(task) = task else {
                continue;
            };
            let docs = task
                .await
                .map_err(|e| LogsError::Internal(format!("{} query task failed: {}", name, e)))??;
            debug!("{} returned {} documents for {}", name, docs.len(), query.stream);
            out.extend(docs);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, QueryConfig};
    use crate::StreamKey;
    use parking_lot::Mutex;

    struct Fixed {
        docs: Vec<Document>,
        calls: Mutex<usize>,
    }

    impl Fixed {
        fn new(bodies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                docs: bodies.iter().map(|b| Document::new(1, 20, *b)).collect(),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryProcessor for Fixed {
        async fn get_logs(&self, _query: &LogQuery) -> Result<Vec<Document>> {
            *self.calls.lock() += 1;
            Ok(self.docs.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl QueryProcessor for Failing {
        async fn get_logs(&self, _query: &LogQuery) -> Result<Vec<Document>> {
            Err(LogsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied",
            )))
        }
    }

    fn query() -> LogQuery {
        LogQuery::new(StreamKey::new("t", "s"), 0, 100, Filter::level(20))
    }

    #[tokio::test]
    async fn test_concatenates_in_tier_order() {
        let multi = MultiSourceQueryProcessor::new()
            .with_object_store(Fixed::new(&["remote"]))
            .with_buffer_pool(Fixed::new(&["mem-1", "mem-2"]))
            .with_disk(Fixed::new(&["disk"]));

        let docs = multi.get_logs(&query()).await.unwrap();
        let bodies: Vec<_> = docs.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["mem-1", "mem-2", "disk", "remote"]);
    }

    #[tokio::test]
    async fn test_disabled_sources_are_not_called() {
        let remote = Fixed::new(&["remote"]);
        let multi = MultiSourceQueryProcessor::new()
            .with_buffer_pool(Fixed::new(&["mem"]))
            .with_object_store(remote.clone());

        let docs = multi
            .get_logs(&query().with_sources(QueryConfig::local_sources()))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(*remote.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let multi = MultiSourceQueryProcessor::new()
            .with_buffer_pool(Fixed::new(&["mem"]))
            .with_disk(Arc::new(Failing));
        let err = multi.get_logs(&query()).await.unwrap_err();
        assert!(matches!(err, LogsError::Io(_)));
    }

    #[tokio::test]
    async fn test_no_sources_is_empty() {
        let docs = MultiSourceQueryProcessor::new().get_logs(&query()).await.unwrap();
        assert!(docs.is_empty());
    }
}
