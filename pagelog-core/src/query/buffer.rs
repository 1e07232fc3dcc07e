//! Buffer pool tier

use super::{FilterEvaluator, LogQuery, QueryProcessor};
use crate::page::Page;
use crate::pool::{AppendOnlyPage, BufferPool};
use crate::{Document, LogsError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Answers queries from pages still held in memory
pub struct BufferPoolQueryProcessor {
    pool: Arc<BufferPool<Page>>,
}

impl BufferPoolQueryProcessor {
    pub fn new(pool: Arc<BufferPool<Page>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryProcessor for BufferPoolQueryProcessor {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Document>> {
        query.validate()?;

        let mut pages = self.pool.snapshot_sealed(&query.stream, query.range);
        if let Some(active) = self.pool.snapshot_active(&query.stream) {
            if active.range().map_or(false, |r| r.overlaps(&query.range)) {
                pages.push(active);
            }
        }

        let filter = query.filter.clone();
        tokio::task::spawn_blocking(move || {
            pages
                .iter()
                .flat_map(|page| FilterEvaluator::apply(page, &filter))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| LogsError::Internal(format!("Buffer pool scan task failed: {}", e)))
    }
}
