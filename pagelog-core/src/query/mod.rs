//! Log queries
//!
//! A query names one stream, an inclusive time range and a [`Filter`]. It is
//! answered by up to three independent tiers:
//! - the buffer pool (active and recently sealed pages)
//! - hour partitions on local disk
//! - hour partitions copied to the object store
//!
//! Tiers hold disjoint pages, so their results are concatenated as-is.

mod buffer;
mod disk;
mod evaluator;
mod filter;
mod multi;
mod object;

pub use buffer::BufferPoolQueryProcessor;
pub use disk::{OnDiskQueryProcessor, ScanStats, ScanStatsSnapshot};
pub use evaluator::FilterEvaluator;
pub use filter::{Filter, FilterKind, FilterSpec};
pub use multi::MultiSourceQueryProcessor;
pub use object::ObjectStoreQueryProcessor;

use crate::{Document, LogsError, Result, StreamKey, TimeRange, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Query Types
// ============================================================================

/// Which tiers a query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub buffer_pool: bool,
    pub disk: bool,
    pub object_store: bool,
}

impl QueryConfig {
    /// Read every tier
    pub fn all_sources() -> Self {
        Self {
            buffer_pool: true,
            disk: true,
            object_store: true,
        }
    }

    /// Read only what this node holds
    pub fn local_sources() -> Self {
        Self {
            object_store: false,
            ..Self::all_sources()
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::all_sources()
    }
}

/// A log query
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub stream: StreamKey,
    /// Inclusive on both ends
    pub range: TimeRange,
    pub filter: Filter,
    pub sources: QueryConfig,
}

impl LogQuery {
    /// Create a query over every tier
    pub fn new(stream: StreamKey, start: Timestamp, end: Timestamp, filter: Filter) -> Self {
        Self {
            stream,
            range: TimeRange::new(start, end),
            filter,
            sources: QueryConfig::default(),
        }
    }

    /// Restrict the tiers queried
    pub fn with_sources(mut self, sources: QueryConfig) -> Self {
        self.sources = sources;
        self
    }

    /// Reject inverted ranges
    pub fn validate(&self) -> Result<()> {
        if self.range.start > self.range.end {
            return Err(LogsError::Query(format!(
                "Query range starts at {} after it ends at {}",
                self.range.start, self.range.end
            )));
        }
        Ok(())
    }
}

/// A source of log documents
#[async_trait]
pub trait QueryProcessor: Send + Sync {
    /// Documents of `query.stream` matching `query.filter` in pages that
    /// overlap `query.range`
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Document>>;
}

/// Scan limits of the disk and object-store tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Page indexes kept in the on-disk tier's LRU cache
    pub index_cache_capacity: usize,
    /// Queries spanning more partitions than this are rejected
    pub max_partitions_per_query: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            index_cache_capacity: crate::config::INDEX_CACHE_CAPACITY,
            max_partitions_per_query: crate::config::MAX_PARTITIONS_PER_QUERY,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.index_cache_capacity == 0 {
            return Err(LogsError::Config("index_cache_capacity must be positive".into()));
        }
        if self.max_partitions_per_query == 0 {
            return Err(LogsError::Config("max_partitions_per_query must be positive".into()));
        }
        Ok(())
    }
}
