//! Pagelog Core - Paged Log Storage and Query Engine
//!
//! Log records arrive in per-stream pages that index themselves on append,
//! seal when full, flush to hour-partitioned files and are later copied to
//! an object store. Queries fan out across all three tiers.
//!
//! # Architecture
//!
//! - **Page**: append-only document run with trigram, level and trace indexes
//! - **PageCodec**: checksummed big-endian page format
//! - **BufferPool**: active and recently sealed pages per stream, with
//!   background flusher and reaper threads
//! - **Storage**: partition writer, page index files and object-store upload
//! - **Query**: filter evaluation and the buffer / disk / object-store tiers
//! - **WAL**: contracts for the write-ahead log that feeds the pool

pub mod page;
pub mod pool;
pub mod query;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{LogsError, Result};
pub use types::*;

/// Pagelog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Maximum time span covered by one page (1 minute)
    pub const PAGE_MAX_RANGE_MS: i64 = 60_000;

    /// Estimated encoded page size that triggers a seal (1MB)
    pub const PAGE_MAX_BYTES: usize = 1024 * 1024;

    /// Documents per page used to size the trace bloom filter
    pub const PAGE_EXPECTED_DOCS: usize = 4096;

    /// Bloom filter bits per key (~1% false positives)
    pub const BLOOM_BITS_PER_KEY: usize = 10;

    /// Sealed pages retained per stream
    pub const SEALED_CAP: usize = 16;

    /// How long a persisted sealed page stays queryable in memory
    pub const SEALED_TTL_MS: i64 = 60_000;

    /// Flusher period
    pub const FLUSHER_MILLIS: u64 = 100;

    /// Reaper period
    pub const REAPER_MILLIS: u64 = 1000;

    /// Partition width (1 hour)
    pub const PARTITION_MS: i64 = 3_600_000;

    /// Size of one page index record
    pub const INDEX_ENTRY_BYTES: usize = 36;

    /// Cached page indexes for the on-disk tier
    pub const INDEX_CACHE_CAPACITY: usize = 256;

    /// Upper bound on partitions touched by one object-store query
    pub const MAX_PARTITIONS_PER_QUERY: usize = 24 * 366;
}
