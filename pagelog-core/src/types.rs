//! Core types for Pagelog

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Log sequence number assigned by the write-ahead log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The sequence number before any entry was written
    pub const ZERO: Lsn = Lsn(0);

    /// Get the raw sequence number
    pub fn number(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one log stream of one tenant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// Tenant owning the stream
    pub tenant_id: String,
    /// Stream name (usually the emitting service)
    pub stream: String,
}

impl StreamKey {
    /// Create a new stream key
    pub fn new(tenant_id: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.stream)
    }
}

/// A single log document. Immutable once appended to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Event time in milliseconds
    pub ts_millis: Timestamp,
    /// Severity code
    pub level: i32,
    /// Trace the record belongs to, if any
    pub trace_id: Option<String>,
    /// Log message
    pub body: String,
}

impl Document {
    /// Create a document without a trace id
    pub fn new(ts_millis: Timestamp, level: i32, body: impl Into<String>) -> Self {
        Self {
            ts_millis,
            level,
            trace_id: None,
            body: body.into(),
        }
    }

    /// Attach a trace id
    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Approximate encoded size in bytes
    pub fn size(&self) -> usize {
        // ts + level + option tag + string length prefixes
        8 + 4 + 1 + self.trace_id.as_ref().map_or(0, |t| 8 + t.len()) + 8 + self.body.len()
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Duration in milliseconds
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Index of the partition a timestamp falls into
pub fn partition_bucket(ts_millis: Timestamp, partition_ms: i64) -> i64 {
    ts_millis.div_euclid(partition_ms)
}

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_display() {
        let key = StreamKey::new("tenant-a", "checkout");
        assert_eq!(key.to_string(), "tenant-a/checkout");
    }

    #[test]
    fn test_time_range() {
        let range1 = TimeRange::new(100, 200);
        let range2 = TimeRange::new(150, 250);
        let range3 = TimeRange::new(300, 400);

        assert!(range1.overlaps(&range2));
        assert!(!range1.overlaps(&range3));
        assert!(range1.contains(200));
        assert!(!range1.contains(250));
        assert_eq!(range3.duration(), 100);
    }

    #[test]
    fn test_partition_bucket() {
        assert_eq!(partition_bucket(0, 3_600_000), 0);
        assert_eq!(partition_bucket(3_599_999, 3_600_000), 0);
        assert_eq!(partition_bucket(3_600_000, 3_600_000), 1);
        assert_eq!(partition_bucket(-1, 3_600_000), -1);
    }

    #[test]
    fn test_document_size_grows_with_content() {
        let plain = Document::new(1, 20, "hello");
        let traced = plain.clone().with_trace("abc");
        assert!(traced.size() > plain.size());
        assert_eq!(plain.size(), 8 + 4 + 1 + 8 + 5);
    }
}
