//! Durable storage - partition files, page indexes and the object store

mod index;
mod object_store;
mod upload;
mod writer;

pub use index::{PageIndex, PageIndexEntry};
pub use object_store::{InMemoryObjectStore, ObjectStore};
pub use upload::{PartitionUploader, UploadReport};
pub use writer::PartitionWriter;

use crate::page::PageConfig;
use crate::pool::PoolConfig;
use crate::query::ScanConfig;
use crate::{partition_bucket, LogsError, Result, StreamKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Data file of a partition
pub const DATA_FILE: &str = "logfile.bin";

/// Index file of a partition
pub const INDEX_FILE: &str = "logfile.idx";

/// Marker left in a partition directory after upload
pub const UPLOAD_MARKER: &str = ".uploaded";

/// Where partitions live locally and in the object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLayoutConfig {
    /// Root of the local partition tree
    pub data_dir: PathBuf,
    /// Key prefix in the object store
    pub object_prefix: String,
    /// Partition width in milliseconds
    pub partition_ms: i64,
    /// fsync data and index files after every page
    pub sync_writes: bool,
}

impl Default for StorageLayoutConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            object_prefix: "logs".to_string(),
            partition_ms: crate::config::PARTITION_MS,
            sync_writes: false,
        }
    }
}

impl StorageLayoutConfig {
    /// Partition bucket holding `ts`
    pub fn bucket_of(&self, ts: Timestamp) -> i64 {
        partition_bucket(ts, self.partition_ms)
    }

    /// `{data_dir}/{tenant}/{stream}`
    pub fn stream_dir(&self, key: &StreamKey) -> PathBuf {
        self.data_dir.join(&key.tenant_id).join(&key.stream)
    }

    /// `{data_dir}/{tenant}/{stream}/{bucket}`
    pub fn partition_dir(&self, key: &StreamKey, bucket: i64) -> PathBuf {
        self.stream_dir(key).join(bucket.to_string())
    }

    /// `{prefix}/{tenant}/{stream}/{bucket}/{file}`
    pub fn object_key(&self, key: &StreamKey, bucket: i64, file: &str) -> String {
        let prefix = self.object_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            format!("{}/{}/{}/{}", key.tenant_id, key.stream, bucket, file)
        } else {
            format!("{}/{}/{}/{}/{}", prefix, key.tenant_id, key.stream, bucket, file)
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub page: PageConfig,
    pub pool: PoolConfig,
    pub layout: StorageLayoutConfig,
    pub scan: ScanConfig,
}

impl LogsConfig {
    /// Check every section
    pub fn validate(&self) -> Result<()> {
        if self.page.max_range_ms <= 0 || self.page.max_page_bytes == 0 {
            return Err(LogsError::Config("page limits must be positive".into()));
        }
        if self.page.bloom_bits_per_key == 0 {
            return Err(LogsError::Config("bloom_bits_per_key must be positive".into()));
        }
        if self.layout.partition_ms <= 0 {
            return Err(LogsError::Config("partition_ms must be positive".into()));
        }
        self.pool.validate()?;
        self.scan.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_paths() {
        let layout = StorageLayoutConfig {
            data_dir: PathBuf::from("/var/logs"),
            ..Default::default()
        };
        let key = StreamKey::new("acme", "api");

        assert_eq!(layout.bucket_of(7_200_001), 2);
        assert_eq!(
            layout.partition_dir(&key, 2),
            PathBuf::from("/var/logs/acme/api/2")
        );
        assert_eq!(layout.object_key(&key, 2, DATA_FILE), "logs/acme/api/2/logfile.bin");

        let bare = StorageLayoutConfig {
            object_prefix: String::new(),
            ..layout
        };
        assert_eq!(bare.object_key(&key, 0, INDEX_FILE), "acme/api/0/logfile.idx");
    }

    #[test]
    fn test_config_validation() {
        assert!(LogsConfig::default().validate().is_ok());

        let mut config = LogsConfig::default();
        config.pool.sealed_cap = 0;
        assert!(matches!(config.validate(), Err(LogsError::Config(_))));

        let mut config = LogsConfig::default();
        config.layout.partition_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LogsConfig::default();
        config.scan.index_cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: LogsConfig =
            serde_json::from_str(r#"{"pool": {"sealed_cap": 4}, "layout": {"data_dir": "/tmp/x"}}"#)
                .unwrap();
        assert_eq!(config.pool.sealed_cap, 4);
        assert_eq!(config.pool.flush_interval_ms, crate::config::FLUSHER_MILLIS);
        assert_eq!(config.layout.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.layout.object_prefix, "logs");
    }
}
