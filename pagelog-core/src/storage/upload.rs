//! Copies finished partitions from local disk to the object store

use super::{ObjectStore, StorageLayoutConfig, DATA_FILE, INDEX_FILE, UPLOAD_MARKER};
use crate::{now_millis, LogsError, Result, StreamKey, Timestamp};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the marker file records about the last upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct UploadMarker {
    data_len: u64,
    index_len: u64,
    data_crc32: u32,
}

/// Outcome of one upload pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Partition uploader
pub struct PartitionUploader {
    layout: StorageLayoutConfig,
    store: Arc<dyn ObjectStore>,
}

impl PartitionUploader {
    /// Create a new uploader
    pub fn new(layout: StorageLayoutConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self { layout, store }
    }

    /// Upload every partition whose bucket ended before `now`
    pub async fn upload_completed(&self, now: Timestamp) -> Result<UploadReport> {
        let current = self.layout.bucket_of(now);
        self.upload_matching(|bucket| bucket < current).await
    }

    /// Upload completed partitions as of the wall clock
    pub async fn upload_completed_now(&self) -> Result<UploadReport> {
        self.upload_completed(now_millis()).await
    }

    /// Upload every partition, including the one still being written
    pub async fn upload_all(&self) -> Result<UploadReport> {
        self.upload_matching(|_| true).await
    }

    async fn upload_matching(&self, want: impl Fn(i64) -> bool) -> Result<UploadReport> {
        let mut report = UploadReport::default();

        for (key, bucket, dir) in self.list_partitions().await? {
            if !want(bucket) {
                continue;
            }
            match self.upload_partition(&key, bucket, &dir).await {
                Ok(true) => report.uploaded += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    warn!("Failed to upload partition {}/{}: {}", key, bucket, e);
                    report.failed += 1;
                }
            }
        }

        if report.uploaded > 0 || report.failed > 0 {
            info!(
                "Upload pass: {} uploaded, {} unchanged, {} failed",
                report.uploaded, report.unchanged, report.failed
            );
        }
        Ok(report)
    }

    /// Upload one partition unless its marker shows it is already current.
    /// Returns whether anything was uploaded.
    pub async fn upload_partition(&self, key: &StreamKey, bucket: i64, dir: &Path) -> Result<bool> {
        let data = match tokio::fs::read(dir.join(DATA_FILE)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let index = tokio::fs::read(dir.join(INDEX_FILE)).await?;

        let marker = UploadMarker {
            data_len: data.len() as u64,
            index_len: index.len() as u64,
            data_crc32: crc32fast::hash(&data),
        };
        let marker_path = dir.join(UPLOAD_MARKER);
        if read_marker(&marker_path).await.as_ref() == Some(&marker) {
            debug!("Partition {}/{} unchanged since last upload", key, bucket);
            return Ok(false);
        }

        // Data before index: readers only follow entries the index names.
        self.store
            .put_object(&self.layout.object_key(key, bucket, DATA_FILE), Bytes::from(data))
            .await?;
        self.store
            .put_object(&self.layout.object_key(key, bucket, INDEX_FILE), Bytes::from(index))
            .await?;

        let body = serde_json::to_vec(&marker)
            .map_err(|e| LogsError::Internal(format!("Failed to encode upload marker: {}", e)))?;
        tokio::fs::write(&marker_path, body).await?;

        debug!(
            "Uploaded partition {}/{} ({} data bytes)",
            key, bucket, marker.data_len
        );
        Ok(true)
    }

    /// `(stream, bucket, dir)` for every partition directory on disk
    async fn list_partitions(&self) -> Result<Vec<(StreamKey, i64, PathBuf)>> {
        let mut partitions = Vec::new();
        for tenant in list_dirs(&self.layout.data_dir).await? {
            for stream in list_dirs(&tenant.1).await? {
                for (name, dir) in list_dirs(&stream.1).await? {
                    let Ok(bucket) = name.parse::<i64>() else {
                        continue;
                    };
                    partitions.push((StreamKey::new(&tenant.0, &stream.0), bucket, dir));
                }
            }
        }
        partitions.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        Ok(partitions)
    }
}

async fn read_marker(path: &Path) -> Option<UploadMarker> {
    let raw = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

async fn list_dirs(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                dirs.push((name.to_string(), entry.path()));
            }
        }
    }
    Ok(dirs)
}
