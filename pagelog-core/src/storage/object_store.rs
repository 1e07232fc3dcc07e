//! Object store client contract

use crate::{LogsError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Minimal object store operations used by upload and the query tier.
///
/// A missing key must surface as [`LogsError::ObjectNotFound`] so readers
/// can treat it as an empty partition.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Read `length` bytes starting at `offset`
    async fn get_object_range(&self, key: &str, offset: u64, length: usize) -> Result<Bytes>;

    /// Write an object, replacing any previous content
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()>;

    /// Object size, or `None` if absent
    async fn head_object(&self, key: &str) -> Result<Option<u64>> {
        match self.get_object(key).await {
            Ok(data) => Ok(Some(data.len() as u64)),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Object store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.objects.write().remove(key)
    }

    fn lookup(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| LogsError::ObjectNotFound {
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.lookup(key)
    }

    async fn get_object_range(&self, key: &str, offset: u64, length: usize) -> Result<Bytes> {
        let data = self.lookup(key)?;
        let start = offset as usize;
        let end = start.saturating_add(length);
        if end > data.len() {
            return Err(LogsError::TruncatedRead {
                expected: length,
                actual: data.len().saturating_sub(start),
            });
        }
        Ok(data.slice(start..end))
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.write().insert(key.to_string(), data);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.objects.read().get(key).map(|d| d.len() as u64))
    }
}
