//! In-Memory Storage Engine

use super::StorageEngine;
use crate::error::Result;
use dashmap::DashMap;

/// Blob store backed by a sharded map. Nothing is persisted.
pub struct MemoryStorage {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryStorage {
    fn put(&self, storage_key: &str, value: Vec<u8>) -> Result<()> {
        self.blobs.insert(storage_key.to_string(), value);
        Ok(())
    }

    fn get(&self, storage_key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(storage_key).map(|v| v.clone()))
    }

    fn delete(&self, storage_key: &str) -> Result<()> {
        self.blobs.remove(storage_key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.blobs.len()
    }
}
