//! Storage Engine Trait

use crate::error::Result;

/// Physical blob store addressed by canonical storage keys.
///
/// Every committed write lands at its own storage key, so a key is written
/// at most once and only deleted by reclamation.
///
/// Implementations:
/// - `MemoryStorage`: in-process map (tests, embedding)
pub trait StorageEngine: Send + Sync {
    /// Store the blob for `storage_key`
    fn put(&self, storage_key: &str, value: Vec<u8>) -> Result<()>;

    /// Fetch a blob, `None` if absent
    fn get(&self, storage_key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a blob; removing an absent key is not an error
    fn delete(&self, storage_key: &str) -> Result<()>;

    /// Number of stored blobs
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
