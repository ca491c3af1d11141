//! Version Indexes
//!
//! - `VersionIndex`: logical key -> every indexed storage version, kept in
//!   dominance order so the newest visible version is found by a reverse scan
//! - `LatestVersionIndex`: logical key -> dominant version, O(1) lookups

use std::collections::BTreeSet;
use std::ops::Bound;

use dashmap::DashMap;

use crate::keys::StorageVersionId;

/// Logical key -> set of storage versions known to exist
pub struct VersionIndex {
    versions: DashMap<String, BTreeSet<StorageVersionId>>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
        }
    }

    /// Insert `version`. `on_insert` runs while the key's entry is still
    /// locked, so companion indexes observe inserts for one key in order.
    ///
    /// Returns false if the version was already indexed.
    pub fn record_with<F>(&self, version: StorageVersionId, on_insert: F) -> bool
    where
        F: FnOnce(&StorageVersionId),
    {
        let mut entry = self.versions.entry(version.key().to_string()).or_default();
        if entry.contains(&version) {
            return false;
        }
        on_insert(&version);
        entry.insert(version);
        true
    }

    pub fn record(&self, version: StorageVersionId) -> bool {
        self.record_with(version, |_| {})
    }

    /// All versions of `key`, oldest first
    pub fn versions(&self, key: &str) -> Vec<StorageVersionId> {
        self.versions
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, version: &StorageVersionId) -> bool {
        self.versions
            .get(version.key())
            .map(|set| set.contains(version))
            .unwrap_or(false)
    }

    /// Newest version of `key` accepted by `visible`
    pub fn find_newest<F>(&self, key: &str, mut visible: F) -> Option<StorageVersionId>
    where
        F: FnMut(&StorageVersionId) -> bool,
    {
        let set = self.versions.get(key)?;
        set.iter().rev().find(|v| visible(v)).cloned()
    }

    /// The next version of the same key that dominates `version`
    pub fn successor(&self, version: &StorageVersionId) -> Option<StorageVersionId> {
        let set = self.versions.get(version.key())?;
        set.range((Bound::Excluded(version), Bound::Unbounded))
            .next()
            .cloned()
    }

    /// Only the reclamation path removes versions
    pub(crate) fn remove(&self, version: &StorageVersionId) -> bool {
        let (removed, now_empty) = match self.versions.get_mut(version.key()) {
            Some(mut set) => {
                let removed = set.remove(version);
                (removed, set.is_empty())
            }
            None => return false,
        };
        if now_empty {
            self.versions.remove_if(version.key(), |_, set| set.is_empty());
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.versions.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of indexed keys
    pub fn key_count(&self) -> usize {
        self.versions.len()
    }

    /// Number of indexed versions across all keys
    pub fn version_count(&self) -> usize {
        self.versions.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for VersionIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Logical key -> currently dominant storage version
pub struct LatestVersionIndex {
    latest: DashMap<String, StorageVersionId>,
}

impl LatestVersionIndex {
    pub fn new() -> Self {
        Self {
            latest: DashMap::new(),
        }
    }

    /// Replace the dominant pointer if `version` dominates it.
    /// Returns true if the pointer moved.
    pub fn offer(&self, version: &StorageVersionId) -> bool {
        let mut moved = false;
        self.latest
            .entry(version.key().to_string())
            .and_modify(|current| {
                if version.dominates(current) {
                    *current = version.clone();
                    moved = true;
                }
            })
            .or_insert_with(|| {
                moved = true;
                version.clone()
            });
        moved
    }

    /// Dominant version of `key`, `None` if it was never written
    pub fn latest(&self, key: &str) -> Option<StorageVersionId> {
        self.latest.get(key).map(|v| v.clone())
    }
}

impl Default for LatestVersionIndex {
    fn default() -> Self {
        Self::new()
    }
}
