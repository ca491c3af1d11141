//! Dependency Tracker
//!
//! Reference count per storage version, held while a live transaction may
//! still read it. A version with a positive count is never reclaimed.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::error;

use crate::error::{ConsistencyError, Result};
use crate::keys::StorageVersionId;

pub struct DependencyTracker {
    /// Zero counts are removed, absence means zero
    counts: DashMap<StorageVersionId, usize>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Increment, returning the new count
    pub fn acquire(&self, version: &StorageVersionId) -> usize {
        let mut count = self.counts.entry(version.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement, returning the new count. Releasing an unheld version is a fault.
    pub fn release(&self, version: &StorageVersionId) -> Result<usize> {
        match self.counts.entry(version.clone()) {
            Entry::Occupied(mut held) => {
                *held.get_mut() -= 1;
                let left = *held.get();
                if left == 0 {
                    held.remove();
                }
                Ok(left)
            }
            Entry::Vacant(_) => {
                error!(version = %version, "dependency released without matching acquire");
                Err(ConsistencyError::RefcountUnderflow {
                    version: version.clone(),
                })
            }
        }
    }

    pub fn count(&self, version: &StorageVersionId) -> usize {
        self.counts.get(version).map(|c| *c).unwrap_or(0)
    }

    /// Run `f` only if `version` has no dependents, holding the version's
    /// slot for the duration so no `acquire` can interleave with `f`.
    ///
    /// `f` must not touch this tracker.
    pub(crate) fn with_unreferenced<R>(
        &self,
        version: &StorageVersionId,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        match self.counts.entry(version.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let out = f();
                drop(slot);
                Some(out)
            }
        }
    }

    /// Number of versions with at least one dependent
    pub fn tracked(&self) -> usize {
        self.counts.len()
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}
