//! Consistency Manager Trait

use std::sync::Arc;

use super::IsolationLevel;
use crate::error::{ConsistencyError, Result};
use crate::keys::{self, StorageVersionId};
use crate::store::VersionStore;
use crate::types::{ReadSet, TransactionRecord, TxnId, WriteSet};

/// What a read resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyVersion {
    /// The requester already wrote this key; serve its own buffered value
    OwnWrite(String),
    /// A committed version. A dependency on it is held until released.
    Committed(StorageVersionId),
}

impl KeyVersion {
    pub fn committed(&self) -> Option<&StorageVersionId> {
        match self {
            KeyVersion::Committed(v) => Some(v),
            KeyVersion::OwnWrite(_) => None,
        }
    }
}

/// Conflict-detection and visibility policy
///
/// Implementations:
/// - `ReadCommittedManager` - reads see any committed data, never rejects
/// - `SnapshotIsolationManager` - snapshot reads, first-committer-wins
/// - `SerializableManager` - snapshot isolation plus read-set validation
///
/// All variants share one [`VersionStore`].
pub trait ConsistencyManager: Send + Sync {
    fn isolation(&self) -> IsolationLevel;

    fn store(&self) -> &Arc<VersionStore>;

    /// Highest commit timestamp `txn` may observe
    fn snapshot_boundary(&self, txn: &TransactionRecord) -> i64;

    /// Decide whether `tid` may commit given what it read and wrote.
    ///
    /// A `false` is an ordinary outcome, not an error, and has no side
    /// effects. Empty read and write sets are always admitted.
    fn validate_transaction(&self, tid: &TxnId, read_set: &ReadSet, write_set: &WriteSet) -> Result<bool>;

    /// Resolve which version of `key` the requester may read, taking a
    /// dependency on it so it cannot be reclaimed while in use.
    fn get_valid_key_version(&self, key: &str, txn: &TransactionRecord) -> Result<KeyVersion> {
        if txn.write_set.contains(key) {
            return Ok(KeyVersion::OwnWrite(key.to_string()));
        }
        self.store()
            .select_and_acquire(key, self.snapshot_boundary(txn))?
            .map(KeyVersion::Committed)
            .ok_or_else(|| ConsistencyError::NoVisibleVersion {
                key: key.to_string(),
                txn: txn.id.clone(),
            })
    }

    fn get_storage_key_name(&self, key: &str, timestamp: i64, txn: &TxnId) -> String {
        keys::storage_key_name(key, timestamp, txn)
    }

    /// True iff storage key `one` dominates `two`
    fn compare_keys(&self, one: &str, two: &str) -> Result<bool> {
        keys::compare_keys(one, two)
    }

    /// `finished == false` takes a dependency on `version`, `true` drops one.
    /// Each acquire must be matched by exactly one release.
    fn update_transaction_dependencies(&self, version: &StorageVersionId, finished: bool) -> Result<()> {
        if finished {
            self.store().release(version)?;
        } else {
            self.store().acquire(version);
        }
        Ok(())
    }
}
