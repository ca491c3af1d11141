//! Consistency Manager Implementations
//!
//! One type per isolation level, each holding the same shared store.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ConsistencyManager, IsolationLevel};
use crate::error::{ConsistencyError, Result};
use crate::store::VersionStore;
use crate::types::{ReadSet, TransactionRecord, TxnId, WriteSet};

/// Snapshot timestamp of a running transaction
fn snapshot_of(store: &VersionStore, tid: &TxnId) -> Result<i64> {
    store
        .snapshot_of(tid)
        .ok_or_else(|| ConsistencyError::UnknownTransaction(tid.clone()))
}

/// First-committer-wins: a key in `write_set` also written by another
/// transaction that committed after `snapshot_ts`
fn first_write_conflict(
    store: &VersionStore,
    tid: &TxnId,
    snapshot_ts: i64,
    write_set: &WriteSet,
) -> Option<(TxnId, String)> {
    if write_set.is_empty() {
        return None;
    }
    store
        .committed_after(snapshot_ts)
        .iter()
        .filter(|rec| rec.id != *tid)
        .find_map(|rec| {
            write_set
                .iter()
                .find(|key| rec.write_set.contains(*key))
                .map(|key| (rec.id.clone(), key.clone()))
        })
}

/// Read committed: reads see the newest committed version at read time and
/// commits are never rejected.
pub struct ReadCommittedManager {
    store: Arc<VersionStore>,
}

impl ReadCommittedManager {
    pub fn new(store: Arc<VersionStore>) -> Self {
        Self { store }
    }
}

impl ConsistencyManager for ReadCommittedManager {
    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    fn snapshot_boundary(&self, _txn: &TransactionRecord) -> i64 {
        i64::MAX
    }

    fn validate_transaction(&self, _tid: &TxnId, _read_set: &ReadSet, _write_set: &WriteSet) -> Result<bool> {
        Ok(true)
    }
}

/// Snapshot isolation with first-committer-wins
pub struct SnapshotIsolationManager {
    store: Arc<VersionStore>,
}

impl SnapshotIsolationManager {
    pub fn new(store: Arc<VersionStore>) -> Self {
        Self { store }
    }
}

impl ConsistencyManager for SnapshotIsolationManager {
    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::Snapshot
    }

    fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    fn snapshot_boundary(&self, txn: &TransactionRecord) -> i64 {
        txn.snapshot_ts
    }

    fn validate_transaction(&self, tid: &TxnId, read_set: &ReadSet, write_set: &WriteSet) -> Result<bool> {
        if read_set.is_empty() && write_set.is_empty() {
            return Ok(true);
        }
        let snapshot_ts = snapshot_of(&self.store, tid)?;
        if let Some((winner, key)) = first_write_conflict(&self.store, tid, snapshot_ts, write_set) {
            warn!(txn = %tid, %winner, key = %key, "write-write conflict, rejecting");
            return Ok(false);
        }
        debug!(txn = %tid, "validated under snapshot isolation");
        Ok(true)
    }
}

/// Snapshot isolation plus read validation: every key read must still be
/// at the version observed, which rules out write skew.
pub struct SerializableManager {
    store: Arc<VersionStore>,
}

impl SerializableManager {
    pub fn new(store: Arc<VersionStore>) -> Self {
        Self { store }
    }
}

impl ConsistencyManager for SerializableManager {
    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    fn snapshot_boundary(&self, txn: &TransactionRecord) -> i64 {
        txn.snapshot_ts
    }

    fn validate_transaction(&self, tid: &TxnId, read_set: &ReadSet, write_set: &WriteSet) -> Result<bool> {
        if read_set.is_empty() && write_set.is_empty() {
            return Ok(true);
        }
        let snapshot_ts = snapshot_of(&self.store, tid)?;
        if let Some((winner, key)) = first_write_conflict(&self.store, tid, snapshot_ts, write_set) {
            warn!(txn = %tid, %winner, key = %key, "write-write conflict, rejecting");
            return Ok(false);
        }
        for (key, observed) in read_set {
            let current = self.store.latest(key);
            if current.as_ref() != Some(observed) {
                warn!(
                    txn = %tid,
                    key = %key,
                    observed = %observed,
                    current = ?current.map(|v| v.to_string()),
                    "read version is stale, rejecting"
                );
                return Ok(false);
            }
        }
        debug!(txn = %tid, reads = read_set.len(), "validated as serializable");
        Ok(true)
    }
}
