//! Transaction Ledger
//!
//! Terminal records of finished transactions, plus a commit-timestamp
//! ordered view of the committed ones for conflict checks.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::error;

use crate::error::{ConsistencyError, Result};
use crate::types::{TransactionRecord, TxnId};

pub struct TransactionLedger {
    records: DashMap<TxnId, Arc<TransactionRecord>>,
    /// commit_ts -> records committed at that timestamp
    commits: RwLock<BTreeMap<i64, Vec<Arc<TransactionRecord>>>>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            commits: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert a terminal record. A second record for the same id is a fault.
    pub fn finish(&self, record: TransactionRecord) -> Result<Arc<TransactionRecord>> {
        if !record.state().is_terminal() {
            return Err(ConsistencyError::NotTerminal(record.id.clone()));
        }

        let record = Arc::new(record);
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(existing) => {
                error!(
                    txn = %record.id,
                    existing = %existing.get().state(),
                    "duplicate terminal ledger record"
                );
                return Err(ConsistencyError::DuplicateLedgerEntry {
                    txn: record.id.clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&record));
            }
        }

        if let Some(ts) = record.commit_ts() {
            self.commits
                .write()
                .entry(ts)
                .or_default()
                .push(Arc::clone(&record));
        }
        Ok(record)
    }

    pub fn lookup(&self, id: &TxnId) -> Option<Arc<TransactionRecord>> {
        self.records.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, id: &TxnId) -> bool {
        self.records.contains_key(id)
    }

    /// Commit timestamp of `id` if it is Committed
    pub fn commit_ts_of(&self, id: &TxnId) -> Option<i64> {
        self.records
            .get(id)
            .filter(|r| r.is_committed())
            .and_then(|r| r.commit_ts())
    }

    /// Committed records with commit timestamp strictly greater than `ts`
    pub fn committed_after(&self, ts: i64) -> Vec<Arc<TransactionRecord>> {
        self.commits
            .read()
            .range((Bound::Excluded(ts), Bound::Unbounded))
            .flat_map(|(_, recs)| recs.iter().cloned())
            .collect()
    }

    /// Snapshot of every record currently held
    pub fn records(&self) -> Vec<Arc<TransactionRecord>> {
        self.records.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Drop a record once nothing can depend on it anymore
    pub(crate) fn compact(&self, id: &TxnId) -> bool {
        let Some((_, record)) = self.records.remove(id) else {
            return false;
        };
        if let Some(ts) = record.commit_ts() {
            let mut commits = self.commits.write();
            if let Some(at_ts) = commits.get_mut(&ts) {
                at_ts.retain(|r| r.id != *id);
                if at_ts.is_empty() {
                    commits.remove(&ts);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for TransactionLedger {
    fn default() -> Self {
        Self::new()
    }
}
