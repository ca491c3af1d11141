//! Shared Version Store
//!
//! The four pieces of shared state behind the consistency managers:
//! version index, latest-version index, transaction ledger and dependency
//! tracker. Each is internally synchronized; `VersionStore` composes them
//! and only exposes operations that keep them mutually consistent.
//!
//! Lock order when more than one is held: dependencies -> versions ->
//! latest / ledger. Nothing holds a ledger or latest guard while taking
//! another store's lock.

mod dependencies;
mod ledger;
mod version_index;

pub use dependencies::DependencyTracker;
pub use ledger::TransactionLedger;
pub use version_index::{LatestVersionIndex, VersionIndex};

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{ConsistencyError, Result};
use crate::keys::StorageVersionId;
use crate::types::{TransactionRecord, TxnId, TxnState};

pub struct VersionStore {
    versions: VersionIndex,
    latest: LatestVersionIndex,
    ledger: TransactionLedger,
    dependencies: DependencyTracker,
    /// Running transactions -> snapshot timestamp
    active: DashMap<TxnId, i64>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            versions: VersionIndex::new(),
            latest: LatestVersionIndex::new(),
            ledger: TransactionLedger::new(),
            dependencies: DependencyTracker::new(),
            active: DashMap::new(),
        }
    }

    // --- running transactions ---

    /// Register (or re-stamp) a running transaction's snapshot
    pub fn register_active(&self, id: TxnId, snapshot_ts: i64) {
        self.active.insert(id, snapshot_ts);
    }

    pub fn unregister_active(&self, id: &TxnId) -> bool {
        self.active.remove(id).is_some()
    }

    pub fn snapshot_of(&self, id: &TxnId) -> Option<i64> {
        self.active.get(id).map(|ts| *ts)
    }

    /// Reclamation horizon: no running transaction reads below this
    pub fn oldest_active_snapshot(&self) -> Option<i64> {
        self.active.iter().map(|e| *e.value()).min()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // --- reads ---

    /// Dominant version of `key` whose producer is Committed with
    /// commit timestamp <= `boundary`
    pub fn select_visible(&self, key: &str, boundary: i64) -> Option<StorageVersionId> {
        self.versions.find_newest(key, |v| {
            self.ledger
                .commit_ts_of(v.txn())
                .map(|ts| ts <= boundary)
                .unwrap_or(false)
        })
    }

    /// Select the visible version and take a dependency on it.
    ///
    /// Optimistic: after acquiring, the version must still be indexed;
    /// if a reclamation removed it in between, release and select again.
    pub fn select_and_acquire(&self, key: &str, boundary: i64) -> Result<Option<StorageVersionId>> {
        loop {
            let Some(candidate) = self.select_visible(key, boundary) else {
                return Ok(None);
            };
            self.dependencies.acquire(&candidate);
            if self.versions.contains(&candidate) {
                trace!(key, version = %candidate, "selected and acquired");
                return Ok(Some(candidate));
            }
            trace!(key, version = %candidate, "version reclaimed during selection, retrying");
            self.dependencies.release(&candidate)?;
        }
    }

    pub fn latest(&self, key: &str) -> Option<StorageVersionId> {
        self.latest.latest(key)
    }

    pub fn versions(&self, key: &str) -> Vec<StorageVersionId> {
        self.versions.versions(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.versions.keys()
    }

    pub fn is_indexed(&self, version: &StorageVersionId) -> bool {
        self.versions.contains(version)
    }

    pub fn successor(&self, version: &StorageVersionId) -> Option<StorageVersionId> {
        self.versions.successor(version)
    }

    pub fn lookup(&self, id: &TxnId) -> Option<Arc<TransactionRecord>> {
        self.ledger.lookup(id)
    }

    pub fn committed_after(&self, ts: i64) -> Vec<Arc<TransactionRecord>> {
        self.ledger.committed_after(ts)
    }

    // --- writes ---

    /// Publish a Committed record: index its versions, then finish it in
    /// the ledger. Readers filter by the ledger, so versions become
    /// visible only once the record lands.
    pub fn record_commit(&self, record: TransactionRecord) -> Result<Arc<TransactionRecord>> {
        if record.state() != TxnState::Committed {
            return Err(ConsistencyError::IllegalTransition {
                txn: record.id.clone(),
                from: record.state(),
                to: TxnState::Committed,
            });
        }
        if self.ledger.contains(&record.id) {
            return Err(ConsistencyError::DuplicateLedgerEntry {
                txn: record.id.clone(),
            });
        }

        for version in record.produced_versions() {
            self.index_version(version);
        }
        let record = self.ledger.finish(record)?;
        debug!(
            txn = %record.id,
            commit_ts = ?record.commit_ts(),
            writes = record.write_set.len(),
            "commit recorded"
        );
        Ok(record)
    }

    /// Finish a non-committed terminal record (aborts)
    pub fn finish(&self, record: TransactionRecord) -> Result<Arc<TransactionRecord>> {
        self.ledger.finish(record)
    }

    fn index_version(&self, version: StorageVersionId) {
        let latest = &self.latest;
        self.versions.record_with(version, |v| {
            if latest.offer(v) {
                trace!(version = %v, "latest version moved");
            }
        });
    }

    // --- dependencies ---

    pub fn acquire(&self, version: &StorageVersionId) -> usize {
        self.dependencies.acquire(version)
    }

    pub fn release(&self, version: &StorageVersionId) -> Result<usize> {
        self.dependencies.release(version)
    }

    pub fn dependents(&self, version: &StorageVersionId) -> usize {
        self.dependencies.count(version)
    }

    // --- reclamation ---

    /// Dominated by a newer version of the same key whose producer is Committed
    fn is_dominated(&self, version: &StorageVersionId) -> bool {
        match self.latest.latest(version.key()) {
            Some(latest) => latest.dominates(version) && self.ledger.commit_ts_of(latest.txn()).is_some(),
            None => false,
        }
    }

    /// No dependents and no longer the latest committed version
    pub fn can_reclaim(&self, version: &StorageVersionId) -> bool {
        self.dependencies.count(version) == 0 && self.is_dominated(version)
    }

    /// Remove `version` from the indexes if [`can_reclaim`](Self::can_reclaim)
    /// holds, atomically with respect to `acquire`. Returns true if removed.
    pub fn reclaim(&self, version: &StorageVersionId) -> bool {
        self.dependencies
            .with_unreferenced(version, || self.is_dominated(version) && self.versions.remove(version))
            .unwrap_or(false)
    }

    /// Drop ledger records nothing can observe anymore: aborted records, and
    /// committed records none of whose versions are still indexed.
    pub fn compact_ledger(&self) -> usize {
        let mut compacted = 0;
        for record in self.ledger.records() {
            let dead = match record.state() {
                TxnState::Aborted => true,
                TxnState::Committed => record
                    .produced_versions()
                    .iter()
                    .all(|v| !self.versions.contains(v)),
                _ => false,
            };
            if dead && self.ledger.compact(&record.id) {
                compacted += 1;
            }
        }
        compacted
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    pub fn version_count(&self) -> usize {
        self.versions.version_count()
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TxnId {
        TxnId::new(s).unwrap()
    }

    fn commit(store: &VersionStore, id: &str, snapshot: i64, ts: i64, writes: &[&str]) {
        let mut rec = TransactionRecord::new(tid(id), snapshot);
        for w in writes {
            rec.record_write(*w);
        }
        rec.begin_validation().unwrap();
        rec.commit(ts).unwrap();
        store.record_commit(rec).unwrap();
    }

    #[test]
    fn test_latest_tracks_dominant_version() {
        let store = VersionStore::new();
        commit(&store, "T1", 0, 100, &["x"]);
        commit(&store, "T3", 0, 120, &["x"]);
        commit(&store, "T2", 0, 110, &["x"]);

        let dominant = store.versions("x").into_iter().max().unwrap();
        assert_eq!(store.latest("x"), Some(dominant));
        assert_eq!(store.latest("x").unwrap().timestamp(), 120);
    }

    #[test]
    fn test_select_respects_boundary() {
        let store = VersionStore::new();
        commit(&store, "T1", 0, 100, &["x"]);
        commit(&store, "T3", 0, 120, &["x"]);

        assert_eq!(store.select_visible("x", 99), None);
        assert_eq!(store.select_visible("x", 110).unwrap().txn().as_str(), "T1");
        assert_eq!(store.select_visible("x", 150).unwrap().txn().as_str(), "T3");
    }

    #[test]
    fn test_versions_without_ledger_record_are_invisible() {
        let store = VersionStore::new();
        store.index_version(StorageVersionId::new("x", 10, tid("ghost")));
        assert_eq!(store.select_visible("x", i64::MAX), None);
    }

    #[test]
    fn test_record_commit_rejects_aborted_and_duplicates() {
        let store = VersionStore::new();
        let mut aborted = TransactionRecord::new(tid("A"), 0);
        aborted.record_write("x");
        aborted.abort().unwrap();
        assert!(store.record_commit(aborted.clone()).is_err());
        store.finish(aborted).unwrap();
        assert!(store.versions("x").is_empty());

        commit(&store, "T1", 0, 100, &["x"]);
        let mut again = TransactionRecord::new(tid("T1"), 0);
        again.begin_validation().unwrap();
        again.commit(100).unwrap();
        assert!(matches!(
            store.record_commit(again),
            Err(ConsistencyError::DuplicateLedgerEntry { .. })
        ));
    }

    #[test]
    fn test_reclaim_gated_by_dependencies_and_dominance() {
        let store = VersionStore::new();
        commit(&store, "T1", 0, 100, &["x"]);
        let s1 = store.select_and_acquire("x", 150).unwrap().unwrap();

        // S1 is still latest: never reclaimable
        assert!(!store.can_reclaim(&s1));

        commit(&store, "T3", 0, 120, &["x"]);
        // dominated, but depended on
        assert!(!store.can_reclaim(&s1));
        assert!(!store.reclaim(&s1));

        store.release(&s1).unwrap();
        assert!(store.can_reclaim(&s1));
        assert!(store.reclaim(&s1));
        assert!(!store.is_indexed(&s1));

        let s2 = store.latest("x").unwrap();
        assert!(!store.can_reclaim(&s2));
        assert!(!store.reclaim(&s2));
    }

    #[test]
    fn test_compact_ledger() {
        let store = VersionStore::new();
        commit(&store, "T1", 0, 100, &["x"]);
        commit(&store, "T2", 0, 120, &["x"]);
        let mut aborted = TransactionRecord::new(tid("A"), 0);
        aborted.abort().unwrap();
        store.finish(aborted).unwrap();

        assert_eq!(store.compact_ledger(), 1, "only the aborted record goes");

        let s1 = StorageVersionId::new("x", 100, tid("T1"));
        assert!(store.reclaim(&s1));
        assert_eq!(store.compact_ledger(), 1);
        assert!(store.lookup(&tid("T1")).is_none());
        assert!(store.lookup(&tid("T2")).is_some());
    }

    #[test]
    fn test_oldest_active_snapshot() {
        let store = VersionStore::new();
        assert_eq!(store.oldest_active_snapshot(), None);
        store.register_active(tid("a"), 50);
        store.register_active(tid("b"), 20);
        assert_eq!(store.oldest_active_snapshot(), Some(20));
        store.unregister_active(&tid("b"));
        assert_eq!(store.oldest_active_snapshot(), Some(50));
    }
}
