//! Version Reclamation
//!
//! A version is removed once it is superseded, nothing depends on it, and
//! no running transaction's snapshot could still select it. Reclaimed
//! versions lose their blob; ledger records nobody can observe are
//! compacted afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::keys::StorageVersionId;
use crate::storage::StorageEngine;
use crate::store::VersionStore;

/// What one reclamation pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub versions_reclaimed: usize,
    pub records_compacted: usize,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.versions_reclaimed == 0 && self.records_compacted == 0
    }
}

pub struct Reclaimer {
    store: Arc<VersionStore>,
    storage: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
}

impl Reclaimer {
    pub fn new(store: Arc<VersionStore>, storage: Arc<dyn StorageEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { store, storage, clock }
    }

    /// Timestamps at or below the horizon are visible to every running
    /// transaction and every one that starts later
    fn horizon(&self) -> i64 {
        // Clock before the active set: a transaction missing from the set
        // reads its snapshot after this.
        let now = self.clock.now();
        self.store
            .oldest_active_snapshot()
            .map_or(now, |oldest| oldest.min(now))
    }

    /// One full pass over every key
    pub fn run_once(&self) -> Result<GcReport> {
        let horizon = self.horizon();
        let keys = self.store.keys();

        let reclaimed: Vec<StorageVersionId> = keys
            .par_iter()
            .flat_map_iter(|key| self.reclaim_key(key, horizon))
            .collect();

        let mut first_err = None;
        for version in &reclaimed {
            if let Err(e) = self.storage.delete(&version.storage_key_name()) {
                warn!(version = %version, error = %e, "blob delete failed");
                first_err.get_or_insert(e);
            }
        }

        let report = GcReport {
            versions_reclaimed: reclaimed.len(),
            records_compacted: self.store.compact_ledger(),
        };
        if report.is_empty() {
            trace!(horizon, "reclamation pass found nothing");
        } else {
            info!(
                horizon,
                versions = report.versions_reclaimed,
                records = report.records_compacted,
                "reclamation pass"
            );
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Reclaim every version of `key` superseded at or below `horizon`
    fn reclaim_key(&self, key: &str, horizon: i64) -> Vec<StorageVersionId> {
        let mut removed = Vec::new();
        for version in self.store.versions(key) {
            let Some(next) = self.store.successor(&version) else {
                break;
            };
            if next.timestamp() > horizon {
                break;
            }
            let next_committed = self
                .store
                .lookup(next.txn())
                .map_or(false, |rec| rec.is_committed());
            if next_committed && self.store.reclaim(&version) {
                trace!(version = %version, "reclaimed");
                removed.push(version);
            }
        }
        removed
    }

    /// Run passes on a background thread every `interval` until the handle
    /// is stopped or dropped
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReclaimerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            debug!(?interval, "reclaimer started");
            loop {
                thread::park_timeout(interval);
                if flag.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = self.run_once() {
                    warn!(error = %e, "reclamation pass failed");
                }
            }
            debug!("reclaimer stopped");
        });
        ReclaimerHandle {
            stop,
            thread: Some(thread),
        }
    }
}

/// Owner of a background reclaimer thread
pub struct ReclaimerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReclaimerHandle {
    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("reclaimer thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for ReclaimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LogicalClock;
    use crate::storage::MemoryStorage;
    use crate::types::{TransactionRecord, TxnId};

    struct Fixture {
        store: Arc<VersionStore>,
        storage: Arc<MemoryStorage>,
        clock: Arc<LogicalClock>,
        reclaimer: Reclaimer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(VersionStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(LogicalClock::new(1_000));
        let reclaimer = Reclaimer::new(store.clone(), storage.clone(), clock.clone());
        Fixture { store, storage, clock, reclaimer }
    }

    fn commit(f: &Fixture, id: &str, ts: i64, key: &str) -> StorageVersionId {
        let mut rec = TransactionRecord::new(TxnId::new(id).unwrap(), ts - 1);
        rec.record_write(key);
        rec.begin_validation().unwrap();
        rec.commit(ts).unwrap();
        let v = StorageVersionId::new(key, ts, rec.id.clone());
        f.storage.put(&v.storage_key_name(), id.as_bytes().to_vec()).unwrap();
        f.store.record_commit(rec).unwrap();
        v
    }

    #[test]
    fn test_reclaims_superseded_versions() {
        let f = fixture();
        let s1 = commit(&f, "T1", 100, "x");
        let s2 = commit(&f, "T2", 110, "x");
        let s3 = commit(&f, "T3", 120, "x");
        commit(&f, "T4", 105, "y");

        let report = f.reclaimer.run_once().unwrap();
        assert_eq!(report.versions_reclaimed, 2);
        assert_eq!(report.records_compacted, 2);
        assert!(!f.store.is_indexed(&s1));
        assert!(!f.store.is_indexed(&s2));
        assert!(f.store.is_indexed(&s3));
        assert_eq!(f.storage.len(), 2, "x@120 and y@105 remain");

        assert!(f.reclaimer.run_once().unwrap().is_empty());
    }

    #[test]
    fn test_active_snapshot_holds_versions() {
        let f = fixture();
        let s1 = commit(&f, "T1", 100, "x");
        let s2 = commit(&f, "T2", 110, "x");
        f.store.register_active(TxnId::new("reader").unwrap(), 105);

        assert_eq!(f.reclaimer.run_once().unwrap().versions_reclaimed, 0);
        assert!(f.store.is_indexed(&s1));

        f.store.unregister_active(&TxnId::new("reader").unwrap());
        assert_eq!(f.reclaimer.run_once().unwrap().versions_reclaimed, 1);
        assert!(f.store.is_indexed(&s2));
    }

    #[test]
    fn test_dependency_holds_version() {
        let f = fixture();
        let s1 = commit(&f, "T1", 100, "x");
        f.store.acquire(&s1);
        commit(&f, "T2", 110, "x");

        assert_eq!(f.reclaimer.run_once().unwrap().versions_reclaimed, 0);
        f.store.release(&s1).unwrap();
        assert_eq!(f.reclaimer.run_once().unwrap().versions_reclaimed, 1);
        assert!(f.storage.get(&s1.storage_key_name()).unwrap().is_none());
    }

    #[test]
    fn test_horizon_never_exceeds_clock() {
        let f = fixture();
        let s1 = commit(&f, "T1", 100, "x");
        // successor stamped ahead of the local clock
        commit(&f, "T2", 5_000, "x");
        assert!(f.clock.current() < 5_000);

        assert_eq!(f.reclaimer.run_once().unwrap().versions_reclaimed, 0);
        f.clock.observe(5_000);
        assert_eq!(f.reclaimer.run_once().unwrap().versions_reclaimed, 1);
        assert!(!f.store.is_indexed(&s1));
    }

    #[test]
    fn test_background_thread_stops() {
        let f = fixture();
        let s1 = commit(&f, "T1", 100, "x");
        commit(&f, "T2", 110, "x");

        let reclaimer = Arc::new(Reclaimer::new(f.store.clone(), f.storage.clone(), f.clock.clone()));
        let mut handle = reclaimer.spawn(Duration::from_millis(5));
        for _ in 0..400 {
            if !f.store.is_indexed(&s1) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!f.store.is_indexed(&s1));
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
    }
}
