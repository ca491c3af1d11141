//! Tests for version visibility, commit validation and reclamation safety
//! Covers TC-1.1 .. TC-1.5
//!
//! Run individual groups with:
//! cargo test tc_1_1 -- --nocapture
//! cargo test consistency_scenarios -- --nocapture

use std::sync::Arc;

use aft_core::consistency::{
    ConsistencyManager, KeyVersion, SerializableManager, SnapshotIsolationManager,
};
use aft_core::{
    compare_keys, ConsistencyError, ReadSet, StorageVersionId, TransactionRecord, TxnId,
    VersionStore, WriteSet,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

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

fn running(store: &VersionStore, id: &str, snapshot: i64) -> TransactionRecord {
    store.register_active(tid(id), snapshot);
    TransactionRecord::new(tid(id), snapshot)
}

fn committed_version(kv: KeyVersion) -> StorageVersionId {
    kv.committed().cloned().expect("expected a committed version")
}

mod tc_1_1_visibility {
    use super::*;

    #[test]
    fn test_snapshot_sees_dominant_committed_version() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());

        commit(&store, "T1", 0, 100, &["x"]);
        let t2 = running(&store, "T2", 150);
        let s1 = committed_version(mgr.get_valid_key_version("x", &t2).unwrap());
        assert_eq!(s1, StorageVersionId::new("x", 100, tid("T1")));

        commit(&store, "T3", 0, 120, &["x"]);
        let s2 = committed_version(mgr.get_valid_key_version("x", &t2).unwrap());
        assert_eq!(s2, StorageVersionId::new("x", 120, tid("T3")));
        assert!(s2.dominates(&s1));

        // a commit past the boundary is not visible
        commit(&store, "T9", 0, 151, &["x"]);
        let still = committed_version(mgr.get_valid_key_version("x", &t2).unwrap());
        assert_eq!(still, s2);

        for v in [&s1, &s2, &still] {
            mgr.update_transaction_dependencies(v, true).unwrap();
        }
    }

    #[test]
    fn test_no_visible_version() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());
        commit(&store, "T1", 0, 300, &["x"]);

        let early = running(&store, "E", 200);
        let err = mgr.get_valid_key_version("x", &early).unwrap_err();
        assert!(matches!(err, ConsistencyError::NoVisibleVersion { .. }));
        assert!(!err.is_fault());
    }

    #[test]
    fn test_visibility_is_monotonic_in_snapshot() {
        let mut rng = StdRng::seed_from_u64(7);
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());

        for i in 0..200 {
            let ts = rng.gen_range(1..1_000);
            let key = format!("k{}", rng.gen_range(0..5));
            let mut rec = TransactionRecord::new(tid(&format!("T{}", i)), 0);
            rec.record_write(key.as_str());
            rec.begin_validation().unwrap();
            rec.commit(ts).unwrap();
            // duplicate ids are impossible here; timestamps may collide
            store.record_commit(rec).unwrap();
        }

        for key in ["k0", "k1", "k2", "k3", "k4"] {
            let mut prev: Option<StorageVersionId> = None;
            for snap in (0..1_100).step_by(37) {
                let Some(v) = store.select_visible(key, snap) else {
                    assert!(prev.is_none(), "visibility never disappears as the snapshot grows");
                    continue;
                };
                assert!(v.timestamp() <= snap);
                if let Some(p) = &prev {
                    assert!(v == *p || v.dominates(p));
                }
                prev = Some(v);
            }
        }
        drop(mgr);
    }
}

mod tc_1_2_snapshot_validation {
    use super::*;

    #[test]
    fn test_first_committer_wins() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());

        running(&store, "T4", 200);
        running(&store, "T5", 205);
        let writes: WriteSet = ["y".to_string()].into_iter().collect();

        assert!(mgr.validate_transaction(&tid("T4"), &ReadSet::new(), &writes).unwrap());
        commit(&store, "T4", 200, 210, &["y"]);
        store.unregister_active(&tid("T4"));

        assert!(!mgr.validate_transaction(&tid("T5"), &ReadSet::new(), &writes).unwrap());
    }

    #[test]
    fn test_disjoint_writes_both_commit() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());
        running(&store, "A", 10);
        running(&store, "B", 10);

        commit(&store, "A", 10, 20, &["a"]);
        let writes: WriteSet = ["b".to_string()].into_iter().collect();
        assert!(mgr.validate_transaction(&tid("B"), &ReadSet::new(), &writes).unwrap());
    }

    #[test]
    fn test_empty_transaction_always_commits() {
        let store = Arc::new(VersionStore::new());
        let mgr = SerializableManager::new(store);
        // not even registered
        assert!(mgr
            .validate_transaction(&tid("ghost"), &ReadSet::new(), &WriteSet::new())
            .unwrap());
    }
}

mod tc_1_3_serializable_validation {
    use super::*;

    #[test]
    fn test_stale_read_rejected() {
        let store = Arc::new(VersionStore::new());
        let mgr = SerializableManager::new(store.clone());
        commit(&store, "T1", 0, 100, &["x", "y"]);

        let mut t = running(&store, "R", 150);
        let seen = committed_version(mgr.get_valid_key_version("x", &t).unwrap());
        t.record_read("x", seen.clone());
        t.record_write("y");

        commit(&store, "W", 140, 160, &["x"]);
        assert!(!mgr
            .validate_transaction(&t.id, &t.read_set, &t.write_set)
            .unwrap());
        mgr.update_transaction_dependencies(&seen, true).unwrap();
    }

    #[test]
    fn test_current_reads_admitted() {
        let store = Arc::new(VersionStore::new());
        let mgr = SerializableManager::new(store.clone());
        commit(&store, "T1", 0, 100, &["x"]);

        let mut t = running(&store, "R", 150);
        let seen = committed_version(mgr.get_valid_key_version("x", &t).unwrap());
        t.record_read("x", seen.clone());
        t.record_write("z");
        assert!(mgr
            .validate_transaction(&t.id, &t.read_set, &t.write_set)
            .unwrap());
        mgr.update_transaction_dependencies(&seen, true).unwrap();
    }
}

mod tc_1_4_reclamation_safety {
    use super::*;

    #[test]
    fn test_dependency_blocks_reclaim() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());
        commit(&store, "T1", 0, 100, &["x"]);

        let t6 = running(&store, "T6", 110);
        let s1 = committed_version(mgr.get_valid_key_version("x", &t6).unwrap());
        commit(&store, "T3", 0, 120, &["x"]);

        assert!(!store.can_reclaim(&s1));
        mgr.update_transaction_dependencies(&s1, true).unwrap();
        assert!(store.can_reclaim(&s1));
    }

    #[test]
    fn test_unmatched_release_is_a_fault() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store.clone());
        commit(&store, "T1", 0, 100, &["x"]);
        let s1 = store.latest("x").unwrap();

        let err = mgr.update_transaction_dependencies(&s1, true).unwrap_err();
        assert!(matches!(err, ConsistencyError::RefcountUnderflow { .. }));
        assert!(err.is_fault());
        assert_eq!(store.dependents(&s1), 0);
    }

    #[test]
    fn test_concurrent_readers_and_reclaimer() {
        use std::thread;

        let store = Arc::new(VersionStore::new());
        for i in 0..50 {
            commit(&store, &format!("T{}", i), 0, 100 + i, &["hot"]);
        }

        let readers: Vec<_> = (0..4)
            .map(|r| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mgr = SnapshotIsolationManager::new(store.clone());
                    let t = running(&store, &format!("reader{}", r), i64::MAX - 1);
                    for _ in 0..500 {
                        let kv = mgr.get_valid_key_version("hot", &t).unwrap();
                        let v = kv.committed().unwrap().clone();
                        // held versions stay indexed until released
                        assert!(store.is_indexed(&v));
                        mgr.update_transaction_dependencies(&v, true).unwrap();
                    }
                })
            })
            .collect();

        let reclaimer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut removed = 0;
                for _ in 0..200 {
                    for v in store.versions("hot") {
                        if store.reclaim(&v) {
                            removed += 1;
                        }
                    }
                }
                removed
            })
        };

        for r in readers {
            r.join().unwrap();
        }
        let removed = reclaimer.join().unwrap();
        assert!(removed <= 49);
        assert_eq!(store.versions("hot").last(), store.latest("hot").as_ref());
    }
}

mod tc_1_5_storage_keys {
    use super::*;

    #[test]
    fn test_storage_key_helpers() {
        let store = Arc::new(VersionStore::new());
        let mgr = SnapshotIsolationManager::new(store);

        let newer = mgr.get_storage_key_name("a|b", 120, &tid("T3"));
        let older = mgr.get_storage_key_name("a|b", 100, &tid("T1"));
        assert!(mgr.compare_keys(&newer, &older).unwrap());
        assert!(!mgr.compare_keys(&older, &newer).unwrap());
        assert!(!compare_keys(&newer, &newer).unwrap());

        let parsed = StorageVersionId::parse(&newer).unwrap();
        assert_eq!(parsed.key(), "a|b");
        assert_eq!(parsed.timestamp(), 120);

        assert!(matches!(
            compare_keys("not-a-storage-key", &older),
            Err(ConsistencyError::MalformedStorageKey(_))
        ));
    }
}
