//! Transaction Coordinator
//!
//! Drives transactions through Running -> Validating -> Committed/Aborted
//! on top of a consistency manager:
//! - reads resolve through the manager and hold a dependency until the
//!   transaction finishes
//! - writes are buffered and only reach storage on commit, each under its
//!   own storage key
//! - every exit path releases the dependencies the transaction acquired

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::consistency::{create_consistency_manager, ConsistencyConfig, ConsistencyManager, KeyVersion};
use crate::error::{ConsistencyError, Result};
use crate::keys::StorageVersionId;
use crate::replication::{CommitBroadcaster, CommitListener};
use crate::storage::StorageEngine;
use crate::store::VersionStore;
use crate::types::{TransactionRecord, TxnId};

/// Result of a commit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { commit_ts: i64 },
    /// Rejected by validation; the transaction is aborted
    Aborted,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

/// A running transaction and its buffered writes
struct Session {
    record: TransactionRecord,
    writes: HashMap<String, Vec<u8>>,
}

pub struct TransactionCoordinator {
    manager: Box<dyn ConsistencyManager>,
    storage: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn CommitListener>>,
    sessions: DashMap<TxnId, Session>,
    /// Validation and publication of a commit happen as one step
    commit_lock: Mutex<()>,
}

impl TransactionCoordinator {
    pub fn new(
        manager: Box<dyn ConsistencyManager>,
        storage: Arc<dyn StorageEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            storage,
            clock,
            listeners: Vec::new(),
            sessions: DashMap::new(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Manager chosen by `config.isolation`; peers in the config get a
    /// TCP commit broadcaster
    pub fn from_config(
        config: &ConsistencyConfig,
        store: Arc<VersionStore>,
        storage: Arc<dyn StorageEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = Self::new(create_consistency_manager(config, store), storage, clock);
        if config.peers.is_empty() {
            coordinator
        } else {
            coordinator.with_listener(Arc::new(CommitBroadcaster::from_config(config)))
        }
    }

    /// Notify `listener` of every local commit
    pub fn with_listener(mut self, listener: Arc<dyn CommitListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn manager(&self) -> &dyn ConsistencyManager {
        self.manager.as_ref()
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        self.manager.store()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Copy of a running transaction's record
    pub fn transaction(&self, id: &TxnId) -> Option<TransactionRecord> {
        self.sessions.get(id).map(|s| s.record.clone())
    }

    /// Start a transaction with a fresh snapshot
    pub fn begin(&self) -> Result<TxnId> {
        let id = TxnId::generate();
        let store = self.store();
        // Register before reading the clock: a reclamation pass that misses
        // this entry took its own timestamp before our snapshot.
        store.register_active(id.clone(), i64::MIN);
        // Under the commit lock every commit stamped below the snapshot is
        // already published.
        let snapshot_ts = {
            let _serial = self.commit_lock.lock();
            self.clock.now()
        };
        store.register_active(id.clone(), snapshot_ts);

        self.sessions.insert(
            id.clone(),
            Session {
                record: TransactionRecord::new(id.clone(), snapshot_ts),
                writes: HashMap::new(),
            },
        );
        debug!(txn = %id, snapshot_ts, "transaction started");
        Ok(id)
    }

    /// Read `key` as `id` sees it. `None` if no version is visible.
    ///
    /// The version is resolved and recorded under the session entry; the
    /// blob is fetched after the entry is released.
    pub fn read(&self, id: &TxnId, key: &str) -> Result<Option<Vec<u8>>> {
        let version = {
            let mut session = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| ConsistencyError::UnknownTransaction(id.clone()))?;

            if let Some(value) = session.writes.get(key) {
                return Ok(Some(value.clone()));
            }
            let resolved = match session.record.read_set.get(key).cloned() {
                Some(seen) => seen,
                None => match self.manager.get_valid_key_version(key, &session.record) {
                    Ok(KeyVersion::Committed(version)) => {
                        session.record.record_read(key, version.clone());
                        version
                    }
                    Ok(KeyVersion::OwnWrite(_)) => return Ok(session.writes.get(key).cloned()),
                    Err(ConsistencyError::NoVisibleVersion { .. }) => return Ok(None),
                    Err(e) => return Err(e),
                },
            };
            resolved
        };
        // the read dependency keeps the blob alive until the transaction ends
        self.fetch(&version).map(Some)
    }

    /// Buffer a write of `key`
    pub fn write(&self, id: &TxnId, key: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ConsistencyError::UnknownTransaction(id.clone()))?;
        session.record.record_write(key);
        session.writes.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Validate and, if admitted, publish the transaction
    pub fn commit(&self, id: &TxnId) -> Result<CommitOutcome> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| ConsistencyError::UnknownTransaction(id.clone()))?;
        let Session { mut record, writes } = session;
        record.begin_validation()?;

        let published = {
            let _serial = self.commit_lock.lock();

            let admitted = match self
                .manager
                .validate_transaction(&record.id, &record.read_set, &record.write_set)
            {
                Ok(admitted) => admitted,
                Err(e) => {
                    self.conclude_abort(record)?;
                    return Err(e);
                }
            };
            if !admitted {
                self.conclude_abort(record)?;
                return Ok(CommitOutcome::Aborted);
            }

            let commit_ts = self.clock.now();
            let written = match self.write_blobs(&record.id, commit_ts, writes) {
                Ok(written) => written,
                Err(e) => {
                    self.conclude_abort(record)?;
                    return Err(e);
                }
            };
            if let Err(e) = record.commit(commit_ts) {
                self.remove_blobs(&written);
                self.conclude_abort(record)?;
                return Err(e);
            }

            let txn = record.id.clone();
            let reads: Vec<StorageVersionId> = record.read_set.values().cloned().collect();
            match self.store().record_commit(record) {
                Ok(published) => published,
                Err(e) => {
                    warn!(txn = %txn, error = %e, "commit could not be recorded");
                    self.remove_blobs(&written);
                    // the failure is already being reported
                    let _ = self.release_versions(&txn, reads.iter());
                    self.store().unregister_active(&txn);
                    return Err(e);
                }
            }
        };

        let released = self.release_reads(&published);
        self.store().unregister_active(&published.id);
        released?;
        let commit_ts = published.commit_ts().unwrap_or_default();
        debug!(txn = %published.id, commit_ts, "transaction committed");

        let mut first_err = None;
        for listener in &self.listeners {
            if let Err(e) = listener.on_commit(&published) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(CommitOutcome::Committed { commit_ts }),
        }
    }

    /// Abort a running transaction
    pub fn abort(&self, id: &TxnId) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| ConsistencyError::UnknownTransaction(id.clone()))?;
        self.conclude_abort(session.record)
    }

    /// Install a commit produced by another node
    pub fn apply_remote_commit(&self, record: TransactionRecord) -> Result<()> {
        let _serial = self.commit_lock.lock();
        if let Some(ts) = record.commit_ts() {
            self.clock.observe(ts);
        }
        let record = self.store().record_commit(record)?;
        debug!(txn = %record.id, commit_ts = ?record.commit_ts(), "remote commit applied");
        Ok(())
    }

    fn fetch(&self, version: &StorageVersionId) -> Result<Vec<u8>> {
        self.storage
            .get(&version.storage_key_name())?
            .ok_or_else(|| ConsistencyError::Storage(format!("blob for {} is missing", version)))
    }

    /// Write every buffered value under its storage key, returning the keys
    /// written. On failure what was already written is removed.
    fn write_blobs(
        &self,
        id: &TxnId,
        commit_ts: i64,
        writes: HashMap<String, Vec<u8>>,
    ) -> Result<Vec<String>> {
        let mut written: Vec<String> = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            let storage_key = self.manager.get_storage_key_name(&key, commit_ts, id);
            if let Err(e) = self.storage.put(&storage_key, value) {
                self.remove_blobs(&written);
                return Err(e);
            }
            written.push(storage_key);
        }
        Ok(written)
    }

    fn remove_blobs(&self, storage_keys: &[String]) {
        for storage_key in storage_keys {
            if let Err(e) = self.storage.delete(storage_key) {
                warn!(storage_key = %storage_key, error = %e, "blob cleanup failed");
            }
        }
    }

    fn conclude_abort(&self, mut record: TransactionRecord) -> Result<()> {
        record.abort()?;
        let released = self.release_reads(&record);
        self.store().unregister_active(&record.id);
        debug!(txn = %record.id, "transaction aborted");
        self.store().finish(record)?;
        released
    }

    /// Drop every dependency taken by the transaction's reads. All are
    /// attempted; the first failure is returned.
    fn release_reads(&self, record: &TransactionRecord) -> Result<()> {
        self.release_versions(&record.id, record.read_set.values())
    }

    fn release_versions<'a>(
        &self,
        txn: &TxnId,
        versions: impl Iterator<Item = &'a StorageVersionId>,
    ) -> Result<()> {
        let mut first_err = None;
        for version in versions {
            if let Err(e) = self.manager.update_transaction_dependencies(version, true) {
                warn!(txn = %txn, version = %version, error = %e, "dependency release failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
