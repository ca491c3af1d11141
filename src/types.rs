//! Transaction identity, lifecycle state and records.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ConsistencyError, Result};
use crate::keys::{StorageVersionId, KEY_SEPARATOR};

/// Logical key -> storage version the transaction actually observed
pub type ReadSet = HashMap<String, StorageVersionId>;

/// Logical keys the transaction wrote
pub type WriteSet = BTreeSet<String>;

/// Globally unique transaction identifier.
///
/// Compared byte-wise, which is the tie-breaker for versions committed at
/// the same timestamp. Never empty and never contains [`KEY_SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxnId(String);

impl TxnId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains(KEY_SEPARATOR) {
            return Err(ConsistencyError::InvalidTransactionId(id));
        }
        Ok(Self(id))
    }

    /// Fresh random (uuid v4) identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TxnId {
    type Error = ConsistencyError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TxnId> for String {
    fn from(id: TxnId) -> Self {
        id.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction lifecycle
///
/// ```text
/// Running ──commit request──> Validating ──admit──> Committed
///   │                             │
///   └────────────abort────────────┴──reject──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnState {
    Running,
    Validating,
    Committed,
    Aborted,
}

impl TxnState {
    /// Committed and Aborted never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }

    fn can_move_to(&self, next: TxnState) -> bool {
        matches!(
            (self, next),
            (TxnState::Running, TxnState::Validating)
                | (TxnState::Running, TxnState::Aborted)
                | (TxnState::Validating, TxnState::Committed)
                | (TxnState::Validating, TxnState::Aborted)
        )
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Running => write!(f, "RUNNING"),
            TxnState::Validating => write!(f, "VALIDATING"),
            TxnState::Committed => write!(f, "COMMITTED"),
            TxnState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A transaction as seen by the consistency core.
///
/// Mutated only by its own coordinator until it reaches a terminal state,
/// immutable afterwards (the ledger stores it behind an `Arc`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxnId,
    state: TxnState,
    /// Upper bound on commit timestamps this transaction may observe
    pub snapshot_ts: i64,
    commit_ts: Option<i64>,
    pub read_set: ReadSet,
    pub write_set: WriteSet,
}

impl TransactionRecord {
    /// Create a running transaction
    pub fn new(id: TxnId, snapshot_ts: i64) -> Self {
        Self {
            id,
            state: TxnState::Running,
            snapshot_ts,
            commit_ts: None,
            read_set: ReadSet::new(),
            write_set: WriteSet::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Set only once the record is Committed
    pub fn commit_ts(&self) -> Option<i64> {
        self.commit_ts
    }

    pub fn is_committed(&self) -> bool {
        self.state == TxnState::Committed
    }

    /// Record the version observed for `key`
    pub fn record_read(&mut self, key: impl Into<String>, version: StorageVersionId) {
        self.read_set.insert(key.into(), version);
    }

    /// Record a write of `key`
    pub fn record_write(&mut self, key: impl Into<String>) {
        self.write_set.insert(key.into());
    }

    /// Running -> Validating
    pub fn begin_validation(&mut self) -> Result<()> {
        self.transition(TxnState::Validating)
    }

    /// Validating -> Committed at `commit_ts`
    pub fn commit(&mut self, commit_ts: i64) -> Result<()> {
        self.transition(TxnState::Committed)?;
        self.commit_ts = Some(commit_ts);
        Ok(())
    }

    /// Running | Validating -> Aborted
    pub fn abort(&mut self) -> Result<()> {
        self.transition(TxnState::Aborted)
    }

    fn transition(&mut self, to: TxnState) -> Result<()> {
        if !self.state.can_move_to(to) {
            return Err(ConsistencyError::IllegalTransition {
                txn: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Storage versions this transaction produced. Empty unless Committed.
    pub fn produced_versions(&self) -> SmallVec<[StorageVersionId; 8]> {
        match (self.state, self.commit_ts) {
            (TxnState::Committed, Some(ts)) => self
                .write_set
                .iter()
                .map(|key| StorageVersionId::new(key.clone(), ts, self.id.clone()))
                .collect(),
            _ => SmallVec::new(),
        }
    }
}
