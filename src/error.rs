use thiserror::Error;

use crate::keys::StorageVersionId;
use crate::types::{TxnId, TxnState};

#[derive(Error, Debug)]
pub enum ConsistencyError {
    #[error("No visible version of key '{key}' for transaction {txn}")]
    NoVisibleVersion { key: String, txn: TxnId },

    #[error("Dependency refcount underflow on version {version}")]
    RefcountUnderflow { version: StorageVersionId },

    #[error("Transaction {txn} already has a terminal ledger record")]
    DuplicateLedgerEntry { txn: TxnId },

    #[error("Transport unavailable for {address}: {source}")]
    TransportUnavailable {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed storage key: {0}")]
    MalformedStorageKey(String),

    #[error("Invalid transaction id: {0:?}")]
    InvalidTransactionId(String),

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxnId),

    #[error("Transaction {txn} cannot move from {from} to {to}")]
    IllegalTransition { txn: TxnId, from: TxnState, to: TxnState },

    #[error("Transaction {0} is not in a terminal state")]
    NotTerminal(TxnId),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ConsistencyError {
    /// True for faults that indicate a broken internal invariant rather than
    /// an expected, recoverable outcome.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ConsistencyError::RefcountUnderflow { .. }
                | ConsistencyError::DuplicateLedgerEntry { .. }
                | ConsistencyError::IllegalTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsistencyError>;

impl From<bincode::Error> for ConsistencyError {
    fn from(err: bincode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<serde_json::Error> for ConsistencyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
