//! Storage Key Naming and Dominance
//!
//! Every committed write lives at its own immutable storage address:
//!
//! ```text
//! <logical key>|<timestamp: 20 digits>|<transaction id>
//! ```
//!
//! The timestamp is the i64 commit timestamp with its sign bit flipped,
//! printed as a zero-padded u64, so lexicographic order of the encoded
//! field equals numeric order (negative timestamps included). Decoding
//! splits from the right, which lets logical keys contain `|`; transaction
//! ids cannot (see [`TxnId::new`]).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConsistencyError, Result};
use crate::types::TxnId;

/// Field separator of the canonical storage key
pub const KEY_SEPARATOR: char = '|';

const TIMESTAMP_WIDTH: usize = 20;
const SIGN_BIT: u64 = 1 << 63;

/// Fixed-width, order-preserving rendering of a timestamp
pub fn encode_timestamp(ts: i64) -> String {
    format!("{:0width$}", (ts as u64) ^ SIGN_BIT, width = TIMESTAMP_WIDTH)
}

pub fn decode_timestamp(field: &str) -> Result<i64> {
    if field.len() != TIMESTAMP_WIDTH || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConsistencyError::MalformedStorageKey(format!(
            "timestamp field {:?} is not {} digits",
            field, TIMESTAMP_WIDTH
        )));
    }
    let raw: u64 = field
        .parse()
        .map_err(|_| ConsistencyError::MalformedStorageKey(format!("timestamp {:?} overflows", field)))?;
    Ok((raw ^ SIGN_BIT) as i64)
}

/// Canonical storage address for one committed write
pub fn storage_key_name(key: &str, timestamp: i64, txn: &TxnId) -> String {
    format!(
        "{key}{sep}{ts}{sep}{txn}",
        sep = KEY_SEPARATOR,
        ts = encode_timestamp(timestamp),
    )
}

/// True iff storage key `one` dominates storage key `two`.
///
/// Both strings must have been produced by [`storage_key_name`].
pub fn compare_keys(one: &str, two: &str) -> Result<bool> {
    let one = StorageVersionId::parse(one)?;
    let two = StorageVersionId::parse(two)?;
    Ok(one.dominates(&two))
}

/// Immutable identifier of one committed write: (key, commit timestamp, producer).
///
/// `Ord` ranks by dominance first (timestamp, then transaction id); the
/// logical key only breaks ties between ids of different keys so the order
/// stays consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageVersionId {
    key: String,
    timestamp: i64,
    txn: TxnId,
}

impl StorageVersionId {
    pub fn new(key: impl Into<String>, timestamp: i64, txn: TxnId) -> Self {
        Self {
            key: key.into(),
            timestamp,
            txn,
        }
    }

    /// Decode a canonical storage key
    pub fn parse(storage_key: &str) -> Result<Self> {
        let mut parts = storage_key.rsplitn(3, KEY_SEPARATOR);
        let (txn, ts, key) = match (parts.next(), parts.next(), parts.next()) {
            (Some(txn), Some(ts), Some(key)) => (txn, ts, key),
            _ => {
                return Err(ConsistencyError::MalformedStorageKey(storage_key.to_string()));
            }
        };
        let timestamp = decode_timestamp(ts)?;
        let txn = TxnId::new(txn)
            .map_err(|_| ConsistencyError::MalformedStorageKey(storage_key.to_string()))?;
        Ok(Self::new(key, timestamp, txn))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn txn(&self) -> &TxnId {
        &self.txn
    }

    /// Physical storage address
    pub fn storage_key_name(&self) -> String {
        storage_key_name(&self.key, self.timestamp, &self.txn)
    }

    /// Greater timestamp wins; equal timestamps fall back to the byte-wise
    /// greater transaction id.
    pub fn dominates(&self, other: &StorageVersionId) -> bool {
        (self.timestamp, &self.txn) > (other.timestamp, &other.txn)
    }
}

impl Ord for StorageVersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.txn.cmp(&other.txn))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for StorageVersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StorageVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key_name())
    }
}
