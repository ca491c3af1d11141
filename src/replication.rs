//! Commit Notification
//!
//! Committed records are pushed to peers so any node that learns of a
//! commit can index it locally; dominance makes the order of arrival
//! irrelevant.

use tracing::{debug, warn};

use crate::consistency::ConsistencyConfig;
use crate::error::{ConsistencyError, Result};
use crate::transport::{Connector, PushChannel, SocketCache, TcpConnector};
use crate::types::{TransactionRecord, TxnState};

/// Told about every local commit after it is recorded
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, record: &TransactionRecord) -> Result<()>;
}

pub fn encode_commit(record: &TransactionRecord) -> Result<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

/// Decode a pushed record; anything but a Committed record is rejected
pub fn decode_commit(bytes: &[u8]) -> Result<TransactionRecord> {
    let record: TransactionRecord = bincode::deserialize(bytes)?;
    if record.state() != TxnState::Committed || record.commit_ts().is_none() {
        return Err(ConsistencyError::Encode(format!(
            "pushed record {} is {}, expected a commit",
            record.id,
            record.state()
        )));
    }
    Ok(record)
}

/// Pushes committed records to a fixed set of peers
pub struct CommitBroadcaster<C: Connector> {
    peers: Vec<String>,
    sockets: SocketCache<C>,
}

impl<C: Connector> CommitBroadcaster<C> {
    pub fn new(peers: Vec<String>, connector: C) -> Self {
        Self {
            peers,
            sockets: SocketCache::new(connector),
        }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Open a channel to every peer now instead of on first commit
    pub fn connect_all(&self) -> Result<()> {
        for peer in &self.peers {
            self.sockets.get(peer)?;
        }
        Ok(())
    }

    fn push_to(&self, peer: &str, payload: &[u8]) -> Result<()> {
        let channel = self.sockets.get(peer)?;
        channel
            .push(payload)
            .map_err(|source| ConsistencyError::TransportUnavailable {
                address: peer.to_string(),
                source,
            })
    }
}

impl CommitBroadcaster<TcpConnector> {
    pub fn from_config(config: &ConsistencyConfig) -> Self {
        Self::new(config.peers.clone(), TcpConnector::new(config.connect_timeout()))
    }
}

impl<C: Connector> CommitListener for CommitBroadcaster<C> {
    /// Every peer is attempted; the first failure is returned
    fn on_commit(&self, record: &TransactionRecord) -> Result<()> {
        if self.peers.is_empty() {
            return Ok(());
        }
        let payload = encode_commit(record)?;
        let mut first_err = None;
        for peer in &self.peers {
            if let Err(e) = self.push_to(peer, &payload) {
                warn!(txn = %record.id, peer = %peer, error = %e, "commit push failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                debug!(txn = %record.id, peers = self.peers.len(), "commit pushed");
                Ok(())
            }
        }
    }
}
