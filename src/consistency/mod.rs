//! Consistency Manager Module
//!
//! Pluggable conflict detection selected at configuration time. Every
//! isolation level implements the same [`ConsistencyManager`] contract over
//! a shared [`VersionStore`].
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use aft_core::consistency::{create_consistency_manager, ConsistencyConfig, IsolationLevel};
//! use aft_core::store::VersionStore;
//!
//! let config = ConsistencyConfig::new(IsolationLevel::Serializable);
//! let manager = create_consistency_manager(&config, Arc::new(VersionStore::new()));
//! assert_eq!(manager.isolation(), IsolationLevel::Serializable);
//! ```

mod manager;
mod traits;

pub use manager::{ReadCommittedManager, SerializableManager, SnapshotIsolationManager};
pub use traits::{ConsistencyManager, KeyVersion};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::VersionStore;

/// Isolation level - selectable at runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Reads see any committed data; commits never rejected
    #[serde(alias = "rc")]
    ReadCommitted,

    /// Snapshot reads, first-committer-wins on writes (default)
    #[default]
    #[serde(alias = "si")]
    Snapshot,

    /// Snapshot isolation plus read-set validation
    #[serde(alias = "ssi")]
    Serializable,
}

impl IsolationLevel {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "read-committed" | "read_committed" | "rc" => IsolationLevel::ReadCommitted,
            "snapshot" | "si" | "snapshot-isolation" => IsolationLevel::Snapshot,
            "serializable" | "ssi" => IsolationLevel::Serializable,
            _ => IsolationLevel::default(),
        }
    }
}

/// Consistency configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Conflict rules applied at commit
    pub isolation: IsolationLevel,
    /// Addresses committed records are pushed to
    pub peers: Vec<String>,
    /// Pause between background reclamation passes
    pub gc_interval_ms: u64,
    /// Connect timeout for peer channels
    pub connect_timeout_ms: u64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            peers: Vec::new(),
            gc_interval_ms: 1_000,
            connect_timeout_ms: 2_000,
        }
    }
}

impl ConsistencyConfig {
    /// Create config with specific isolation level
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            ..Default::default()
        }
    }

    /// Load from JSON; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set isolation level
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Add a replication peer
    pub fn peer(mut self, address: impl Into<String>) -> Self {
        self.peers.push(address.into());
        self
    }

    pub fn gc_interval_ms(mut self, ms: u64) -> Self {
        self.gc_interval_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Create a consistency manager based on config
pub fn create_consistency_manager(
    config: &ConsistencyConfig,
    store: Arc<VersionStore>,
) -> Box<dyn ConsistencyManager> {
    match config.isolation {
        IsolationLevel::ReadCommitted => Box::new(ReadCommittedManager::new(store)),
        IsolationLevel::Snapshot => Box::new(SnapshotIsolationManager::new(store)),
        IsolationLevel::Serializable => Box::new(SerializableManager::new(store)),
    }
}
