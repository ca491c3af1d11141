// aft-core v0.1.0 - Commit validation and version visibility
// Multi-version key-value consistency layer with pluggable isolation levels

pub mod clock;
pub mod consistency;
pub mod coordinator;
pub mod error;
pub mod gc;
pub mod keys;
pub mod replication;
pub mod storage;
pub mod store;
pub mod transport;
pub mod types;

// Re-export main types
pub use clock::{Clock, LogicalClock, SystemClock};
pub use consistency::{
    create_consistency_manager, ConsistencyConfig, ConsistencyManager, IsolationLevel, KeyVersion,
};
pub use coordinator::{CommitOutcome, TransactionCoordinator};
pub use error::{ConsistencyError, Result};
pub use gc::{GcReport, Reclaimer, ReclaimerHandle};
pub use keys::{compare_keys, storage_key_name, StorageVersionId};
pub use replication::{CommitBroadcaster, CommitListener};
pub use storage::{MemoryStorage, StorageEngine};
pub use store::VersionStore;
pub use types::{ReadSet, TransactionRecord, TxnId, TxnState, WriteSet};
