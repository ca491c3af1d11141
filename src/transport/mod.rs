//! Transport Module
//!
//! Outbound, push-only channels to other nodes. One channel per destination
//! address is created lazily and cached for the life of the process.
//!
//! Failing to establish a channel is reported as
//! [`ConsistencyError::TransportUnavailable`]; deciding whether that is
//! fatal belongs to the process entry point.

mod tcp;

pub use tcp::{read_frame, write_frame, TcpConnector, TcpPushChannel, MAX_FRAME_LEN};

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ConsistencyError, Result};

/// A ready-to-send, write-only channel
pub trait PushChannel: Send + Sync {
    /// Send one message
    fn push(&self, payload: &[u8]) -> io::Result<()>;
}

/// Opens channels to addresses
pub trait Connector: Send + Sync {
    type Channel: PushChannel;

    fn connect(&self, address: &str) -> io::Result<Self::Channel>;
}

/// Per-address slot, empty until a connect succeeds
type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// Memoizes one channel per destination address. Entries are never evicted.
///
/// Connecting holds only the address's own slot, so a slow or unreachable
/// peer never delays lookups of other addresses.
pub struct SocketCache<C: Connector> {
    connector: C,
    cache: DashMap<String, Slot<C::Channel>>,
}

impl<C: Connector> SocketCache<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            cache: DashMap::new(),
        }
    }

    /// Channel for `address`, connecting on first use. Repeated calls for the
    /// same address return the same handle.
    pub fn get(&self, address: &str) -> Result<Arc<C::Channel>> {
        let slot = Arc::clone(self.cache.entry(address.to_string()).or_default().value());
        let mut slot = slot.lock();
        if let Some(channel) = slot.as_ref() {
            return Ok(Arc::clone(channel));
        }

        let channel = self.connector.connect(address).map_err(|source| {
            warn!(address, error = %source, "failed to open channel");
            ConsistencyError::TransportUnavailable {
                address: address.to_string(),
                source,
            }
        })?;
        let channel = Arc::new(channel);
        *slot = Some(Arc::clone(&channel));
        debug!(address, "channel opened");
        Ok(channel)
    }

    /// True once a channel to `address` is open. A connect still in
    /// progress counts as absent.
    pub fn contains(&self, address: &str) -> bool {
        self.cache
            .get(address)
            .map_or(false, |slot| Self::is_open(slot.value()))
    }

    /// Number of open channels
    pub fn len(&self) -> usize {
        self.cache.iter().filter(|e| Self::is_open(e.value())).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_open(slot: &Slot<C::Channel>) -> bool {
        slot.try_lock().map_or(false, |channel| channel.is_some())
    }
}
