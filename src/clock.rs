//! Timestamp sources for snapshots and commits.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Issues strictly increasing timestamps
pub trait Clock: Send + Sync {
    /// Next timestamp, greater than every one issued or observed before
    fn now(&self) -> i64;

    /// Learn of a timestamp issued elsewhere (e.g. a peer's commit)
    fn observe(&self, ts: i64);
}

/// Wall-clock microseconds, forced monotonic
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(i64::MIN),
        }
    }

    fn wall_micros() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        let wall = Self::wall_micros();
        loop {
            let current = self.last.load(Ordering::Acquire);
            let next = wall.max(current.saturating_add(1));
            if self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }

    fn observe(&self, ts: i64) {
        self.last.fetch_max(ts, Ordering::AcqRel);
    }
}

/// Deterministic counter clock
pub struct LogicalClock {
    last: AtomicI64,
}

impl LogicalClock {
    /// First `now()` returns `start + 1`
    pub fn new(start: i64) -> Self {
        Self {
            last: AtomicI64::new(start),
        }
    }

    /// Last issued or observed timestamp
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> i64 {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn observe(&self, ts: i64) {
        self.last.fetch_max(ts, Ordering::AcqRel);
    }
}
