//! Timestamp sources for tag mutations.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the UTC epoch second stamped on every accepted mutation.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock UTC seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            seconds: AtomicI64::new(start),
        }
    }

    /// Move forward by `seconds` and return the new time.
    pub fn advance(&self, seconds: i64) -> i64 {
        self.seconds.fetch_add(seconds, Ordering::SeqCst) + seconds
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }
}
