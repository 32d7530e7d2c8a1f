//! Clock abstraction (spec §9 open item) so cleanup/TTL/rate-limit math can
//! be driven deterministically in tests instead of reading the wall clock
//! directly, the way `trust_manager.rs` and `ban_manager.rs` used to.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double: starts at a fixed instant, advances only when told to.
pub struct FixedClock {
    epoch_secs: AtomicI64,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            epoch_secs: AtomicI64::new(start.timestamp()),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.epoch_secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.epoch_secs.store(at.timestamp(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.epoch_secs.load(Ordering::SeqCst), 0).unwrap_or_else(Utc::now)
    }
}
