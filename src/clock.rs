//! Cell Protocol - Wall Clock
//!
//! The third external collaborator, alongside storage and signature
//! verification. Voting deadlines
//! and commitment due dates are logical times compared against this clock;
//! the engine never measures execution timeouts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock backed by the OS wall clock.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_secs()
    }
}

/// Deterministic test double; advance explicitly between assertions.
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn at(timestamp: Timestamp) -> Self {
        FixedClock(AtomicU64::new(timestamp))
    }

    pub fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.0.store(timestamp, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_explicitly() {
        let clock = FixedClock::at(1000);
        assert_eq!(clock.now(), 1000);
        clock.advance(50);
        assert_eq!(clock.now(), 1050);
        clock.set(2000);
        assert_eq!(clock.now(), 2000);
    }
}
