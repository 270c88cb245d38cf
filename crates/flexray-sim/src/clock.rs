//! Time sources for timestamping accepted messages
//!
//! The simulator never reads the system clock directly; it asks a [`Clock`].
//! Timestamps are microseconds on whatever timeline the clock defines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of microsecond timestamps
pub trait Clock: Send {
    /// Current time in microseconds
    fn now_us(&self) -> u64;
}

/// Wall-clock time elapsed since the clock was created
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock moved only by hand, for tests and externally paced simulations
///
/// Clones share the same time, so a test can keep one handle while the
/// simulator owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: Arc::new(AtomicU64::new(start_us)),
        }
    }

    /// Jump to an absolute time (may move backwards)
    pub fn set(&self, us: u64) {
        self.now_us.store(us, Ordering::SeqCst);
    }

    /// Move forward by `us` microseconds
    pub fn advance(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(100);
        let handle = clock.clone();
        handle.advance(50);
        assert_eq!(clock.now_us(), 150);
        handle.set(10);
        assert_eq!(clock.now_us(), 10);
    }

    #[test]
    fn test_monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now_us();
        let second = clock.now_us();
        assert!(second >= first);
    }
}
