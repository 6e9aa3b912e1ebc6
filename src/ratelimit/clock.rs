//! Time sources for the limiters.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A monotonic source of "now", expressed as time elapsed since the clock's
/// own origin.
///
/// Limiters only ever compare readings taken from the same clock, so the
/// origin is arbitrary.
pub trait Clock: Send + Sync {
    /// Current reading.
    fn now(&self) -> Duration;
}

/// Clock backed by [`Instant`], anchored when it is created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the current instant.
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
///
/// Useful in tests and simulations: share it through an `Arc` between the
/// limiter and the code driving time forward.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `now`.
    pub fn starting_at(now: Duration) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(by);
    }

    /// Set the reading to `now`. Setting it backwards is allowed and
    /// simulates a regressing clock.
    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
