//! Monotonic time source.
//!
//! Event timestamps are plain `f64` seconds so that sensor callbacks can
//! hand their own `eventtime` through unchanged. Components take an
//! `Arc<dyn Clock>` so tests can drive time by hand.

use parking_lot::Mutex;
use std::time::Instant;

/// Source of monotonic seconds
pub trait Clock: Send + Sync {
    /// Current monotonic time in seconds
    fn monotonic(&self) -> f64;
}

/// Clock backed by [`Instant`], counting from its creation
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
    fn monotonic(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests and trace replay
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Set the current time. Moving backwards is ignored.
    pub fn set(&self, seconds: f64) {
        let mut now = self.now.lock();
        if seconds > *now {
            *now = seconds;
        }
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock();
        *now += seconds.max(0.0);
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> f64 {
        *self.now.lock()
    }
}
