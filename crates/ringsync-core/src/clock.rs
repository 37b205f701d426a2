//! High-resolution tick sources
//!
//! Wrap correction compares elapsed ticks against the duration of one buffer
//! cycle. A clock that cannot report its frequency disables the correction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonically increasing ticks
pub trait Clock: Send + Sync {
    /// Current tick count
    fn now(&self) -> u64;

    /// Ticks per second, or `None` when the counter is not calibrated
    fn frequency(&self) -> Option<u64>;
}

/// Nanosecond ticks measured from the moment the clock was created
#[derive(Debug, Clone)]
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
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn frequency(&self) -> Option<u64> {
        Some(1_000_000_000)
    }
}

/// Clock advanced explicitly by the caller
///
/// Clones share the same tick counter, so a simulated device and the session
/// polling it observe identical time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
    frequency: Option<u64>,
}

impl ManualClock {
    /// Create a clock at tick 0 with the given frequency
    pub fn new(frequency: Option<u64>) -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(0)),
            frequency,
        }
    }

    /// Advance by a raw number of ticks
    pub fn advance_ticks(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Advance by a wall-clock duration, converted with the clock frequency.
    ///
    /// Uncalibrated clocks interpret the duration as nanoseconds.
    pub fn advance(&self, duration: Duration) {
        let freq = self.frequency.unwrap_or(1_000_000_000) as u128;
        let ticks = duration.as_nanos() * freq / 1_000_000_000;
        self.advance_ticks(ticks as u64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> Option<u64> {
        self.frequency
    }
}
