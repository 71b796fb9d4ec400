// SPDX-License-Identifier: MIT

//! Clock abstraction so scheduling logic can be tested deterministically.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source used by the scheduler and executor.
pub trait Clock: Send + Sync {
    /// Monotonic instant for interval arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the unix epoch. The run queue schedules
    /// on this timeline.
    fn epoch_secs(&self) -> i64;

    /// Wall-clock milliseconds since the unix epoch.
    fn epoch_ms(&self) -> u64;
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_secs(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        }
    }

    fn epoch_ms(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as u64,
            Err(_) => 0,
        }
    }
}

/// Manually advanced clock for tests.
#[derive(Clone)]
pub struct FakeClock {
    base: Instant,
    /// Fixed fake epoch origin keeps test times readable.
    epoch_base: i64,
    offset: Arc<Mutex<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            epoch_base: 1_700_000_000,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut offset = self.offset.lock();
        *offset += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn epoch_secs(&self) -> i64 {
        self.epoch_base + self.offset.lock().as_secs() as i64
    }

    fn epoch_ms(&self) -> u64 {
        self.epoch_base as u64 * 1000 + self.offset.lock().as_millis() as u64
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
