// SPDX-License-Identifier: MIT

//! Cooperative critical sections.
//!
//! The original design suppressed asynchronous notifications around state
//! mutations; here readiness arrives over channels and the gate is a mutex
//! held across the main loop's body. Every mutation of the work table,
//! event list, run-set table and run-process table happens with the gate
//! closed; it is open only across the relay's awaited receive and the
//! shutdown drains. I/O pump tasks never take the gate — they post
//! messages instead.

use parking_lot::{Mutex, MutexGuard};

pub struct Gate<T> {
    inner: Mutex<T>,
}

impl<T> Gate<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Close the gate, entering the critical section. Mutations are safe
    /// until the guard drops.
    pub fn close(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Non-blocking close, for observers that must not stall the engine.
    pub fn try_close(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
