// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Strictly increasing microsecond clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic clock producing unique timestamps.
///
/// Returns microseconds since the Unix epoch, bumped past the last issued
/// value so that every call observes a strictly greater timestamp than all
/// previous calls, even under concurrent access. Ties with physical time are
/// broken by incrementing the logical component, which also keeps the clock
/// moving when wall time stalls.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last: AtomicU64::new(0) }
    }

    fn physical_time_micros() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    /// Returns the next timestamp, strictly greater than every previously
    /// issued one.
    pub fn now(&self) -> u64 {
        loop {
            let physical = Self::physical_time_micros();
            let last = self.last.load(Ordering::Acquire);
            let next = physical.max(last.saturating_add(1));

            match self
                .last
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(_) => continue,
            }
        }
    }

    /// Returns the most recently issued timestamp without advancing the
    /// clock. Zero if no timestamp has been issued.
    pub fn recent(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}
