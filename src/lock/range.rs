// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Range locks over value intervals.
//!
//! Holds are tracked per key as `(holder, mode, interval)`. Acquisition
//! blocks on a condition variable until no conflicting hold remains, where a
//! conflict is an overlapping interval held by a different holder with at
//! least one side in write mode. A holder never conflicts with itself, so an
//! operation that read a range may also write a point inside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::model::Interval;

use super::LockMode;

struct RangeHold {
    id: u64,
    holder: u64,
    mode: LockMode,
    interval: Interval,
}

/// Interval locks keyed by `(key, interval)`.
pub struct RangeLockService {
    holds: Mutex<HashMap<String, Vec<RangeHold>>>,
    released: Condvar,
    next_hold_id: AtomicU64,
    noop: bool,
}

impl RangeLockService {
    /// Creates a new range lock service.
    pub fn new() -> Self {
        Self {
            holds: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_hold_id: AtomicU64::new(1),
            noop: false,
        }
    }

    /// Creates a service whose acquisitions always succeed immediately.
    pub fn no_op() -> Self {
        Self { noop: true, ..Self::new() }
    }

    /// Acquires a range lock for `holder` over `interval` on `key`,
    /// blocking until no conflicting hold remains. The lock is released when
    /// the returned guard drops.
    pub fn lock(
        self: &Arc<Self>,
        holder: u64,
        key: &str,
        mode: LockMode,
        interval: Interval,
    ) -> RangeGuard {
        match self.acquire(holder, key, mode, interval, None) {
            Some(guard) => guard,
            None => unreachable!("blocking range acquisition cannot time out"),
        }
    }

    /// Acquires a range lock, giving up after `timeout`. Returns `None` on
    /// timeout.
    pub fn try_lock_for(
        self: &Arc<Self>,
        holder: u64,
        key: &str,
        mode: LockMode,
        interval: Interval,
        timeout: Duration,
    ) -> Option<RangeGuard> {
        self.acquire(holder, key, mode, interval, Some(timeout))
    }

    fn acquire(
        self: &Arc<Self>,
        holder: u64,
        key: &str,
        mode: LockMode,
        interval: Interval,
        timeout: Option<Duration>,
    ) -> Option<RangeGuard> {
        if self.noop {
            return Some(RangeGuard(None));
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut holds = self.holds.lock();
        loop {
            let conflicting = holds
                .get(key)
                .map(|key_holds| {
                    key_holds.iter().any(|hold| {
                        hold.holder != holder
                            && (mode == LockMode::Write || hold.mode == LockMode::Write)
                            && hold.interval.overlaps(&interval)
                    })
                })
                .unwrap_or(false);

            if !conflicting {
                let id = self.next_hold_id.fetch_add(1, Ordering::Relaxed);
                holds
                    .entry(key.to_string())
                    .or_default()
                    .push(RangeHold { id, holder, mode, interval });
                return Some(RangeGuard(Some(HoldHandle {
                    service: Arc::clone(self),
                    key: key.to_string(),
                    hold_id: id,
                })));
            }

            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut holds, deadline).timed_out() {
                        return None;
                    }
                }
                None => self.released.wait(&mut holds),
            }
        }
    }

    fn release(&self, key: &str, hold_id: u64) {
        let mut holds = self.holds.lock();
        if let Some(key_holds) = holds.get_mut(key) {
            key_holds.retain(|hold| hold.id != hold_id);
            if key_holds.is_empty() {
                holds.remove(key);
            }
        }
        drop(holds);
        self.released.notify_all();
    }
}

impl Default for RangeLockService {
    fn default() -> Self {
        Self::new()
    }
}

struct HoldHandle {
    service: Arc<RangeLockService>,
    key: String,
    hold_id: u64,
}

/// A held range lock. Releases on drop.
pub struct RangeGuard(Option<HoldHandle>);

impl Drop for RangeGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.service.release(&handle.key, handle.hold_id);
        }
    }
}

impl std::fmt::Debug for RangeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(handle) => f.debug_tuple("RangeGuard").field(&handle.key).finish(),
            None => f.debug_tuple("RangeGuard").field(&"no-op").finish(),
        }
    }
}
