// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Token-keyed read/write lock service.
//!
//! Uses sharding to reduce contention on the lock registry itself. Lock
//! entries are created on demand and pruned lazily once a shard grows past a
//! threshold; an entry is alive while any guard holds a reference to it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::model::Token;

const NUM_SHARDS: usize = 128;

/// How large a shard may grow before idle entries are pruned.
const PRUNE_THRESHOLD: usize = 512;

/// Lock modes for read/write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for reads (multiple readers allowed).
    Read,
    /// Exclusive lock for writes (single writer, no readers).
    Write,
}

impl LockMode {
    pub fn code(self) -> u8 {
        match self {
            LockMode::Read => 1,
            LockMode::Write => 2,
        }
    }
}

type SharedLock = Arc<RwLock<()>>;

/// A held token lock. Releases on drop.
pub struct TokenGuard(GuardInner);

enum GuardInner {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
    NoOp,
}

impl TokenGuard {
    /// Returns true if this guard holds exclusive access.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.0, GuardInner::Write(_))
    }
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.0 {
            GuardInner::Read(_) => "read",
            GuardInner::Write(_) => "write",
            GuardInner::NoOp => "no-op",
        };
        f.debug_tuple("TokenGuard").field(&mode).finish()
    }
}

/// Named read/write locks keyed by [`Token`].
pub struct LockService {
    shards: Box<[Mutex<HashMap<Token, SharedLock>>]>,
    noop: bool,
}

impl LockService {
    /// Creates a new lock service.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards, noop: false }
    }

    /// Creates a service whose acquisitions always succeed immediately.
    pub fn no_op() -> Self {
        Self { shards: Box::new([]), noop: true }
    }

    #[inline]
    fn shard_index(&self, token: &Token) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish() as usize % NUM_SHARDS
    }

    /// Gets or creates the lock entry for a token.
    fn entry(&self, token: &Token) -> SharedLock {
        let mut shard = self.shards[self.shard_index(token)].lock();
        if shard.len() > PRUNE_THRESHOLD {
            // Entries referenced only by the registry are idle.
            shard.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(shard.entry(token.clone()).or_default())
    }

    /// Acquires a shared lock, blocking until available.
    pub fn read_lock(&self, token: &Token) -> TokenGuard {
        if self.noop {
            return TokenGuard(GuardInner::NoOp);
        }
        TokenGuard(GuardInner::Read(self.entry(token).read_arc()))
    }

    /// Acquires an exclusive lock, blocking until available.
    pub fn write_lock(&self, token: &Token) -> TokenGuard {
        if self.noop {
            return TokenGuard(GuardInner::NoOp);
        }
        TokenGuard(GuardInner::Write(self.entry(token).write_arc()))
    }

    /// Acquires a shared lock, giving up after `timeout`.
    pub fn try_read_lock_for(&self, token: &Token, timeout: Duration) -> Option<TokenGuard> {
        if self.noop {
            return Some(TokenGuard(GuardInner::NoOp));
        }
        self.entry(token)
            .try_read_arc_for(timeout)
            .map(|guard| TokenGuard(GuardInner::Read(guard)))
    }

    /// Acquires an exclusive lock, giving up after `timeout`.
    pub fn try_write_lock_for(&self, token: &Token, timeout: Duration) -> Option<TokenGuard> {
        if self.noop {
            return Some(TokenGuard(GuardInner::NoOp));
        }
        self.entry(token)
            .try_write_arc_for(timeout)
            .map(|guard| TokenGuard(GuardInner::Write(guard)))
    }
}

impl Default for LockService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_locks_compatible() {
        let service = LockService::new();
        let token = Token::field("name", 1);

        let g1 = service.read_lock(&token);
        let g2 = service.read_lock(&token);
        assert!(!g1.is_exclusive());
        assert!(!g2.is_exclusive());
    }

    #[test]
    fn test_write_excludes_read() {
        let service = LockService::new();
        let token = Token::field("name", 1);

        let guard = service.write_lock(&token);
        assert!(guard.is_exclusive());
        assert!(service
            .try_read_lock_for(&token, Duration::from_millis(10))
            .is_none());
        drop(guard);
        assert!(service
            .try_read_lock_for(&token, Duration::from_millis(10))
            .is_some());
    }

    #[test]
    fn test_distinct_tokens_independent() {
        let service = LockService::new();
        let _g1 = service.write_lock(&Token::field("name", 1));
        let g2 = service.try_write_lock_for(&Token::field("name", 2), Duration::from_millis(10));
        assert!(g2.is_some());
    }

    #[test]
    fn test_write_timeout() {
        let service = LockService::new();
        let token = Token::record(9);
        let _held = service.write_lock(&token);
        assert!(service
            .try_write_lock_for(&token, Duration::from_millis(10))
            .is_none());
    }

    #[test]
    fn test_no_op_never_blocks() {
        let service = LockService::no_op();
        let token = Token::field("name", 1);
        let _g1 = service.write_lock(&token);
        let g2 = service.try_write_lock_for(&token, Duration::from_millis(1));
        assert!(g2.is_some());
    }

    #[test]
    fn test_pruning_keeps_held_entries() {
        let service = LockService::new();
        let held_token = Token::record(0);
        let guard = service.write_lock(&held_token);

        // Flood the registry so every shard prunes at least once.
        for i in 1..(NUM_SHARDS * (PRUNE_THRESHOLD + 2)) as i64 {
            let _ = service.read_lock(&Token::record(i));
        }

        // The held entry must have survived pruning: a second writer still
        // has to wait for the original guard.
        assert!(service
            .try_write_lock_for(&held_token, Duration::from_millis(10))
            .is_none());
        drop(guard);
    }

    #[test]
    fn test_contended_handoff() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let service = StdArc::new(LockService::new());
        let token = Token::key("counter");
        let mut handles = vec![];

        for _ in 0..8 {
            let service = StdArc::clone(&service);
            let token = token.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _guard = service.write_lock(&token);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread panicked");
        }
    }
}
