// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transactional layer: atomic operations and durable transactions.
//!
//! An [`AtomicOperation`] is a serializable unit of reads and writes over a
//! parent store. It takes no locks while open; instead it watches the
//! versions of every scope it touches and acquires all of its locks just in
//! time at commit, in a total order, re-checking for conflicts once they are
//! held. A [`Transaction`] is an atomic operation over the engine that also
//! backs its commit up to disk first, so a crash between the force and the
//! cleanup replays instead of losing the commit. Transactions host nested
//! atomic operations and route engine version-change notifications to
//! whichever child is watching the changed scope.
//!
//! # Example
//!
//! ```no_run
//! use sedimentdb::storage::{Engine, EngineConfig};
//! use sedimentdb::model::Value;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::start(EngineConfig::new("data/txn"))?;
//!
//! let txn = engine.start_transaction();
//! txn.add("name", Value::from("alice"), 1)?;
//! let committed = txn.commit()?;
//! assert!(committed);
//!
//! let names = engine.select("name", 1)?;
//! assert!(names.contains(&Value::from("alice")));
//! # Ok(())
//! # }
//! ```

mod atomic;
mod backup;
mod error;
mod transaction;

pub use atomic::{AtomicOperation, OperationState};
pub use error::{AtomicStateError, TransactionStateError, TxnError};
pub use transaction::Transaction;

use std::sync::Arc;
use std::time::Duration;

use crate::lock::{LockMode, LockService, RangeLockService};
use crate::model::{Interval, RangeToken, Token};
use crate::storage::{Destination, Engine, VersionChangeListener};
use crate::time::MonotonicClock;

/// A lock an operation intends to take at commit, and the form preserved in
/// transaction backups.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LockIntent {
    Token(Token, LockMode),
    Range(RangeToken, LockMode),
}

/// What an atomic operation requires from its parent store.
///
/// The parent is the destination for committed writes, the read baseline, the
/// version authority, and the publisher of version-change notifications. It
/// also decides which lock services the operation commits under: the engine
/// hands out the real ones, while a transaction hands its children no-op
/// services because it is itself the single serializing authority.
pub trait AtomicSupport: Destination {
    fn clock(&self) -> &Arc<MonotonicClock>;

    /// The token and range lock services the operation must use at commit.
    fn lock_services(&self) -> (Arc<LockService>, Arc<RangeLockService>);

    /// Bound on each lock acquisition during commit.
    fn lock_timeout(&self) -> Duration;

    /// Subscribes `listener` to version changes on `token`.
    fn watch(&self, token: Token, listener: &Arc<dyn VersionChangeListener>);

    /// Subscribes `listener` to version changes on any written point of
    /// `key` within `interval`.
    fn watch_range(
        &self,
        key: &str,
        interval: Interval,
        listener: &Arc<dyn VersionChangeListener>,
    );

    /// Drops every subscription held by the listener with `id`.
    fn release_listener(&self, id: u64);
}

impl AtomicSupport for Engine {
    fn clock(&self) -> &Arc<MonotonicClock> {
        Engine::clock(self)
    }

    fn lock_services(&self) -> (Arc<LockService>, Arc<RangeLockService>) {
        (
            Arc::clone(self.lock_service()),
            Arc::clone(self.range_lock_service()),
        )
    }

    fn lock_timeout(&self) -> Duration {
        self.config().lock_timeout()
    }

    fn watch(&self, token: Token, listener: &Arc<dyn VersionChangeListener>) {
        Engine::watch(self, token, listener);
    }

    fn watch_range(
        &self,
        key: &str,
        interval: Interval,
        listener: &Arc<dyn VersionChangeListener>,
    ) {
        Engine::watch_range(self, key, interval, listener);
    }

    fn release_listener(&self, id: u64) {
        Engine::release_listener(self, id);
    }
}
