// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! SedimentDB: a transactional storage core for a document/record database
//!
//! Records (64-bit ids) map string keys to sets of typed values. Writes
//! settle in a volatile buffer and are transported in order to a permanent
//! store; reads merge the two tiers by XOR-folding pending writes over the
//! permanent baseline. On top of the two-tier store sit serializable atomic
//! operations with just-in-time locking and version watching, and durable
//! transactions that back their commits up to disk for crash recovery.

pub mod limbo;
pub mod lock;
pub mod model;
pub mod storage;
pub mod time;
pub mod txn;

pub use limbo::{Limbo, Queue, TransactionQueue, WriteLog};
pub use lock::{LockMode, LockService, RangeLockService};
pub use model::{
    Action, Bound, Interval, Operator, RangeToken, RecordId, Token, Value, Write,
};
pub use storage::{
    BufferedStore, Database, Destination, Engine, EngineConfig, LockPolicy, StoreError,
    VersionChangeListener,
};
pub use time::MonotonicClock;
pub use txn::{
    AtomicOperation, AtomicStateError, OperationState, Transaction, TransactionStateError,
    TxnError,
};
