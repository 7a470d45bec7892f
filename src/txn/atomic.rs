// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Atomic operations: just-in-time locked, version-watched transactional
//! units.
//!
//! The protocol per operation:
//!
//! 1. Every read registers the operation as a version-change listener on the
//!    touched scope before performing the read, so no write can land between
//!    the read and the subscription.
//! 2. Every write stages into the operation's queue and records its scope
//!    for exclusive locking at commit.
//! 3. A notification on any touched scope marks the operation conflicted;
//!    conflicted operations abort on their next state check, and their
//!    commit reports `false`.
//! 4. Commit acquires all recorded locks in a total order, re-checks the
//!    conflict flag (a conflicting committer always announces before
//!    releasing its locks, so the flag is visible once acquisition
//!    succeeds), and only then drains the queue into the parent as one
//!    sequence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::limbo::{Limbo, Queue};
use crate::lock::{LockMode, LockService, RangeGuard, RangeLockService, TokenGuard};
use crate::model::{Operator, RangeToken, RecordId, Token, Value};
use crate::storage::{BufferedStore, Engine, LockPolicy, VersionChangeListener};

use super::error::{AtomicStateError, TransactionStateError, TxnError};
use super::{AtomicSupport, LockIntent};

const STATE_OPEN: u8 = 0;
const STATE_COMMITTING: u8 = 1;
const STATE_COMMITTED: u8 = 2;
const STATE_ABORTED: u8 = 3;

/// Lifecycle state of an atomic operation. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Open,
    Committing,
    Committed,
    Aborted,
}

/// The shared conflict detector of one operation.
///
/// The parent store holds a weak handle to it in its listener registry; the
/// operation holds it strongly. A notification for any subscribed scope
/// trips the flag.
pub(crate) struct OperationMonitor {
    id: u64,
    conflicted: AtomicBool,
}

impl OperationMonitor {
    pub(crate) fn new(id: u64) -> Self {
        Self { id, conflicted: AtomicBool::new(false) }
    }

    pub(crate) fn is_conflicted(&self) -> bool {
        self.conflicted.load(Ordering::Acquire)
    }
}

impl VersionChangeListener for OperationMonitor {
    fn id(&self) -> u64 {
        self.id
    }

    fn on_version_change(&self, token: &Token) {
        debug!(operation = self.id, %token, "version change on touched scope");
        self.conflicted.store(true, Ordering::Release);
    }
}

/// Which layer an operation reports state errors as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Atomic,
    Transaction,
}

/// Lock guards held for the duration of a commit. Dropping releases.
#[derive(Default)]
pub(crate) struct CommitGuards {
    tokens: Vec<TokenGuard>,
    ranges: Vec<RangeGuard>,
}

/// A serializable unit of reads and writes over a parent store.
///
/// The operation wraps a buffered store whose buffer is a short-lived
/// in-memory queue and whose destination is the parent. Reads use the
/// parent's bypass paths since locks are taken only at commit. Operations
/// are single-threaded; they must not be shared across threads.
pub struct AtomicOperation<'p, P: AtomicSupport, B: Limbo = Queue> {
    store: BufferedStore<B, &'p P>,
    parent: &'p P,
    monitor: Arc<OperationMonitor>,
    /// What gets registered with the parent: the monitor itself for plain
    /// operations, the routing listener for transactions.
    listener: Arc<dyn VersionChangeListener>,
    state: AtomicU8,
    role: Role,
    /// Observed scopes and the version each had when first watched.
    reads: Mutex<HashMap<Token, u64>>,
    /// Scopes modified by staged writes, locked exclusively at commit.
    write_scopes: Mutex<HashSet<Token>>,
    /// Range predicates made visible through explore reads.
    range_reads: Mutex<Vec<RangeToken>>,
    lock_service: Arc<LockService>,
    range_lock_service: Arc<RangeLockService>,
}

impl<'p, P: AtomicSupport> AtomicOperation<'p, P> {
    /// Starts a new operation whose destination is `parent`.
    pub(crate) fn start(parent: &'p P) -> Self {
        let monitor = Arc::new(OperationMonitor::new(parent.clock().now()));
        let listener: Arc<dyn VersionChangeListener> = monitor.clone() as Arc<dyn VersionChangeListener>;
        Self::with_parts(parent, Queue::new(), monitor, listener, Role::Atomic)
    }
}

impl<'p, P: AtomicSupport, B: Limbo> AtomicOperation<'p, P, B> {
    pub(crate) fn with_parts(
        parent: &'p P,
        buffer: B,
        monitor: Arc<OperationMonitor>,
        listener: Arc<dyn VersionChangeListener>,
        role: Role,
    ) -> Self {
        let (lock_service, range_lock_service) = parent.lock_services();
        Self {
            store: BufferedStore::new(buffer, parent, Arc::clone(parent.clock())),
            parent,
            monitor,
            listener,
            state: AtomicU8::new(STATE_OPEN),
            role,
            reads: Mutex::new(HashMap::new()),
            write_scopes: Mutex::new(HashSet::new()),
            range_reads: Mutex::new(Vec::new()),
            lock_service,
            range_lock_service,
        }
    }

    pub fn state(&self) -> OperationState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => OperationState::Open,
            STATE_COMMITTING => OperationState::Committing,
            STATE_COMMITTED => OperationState::Committed,
            _ => OperationState::Aborted,
        }
    }

    /// True if no write has been staged.
    pub fn is_read_only(&self) -> bool {
        self.store.buffer().is_empty()
    }

    pub(crate) fn staged_writes(&self) -> Vec<crate::model::Write> {
        self.store.buffer().writes()
    }

    fn state_error(&self) -> TxnError {
        match self.role {
            Role::Atomic => AtomicStateError.into(),
            Role::Transaction => TransactionStateError.into(),
        }
    }

    /// Rejects any public operation once the state is no longer open, and
    /// converts a pending conflict into an abort.
    pub(crate) fn check_state(&self) -> Result<(), TxnError> {
        if self.state.load(Ordering::Acquire) != STATE_OPEN {
            return Err(self.state_error());
        }
        if self.monitor.is_conflicted() {
            self.finish_abort();
            return Err(self.state_error());
        }
        Ok(())
    }

    /// Subscribes to `token` (once) and records its current version.
    fn watch_scope(&self, token: Token) {
        let mut reads = self.reads.lock();
        if !reads.contains_key(&token) {
            // Subscribe before reading the version so nothing lands between
            // the two unobserved.
            self.parent.watch(token.clone(), &self.listener);
            let version = self.parent.version(&token);
            debug!(operation = self.monitor.id(), %token, version, "watching scope");
            reads.insert(token, version);
        }
    }

    fn watch_range_scope(&self, token: RangeToken) {
        let mut range_reads = self.range_reads.lock();
        if !range_reads.contains(&token) {
            self.parent
                .watch_range(token.key(), token.interval(), &self.listener);
            range_reads.push(token);
        }
    }

    fn record_write_scope(&self, token: Token) {
        self.watch_scope(token.clone());
        self.write_scopes.lock().insert(token);
    }

    pub fn select(&self, key: &str, record: RecordId) -> Result<HashSet<Value>, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::field(key, record));
        Ok(self.store.select(key, record, LockPolicy::Bypass)?)
    }

    pub fn select_at(
        &self,
        key: &str,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashSet<Value>, TxnError> {
        self.check_state()?;
        Ok(self.store.select_at(key, record, timestamp)?)
    }

    pub fn browse_record(
        &self,
        record: RecordId,
    ) -> Result<HashMap<String, HashSet<Value>>, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::record(record));
        Ok(self.store.browse_record(record, LockPolicy::Bypass)?)
    }

    pub fn browse_record_at(
        &self,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashMap<String, HashSet<Value>>, TxnError> {
        self.check_state()?;
        Ok(self.store.browse_record_at(record, timestamp)?)
    }

    pub fn browse_key(&self, key: &str) -> Result<HashMap<Value, HashSet<RecordId>>, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::key(key));
        Ok(self.store.browse_key(key, LockPolicy::Bypass)?)
    }

    pub fn browse_key_at(
        &self,
        key: &str,
        timestamp: u64,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, TxnError> {
        self.check_state()?;
        Ok(self.store.browse_key_at(key, timestamp)?)
    }

    pub fn verify(&self, key: &str, value: &Value, record: RecordId) -> Result<bool, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::field(key, record));
        Ok(self.store.verify(key, value, record, LockPolicy::Bypass)?)
    }

    pub fn verify_at(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        timestamp: u64,
    ) -> Result<bool, TxnError> {
        self.check_state()?;
        Ok(self.store.verify_at(key, value, record, timestamp)?)
    }

    pub fn explore(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, TxnError> {
        self.check_state()?;
        self.watch_range_scope(RangeToken::new(key, operator, values.to_vec()));
        Ok(self.store.explore(key, operator, values, LockPolicy::Bypass)?)
    }

    pub fn explore_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        timestamp: u64,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, TxnError> {
        self.check_state()?;
        Ok(self.store.explore_at(key, operator, values, timestamp)?)
    }

    pub fn search(&self, key: &str, query: &str) -> Result<HashSet<RecordId>, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::key(key));
        Ok(self.store.search(key, query, LockPolicy::Bypass)?)
    }

    pub fn audit_record(&self, record: RecordId) -> Result<BTreeMap<u64, String>, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::record(record));
        Ok(self.store.audit_record(record)?)
    }

    pub fn audit_field(
        &self,
        key: &str,
        record: RecordId,
    ) -> Result<BTreeMap<u64, String>, TxnError> {
        self.check_state()?;
        self.watch_scope(Token::field(key, record));
        Ok(self.store.audit_field(key, record)?)
    }

    /// Stages an add iff the field does not currently contain the value,
    /// observed through this operation's own merged view.
    pub fn add(&self, key: &str, value: Value, record: RecordId) -> Result<bool, TxnError> {
        self.check_state()?;
        self.record_write_scope(Token::field(key, record));
        let inserted = self
            .store
            .add(key, value, record, false, true, LockPolicy::Bypass)?;
        Ok(inserted.is_some())
    }

    /// Stages a remove iff the field currently contains the value.
    pub fn remove(&self, key: &str, value: Value, record: RecordId) -> Result<bool, TxnError> {
        self.check_state()?;
        self.record_write_scope(Token::field(key, record));
        let inserted = self
            .store
            .remove(key, value, record, false, true, LockPolicy::Bypass)?;
        Ok(inserted.is_some())
    }

    /// Stages removes for every current value of the field and one add for
    /// `value`, with no existence check.
    pub fn set(&self, key: &str, value: Value, record: RecordId) -> Result<(), TxnError> {
        self.check_state()?;
        self.record_write_scope(Token::field(key, record));
        self.store.set(key, value, record, false, LockPolicy::Bypass)?;
        Ok(())
    }

    /// Max version for `scope` across this operation's buffer and the
    /// parent.
    pub fn version(&self, scope: &Token) -> u64 {
        self.store.version(scope)
    }

    /// Every lock this operation must hold to commit, token intents first in
    /// token order, then range intents in encoded order. A written scope
    /// supersedes a read of the same scope.
    pub(crate) fn lock_intents(&self) -> Vec<LockIntent> {
        let mut tokens: BTreeMap<Token, LockMode> = BTreeMap::new();
        for token in self.reads.lock().keys() {
            tokens.insert(token.clone(), LockMode::Read);
        }
        for token in self.write_scopes.lock().iter() {
            tokens.insert(token.clone(), LockMode::Write);
        }
        let mut intents: Vec<LockIntent> = tokens
            .into_iter()
            .map(|(token, mode)| LockIntent::Token(token, mode))
            .collect();

        let mut ranges: Vec<(Vec<u8>, LockIntent)> = Vec::new();
        for token in self.range_reads.lock().iter() {
            ranges.push((
                token.encode(),
                LockIntent::Range(token.clone(), LockMode::Read),
            ));
        }
        for write in self.store.buffer().writes() {
            let token = RangeToken::point(write.key(), write.value().clone());
            ranges.push((token.encode(), LockIntent::Range(token, LockMode::Write)));
        }
        ranges.sort_by(|a, b| a.0.cmp(&b.0));
        ranges.dedup_by(|a, b| a.1 == b.1);
        intents.extend(ranges.into_iter().map(|(_, intent)| intent));
        intents
    }

    /// Finalizes the state and takes every recorded lock.
    ///
    /// Returns `None` when the operation cannot commit because of a conflict
    /// or a lock timeout; in that case it is aborted. Returns an error when
    /// the operation already reached a terminal state.
    pub(crate) fn prepare_commit(&self) -> Result<Option<CommitGuards>, TxnError> {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_COMMITTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // A conflict-induced abort reports as an ordinary failed commit;
            // anything else is a state misuse.
            if self.state() == OperationState::Aborted && self.monitor.is_conflicted() {
                return Ok(None);
            }
            return Err(self.state_error());
        }
        if self.monitor.is_conflicted() {
            self.finish_abort();
            return Ok(None);
        }

        let timeout = self.parent.lock_timeout();
        let mut guards = CommitGuards::default();
        for intent in self.lock_intents() {
            let acquired = match intent {
                LockIntent::Token(token, LockMode::Read) => self
                    .lock_service
                    .try_read_lock_for(&token, timeout)
                    .map(|guard| guards.tokens.push(guard))
                    .is_some(),
                LockIntent::Token(token, LockMode::Write) => self
                    .lock_service
                    .try_write_lock_for(&token, timeout)
                    .map(|guard| guards.tokens.push(guard))
                    .is_some(),
                LockIntent::Range(token, mode) => self
                    .range_lock_service
                    .try_lock_for(
                        self.monitor.id(),
                        token.key(),
                        mode,
                        token.interval(),
                        timeout,
                    )
                    .map(|guard| guards.ranges.push(guard))
                    .is_some(),
            };
            if !acquired {
                debug!(operation = self.monitor.id(), "lock acquisition timed out");
                drop(guards);
                self.finish_abort();
                return Ok(None);
            }
        }

        // Notifications racing with acquisition have been delivered by now:
        // a conflicting committer announces while still holding its locks.
        if self.monitor.is_conflicted() {
            drop(guards);
            self.finish_abort();
            return Ok(None);
        }
        Ok(Some(guards))
    }

    /// Drains the staged writes into the parent as one sequence.
    pub(crate) fn drain_into_parent(&self) -> Result<(), TxnError> {
        let writes = self.store.buffer().drain();
        if !writes.is_empty() {
            self.parent.accept_all(writes)?;
        }
        Ok(())
    }

    pub(crate) fn complete_commit(&self, guards: CommitGuards) -> Result<bool, TxnError> {
        match self.drain_into_parent() {
            Ok(()) => {
                drop(guards);
                self.finish_commit();
                Ok(true)
            }
            Err(error) => {
                drop(guards);
                self.finish_abort();
                Err(error)
            }
        }
    }

    fn finish_commit(&self) {
        self.state.store(STATE_COMMITTED, Ordering::Release);
        self.parent.release_listener(self.monitor.id());
    }

    pub(crate) fn finish_abort(&self) {
        self.state.store(STATE_ABORTED, Ordering::Release);
        self.parent.release_listener(self.monitor.id());
    }

    /// Attempts to commit. Returns `false` when a conflict or lock timeout
    /// prevented the commit; the operation is then aborted and the caller
    /// may retry from scratch.
    pub fn commit(&self) -> Result<bool, TxnError> {
        match self.prepare_commit()? {
            Some(guards) => self.complete_commit(guards),
            None => Ok(false),
        }
    }

    /// Aborts the operation, releasing its subscriptions. Idempotent; a
    /// committed operation is left committed.
    pub fn abort(&self) {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_ABORTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.parent.release_listener(self.monitor.id());
        }
    }
}

impl Engine {
    /// Starts a top-level atomic operation over this engine.
    pub fn start_atomic_operation(&self) -> AtomicOperation<'_, Engine> {
        AtomicOperation::start(self)
    }
}
