// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory queue buffers for atomic and transaction scopes.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use crate::model::{Operator, RecordId, Token, Value, Write};
use crate::storage::{Destination, StoreError};

use super::Limbo;

/// A short-lived in-memory buffer backing one atomic operation.
///
/// Writes live here from staging until the operation drains them into its
/// parent at commit. The `sync` directive is a no-op: queue contents are
/// never durable on their own.
#[derive(Debug, Default)]
pub struct Queue {
    writes: Mutex<Vec<Write>>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { writes: Mutex::new(Vec::with_capacity(capacity)) }
    }

    /// Removes and returns all buffered writes in insertion order.
    pub fn drain(&self) -> Vec<Write> {
        std::mem::take(&mut *self.writes.lock())
    }
}

impl Limbo for Queue {
    fn insert(&self, write: Write, _sync: bool) -> bool {
        debug_assert!(write.is_storable());
        self.writes.lock().push(write);
        true
    }

    fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    fn browse_key(
        &self,
        key: &str,
        timestamp: u64,
        context: &mut HashMap<Value, HashSet<RecordId>>,
    ) {
        super::fold_browse_key(&self.writes.lock(), key, timestamp, context);
    }

    fn browse_record(
        &self,
        record: RecordId,
        timestamp: u64,
        context: &mut HashMap<String, HashSet<Value>>,
    ) {
        super::fold_browse_record(&self.writes.lock(), record, timestamp, context);
    }

    fn select(&self, key: &str, record: RecordId, timestamp: u64, context: &mut HashSet<Value>) {
        super::fold_select(&self.writes.lock(), key, record, timestamp, context);
    }

    fn verify(&self, probe: &Write, timestamp: u64, baseline: bool) -> bool {
        super::fold_verify(&self.writes.lock(), probe, timestamp, baseline)
    }

    fn explore(
        &self,
        context: &mut BTreeMap<RecordId, HashSet<Value>>,
        timestamp: u64,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) {
        super::fold_explore(&self.writes.lock(), context, timestamp, key, operator, values);
    }

    fn search(&self, key: &str, query: &str, context: &mut HashSet<RecordId>) {
        super::fold_search(&self.writes.lock(), key, query, context);
    }

    fn audit_record(&self, record: RecordId) -> BTreeMap<u64, String> {
        super::fold_audit_record(&self.writes.lock(), record)
    }

    fn audit_field(&self, key: &str, record: RecordId) -> BTreeMap<u64, String> {
        super::fold_audit_field(&self.writes.lock(), key, record)
    }

    fn drain(&self) -> Vec<Write> {
        Queue::drain(self)
    }

    fn transport(&self, destination: &dyn Destination) -> Result<(), StoreError> {
        for write in Queue::drain(self) {
            destination.accept(write)?;
        }
        Ok(())
    }

    fn version(&self, scope: &Token) -> u64 {
        super::scope_version(&self.writes.lock(), scope)
    }

    fn len(&self) -> usize {
        self.writes.lock().len()
    }
}

/// The buffer backing a transaction.
///
/// Identical to [`Queue`] in behavior, but sized for a longer life: a
/// transaction accumulates the writes of every nested operation it commits,
/// and its buffered writes are also what gets serialized into the commit
/// backup.
#[derive(Debug)]
pub struct TransactionQueue {
    inner: Queue,
}

impl TransactionQueue {
    pub const INITIAL_CAPACITY: usize = 16;

    pub fn new() -> Self {
        Self { inner: Queue::with_capacity(Self::INITIAL_CAPACITY) }
    }

    /// Removes and returns all buffered writes in insertion order.
    pub fn drain(&self) -> Vec<Write> {
        self.inner.drain()
    }
}

impl Default for TransactionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Limbo for TransactionQueue {
    fn insert(&self, write: Write, sync: bool) -> bool {
        self.inner.insert(write, sync)
    }

    fn writes(&self) -> Vec<Write> {
        self.inner.writes()
    }

    fn browse_key(
        &self,
        key: &str,
        timestamp: u64,
        context: &mut HashMap<Value, HashSet<RecordId>>,
    ) {
        self.inner.browse_key(key, timestamp, context);
    }

    fn browse_record(
        &self,
        record: RecordId,
        timestamp: u64,
        context: &mut HashMap<String, HashSet<Value>>,
    ) {
        self.inner.browse_record(record, timestamp, context);
    }

    fn select(&self, key: &str, record: RecordId, timestamp: u64, context: &mut HashSet<Value>) {
        self.inner.select(key, record, timestamp, context);
    }

    fn verify(&self, probe: &Write, timestamp: u64, baseline: bool) -> bool {
        self.inner.verify(probe, timestamp, baseline)
    }

    fn explore(
        &self,
        context: &mut BTreeMap<RecordId, HashSet<Value>>,
        timestamp: u64,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) {
        self.inner.explore(context, timestamp, key, operator, values);
    }

    fn search(&self, key: &str, query: &str, context: &mut HashSet<RecordId>) {
        self.inner.search(key, query, context);
    }

    fn audit_record(&self, record: RecordId) -> BTreeMap<u64, String> {
        self.inner.audit_record(record)
    }

    fn audit_field(&self, key: &str, record: RecordId) -> BTreeMap<u64, String> {
        self.inner.audit_field(key, record)
    }

    fn drain(&self) -> Vec<Write> {
        TransactionQueue::drain(self)
    }

    fn transport(&self, destination: &dyn Destination) -> Result<(), StoreError> {
        self.inner.transport(destination)
    }

    fn version(&self, scope: &Token) -> u64 {
        self.inner.version(scope)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order() {
        let queue = Queue::new();
        for i in 0..5 {
            assert!(queue.insert(Write::add("k", Value::Long(i), 1, 10 + i as u64), false));
        }
        let versions: Vec<u64> = queue.writes().iter().map(Write::version).collect();
        assert_eq!(versions, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = Queue::new();
        queue.insert(Write::add("k", Value::Long(1), 1, 10), false);
        queue.insert(Write::remove("k", Value::Long(1), 1, 20), false);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_select_sees_own_writes() {
        let queue = Queue::new();
        queue.insert(Write::add("name", Value::from("alice"), 1, 10), false);

        let mut context = HashSet::new();
        queue.select("name", 1, u64::MAX, &mut context);
        assert_eq!(context, HashSet::from([Value::from("alice")]));
    }

    #[test]
    fn test_version_tracks_scopes() {
        let queue = TransactionQueue::new();
        queue.insert(Write::add("name", Value::from("a"), 1, 10), false);
        queue.insert(Write::add("age", Value::Integer(1), 2, 20), false);

        assert_eq!(queue.version(&Token::field("name", 1)), 10);
        assert_eq!(queue.version(&Token::record(2)), 20);
        assert_eq!(queue.version(&Token::key("name")), 10);
        assert_eq!(queue.version(&Token::key("missing")), 0);
    }
}
