// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! A buffer and a destination composed into one logical store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::limbo::Limbo;
use crate::model::{Operator, RecordId, Token, Value, Write};
use crate::time::MonotonicClock;

use super::{Destination, LockPolicy, StoreError};

/// Composes a [`Limbo`] buffer with a [`Destination`] into a single logical
/// store.
///
/// Reads take the destination's answer as a baseline context and fold the
/// buffer's pending writes into it; writes land in the buffer only, and reach
/// the destination exclusively through transport or draining.
///
/// No buffer-to-destination lock is held here. Each composing layer has its
/// own locking discipline: atomic operations defer all locking to commit,
/// while the engine coordinates readers and transports itself.
pub struct BufferedStore<B: Limbo, D: Destination> {
    buffer: B,
    destination: D,
    clock: Arc<MonotonicClock>,
}

impl<B: Limbo, D: Destination> BufferedStore<B, D> {
    pub fn new(buffer: B, destination: D, clock: Arc<MonotonicClock>) -> Self {
        Self { buffer, destination, clock }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn clock(&self) -> &Arc<MonotonicClock> {
        &self.clock
    }

    fn check_key(key: &str) -> Result<(), StoreError> {
        if key.trim().is_empty() {
            return Err(StoreError::InvalidKey);
        }
        Ok(())
    }

    /// Adds `value` to the field iff the field does not currently contain it
    /// (unless `validate` is off). Returns the inserted write.
    pub fn add(
        &self,
        key: &str,
        value: Value,
        record: RecordId,
        sync: bool,
        validate: bool,
        policy: LockPolicy,
    ) -> Result<Option<Write>, StoreError> {
        Self::check_key(key)?;
        let write = Write::add(key, value, record, self.clock.now());
        if !validate || !self.verify_write(&write, policy)? {
            self.buffer.insert(write.clone(), sync);
            return Ok(Some(write));
        }
        Ok(None)
    }

    /// Removes `value` from the field iff the field currently contains it
    /// (unless `validate` is off). Returns the inserted write.
    pub fn remove(
        &self,
        key: &str,
        value: Value,
        record: RecordId,
        sync: bool,
        validate: bool,
        policy: LockPolicy,
    ) -> Result<Option<Write>, StoreError> {
        Self::check_key(key)?;
        let write = Write::remove(key, value, record, self.clock.now());
        if !validate || self.verify_write(&write, policy)? {
            self.buffer.insert(write.clone(), sync);
            return Ok(Some(write));
        }
        Ok(None)
    }

    /// Replaces all values in the field with `value`: removes for every
    /// current value, then one add. No existence check is performed.
    /// Returns the inserted writes in order.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        record: RecordId,
        sync: bool,
        policy: LockPolicy,
    ) -> Result<Vec<Write>, StoreError> {
        Self::check_key(key)?;
        let current = self.select(key, record, policy)?;
        let mut inserted = Vec::with_capacity(current.len() + 1);
        for existing in current {
            let write = Write::remove(key, existing, record, self.clock.now());
            self.buffer.insert(write.clone(), sync);
            inserted.push(write);
        }
        let write = Write::add(key, value, record, self.clock.now());
        self.buffer.insert(write.clone(), sync);
        inserted.push(write);
        Ok(inserted)
    }

    /// Checks membership for the `(key, value, record)` of a staged write,
    /// folding the buffer over the destination's answer. Reuses the write as
    /// the probe so callers do not build a duplicate.
    pub fn verify_write(&self, write: &Write, policy: LockPolicy) -> Result<bool, StoreError> {
        let baseline = self
            .destination
            .verify(write.key(), write.value(), write.record(), policy)?;
        Ok(self.buffer.verify(write, self.clock.now(), baseline))
    }

    pub fn select(
        &self,
        key: &str,
        record: RecordId,
        policy: LockPolicy,
    ) -> Result<HashSet<Value>, StoreError> {
        let mut context = self.destination.select(key, record, policy)?;
        self.buffer.select(key, record, self.clock.now(), &mut context);
        Ok(context)
    }

    pub fn select_at(
        &self,
        key: &str,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashSet<Value>, StoreError> {
        let mut context = self.destination.select_at(key, record, timestamp)?;
        self.buffer.select(key, record, timestamp, &mut context);
        Ok(context)
    }

    pub fn browse_record(
        &self,
        record: RecordId,
        policy: LockPolicy,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        let mut context = self.destination.browse_record(record, policy)?;
        self.buffer.browse_record(record, self.clock.now(), &mut context);
        Ok(context)
    }

    pub fn browse_record_at(
        &self,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        let mut context = self.destination.browse_record_at(record, timestamp)?;
        self.buffer.browse_record(record, timestamp, &mut context);
        Ok(context)
    }

    pub fn browse_key(
        &self,
        key: &str,
        policy: LockPolicy,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        let mut context = self.destination.browse_key(key, policy)?;
        self.buffer.browse_key(key, self.clock.now(), &mut context);
        Ok(context)
    }

    pub fn browse_key_at(
        &self,
        key: &str,
        timestamp: u64,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        let mut context = self.destination.browse_key_at(key, timestamp)?;
        self.buffer.browse_key(key, timestamp, &mut context);
        Ok(context)
    }

    pub fn verify(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        policy: LockPolicy,
    ) -> Result<bool, StoreError> {
        let probe = Write::compare(key, value.clone(), record);
        self.verify_write(&probe, policy)
    }

    pub fn verify_at(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        timestamp: u64,
    ) -> Result<bool, StoreError> {
        let baseline = self.destination.verify_at(key, value, record, timestamp)?;
        let probe = Write::compare(key, value.clone(), record);
        Ok(self.buffer.verify(&probe, timestamp, baseline))
    }

    pub fn explore(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        policy: LockPolicy,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        let mut context = self.destination.explore(key, operator, values, policy)?;
        self.buffer
            .explore(&mut context, self.clock.now(), key, operator, values);
        Ok(context)
    }

    pub fn explore_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        timestamp: u64,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        let mut context = self.destination.explore_at(key, operator, values, timestamp)?;
        self.buffer.explore(&mut context, timestamp, key, operator, values);
        Ok(context)
    }

    /// Merged search: the destination's hit set refined by replaying matching
    /// buffer writes in order, so a buffered remove cancels a permanent hit
    /// instead of resurrecting it.
    pub fn search(
        &self,
        key: &str,
        query: &str,
        policy: LockPolicy,
    ) -> Result<HashSet<RecordId>, StoreError> {
        let mut context = self.destination.search(key, query, policy)?;
        self.buffer.search(key, query, &mut context);
        Ok(context)
    }

    /// Merged revision log: the destination's audit overlaid with the
    /// buffer's pending revisions.
    pub fn audit_record(&self, record: RecordId) -> Result<BTreeMap<u64, String>, StoreError> {
        let mut result = self.destination.audit_record(record)?;
        result.extend(self.buffer.audit_record(record));
        Ok(result)
    }

    pub fn audit_field(
        &self,
        key: &str,
        record: RecordId,
    ) -> Result<BTreeMap<u64, String>, StoreError> {
        let mut result = self.destination.audit_field(key, record)?;
        result.extend(self.buffer.audit_field(key, record));
        Ok(result)
    }

    /// Max version for `scope` across buffer and destination.
    pub fn version(&self, scope: &Token) -> u64 {
        self.buffer.version(scope).max(self.destination.version(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limbo::Queue;
    use crate::storage::Database;

    fn store() -> BufferedStore<Queue, Database> {
        BufferedStore::new(Queue::new(), Database::new(), Arc::new(MonotonicClock::new()))
    }

    #[test]
    fn test_add_validates_membership() {
        let store = store();
        let first = store
            .add("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(first.is_some());
        // The second add is a no-op because the field already contains the
        // value, observed through the store's own buffer.
        let second = store
            .add("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_remove_validates_membership() {
        let store = store();
        let missing = store
            .remove("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(missing.is_none());

        store
            .add("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        let removed = store
            .remove("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(removed.is_some());
        let again = store
            .remove("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_unvalidated_add_skips_check() {
        let store = store();
        for _ in 0..2 {
            let inserted = store
                .add("name", Value::from("alice"), 1, false, false, LockPolicy::Bypass)
                .unwrap();
            assert!(inserted.is_some());
        }
        // Two unchecked adds toggle the value back out of existence.
        let values = store.select("name", 1, LockPolicy::Bypass).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_xor_merge_with_destination() {
        let store = store();
        // The destination already contains the value.
        store
            .destination()
            .apply(Write::add("name", Value::from("alice"), 1, 1));

        assert!(store
            .verify("name", &Value::from("alice"), 1, LockPolicy::Bypass)
            .unwrap());

        // A buffered remove cancels the permanent presence.
        store
            .remove("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(!store
            .verify("name", &Value::from("alice"), 1, LockPolicy::Bypass)
            .unwrap());

        // A subsequent buffered add restores it.
        store
            .add("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        assert!(store
            .verify("name", &Value::from("alice"), 1, LockPolicy::Bypass)
            .unwrap());
    }

    #[test]
    fn test_set_replaces_multi_values() {
        let store = store();
        store
            .add("name", Value::from("alice"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        store
            .add("name", Value::from("bob"), 1, false, true, LockPolicy::Bypass)
            .unwrap();

        let writes = store
            .set("name", Value::from("carol"), 1, false, LockPolicy::Bypass)
            .unwrap();
        assert_eq!(writes.len(), 3); // two removes, one add

        let values = store.select("name", 1, LockPolicy::Bypass).unwrap();
        assert_eq!(values, HashSet::from([Value::from("carol")]));
    }

    #[test]
    fn test_historical_read_uses_destination_history() {
        let store = store();
        store
            .destination()
            .apply(Write::add("name", Value::from("alice"), 1, 10));
        store
            .destination()
            .apply(Write::remove("name", Value::from("alice"), 1, 20));

        assert_eq!(
            store.select_at("name", 1, 15).unwrap(),
            HashSet::from([Value::from("alice")])
        );
        assert!(store.select_at("name", 1, 25).unwrap().is_empty());
    }

    #[test]
    fn test_search_merges_buffer_over_hits() {
        let store = store();
        store
            .destination()
            .apply(Write::add("bio", Value::from("rust developer"), 1, 10));
        store
            .destination()
            .apply(Write::add("bio", Value::from("rust gardener"), 2, 20));

        // A buffered remove of a permanent hit cancels it instead of
        // resurrecting it through a symmetric difference.
        store
            .remove("bio", Value::from("rust developer"), 1, false, true, LockPolicy::Bypass)
            .unwrap();
        store
            .add("bio", Value::from("rust painter"), 3, false, true, LockPolicy::Bypass)
            .unwrap();

        let hits = store.search("bio", "rust", LockPolicy::Bypass).unwrap();
        assert_eq!(hits, HashSet::from([2, 3]));
    }

    #[test]
    fn test_audit_overlay() {
        let store = store();
        store
            .destination()
            .apply(Write::add("name", Value::from("alice"), 1, 10));
        store
            .add("name", Value::from("bob"), 1, false, true, LockPolicy::Bypass)
            .unwrap();

        let audit = store.audit_record(1).unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[&10], "ADD 'name' AS 'alice' TO 1");
        assert!(audit.values().any(|line| line == "ADD 'name' AS 'bob' TO 1"));
    }

    #[test]
    fn test_version_is_max_of_tiers() {
        let store = store();
        store
            .destination()
            .apply(Write::add("name", Value::from("alice"), 1, 10));
        let scope = Token::field("name", 1);
        assert_eq!(store.version(&scope), 10);

        let write = store
            .add("name", Value::from("bob"), 1, false, true, LockPolicy::Bypass)
            .unwrap()
            .unwrap();
        assert_eq!(store.version(&scope), write.version());
        assert!(write.version() > 10);
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = store();
        let result = store.add("  ", Value::from("x"), 1, false, true, LockPolicy::Bypass);
        assert!(matches!(result, Err(StoreError::InvalidKey)));
    }
}
