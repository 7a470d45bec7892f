// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory permanent store.
//!
//! Accepted writes feed two representations: materialized present-time views
//! (field sets, per-key inverted indexes, and per-record maps) answering
//! present reads in constant time, and ordered per-scope history slices
//! replayed for historical reads, audits, and parity checks. The two paths
//! are deliberately separate, mirroring how a disk-backed store would index
//! the present differently from the past.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use crate::limbo;
use crate::model::{Operator, RecordId, Token, Value, Write};

use super::{Destination, LockPolicy, StoreError};

#[derive(Debug, Default)]
struct DatabaseState {
    /// Every accepted write, in acceptance order.
    history: Vec<Write>,
    /// Indexes into `history` by scope.
    field_index: HashMap<(String, RecordId), Vec<usize>>,
    record_index: HashMap<RecordId, Vec<usize>>,
    key_index: HashMap<String, Vec<usize>>,
    /// Materialized present-time views.
    present_fields: HashMap<(String, RecordId), HashSet<Value>>,
    present_keys: HashMap<String, HashMap<Value, HashSet<RecordId>>>,
    present_records: HashMap<RecordId, HashMap<String, HashSet<Value>>>,
    /// Max accepted version per scope.
    versions: HashMap<Token, u64>,
}

impl DatabaseState {
    fn replay(&self, indices: Option<&Vec<usize>>) -> Vec<Write> {
        indices
            .map(|indices| indices.iter().map(|&i| self.history[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// The durable, queryable substrate that accepts transported writes.
#[derive(Debug, Default)]
pub struct Database {
    state: RwLock<DatabaseState>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one write into the indexes and present views.
    ///
    /// # Panics
    ///
    /// Panics if the write is a `Compare` probe; probes are never storable.
    pub fn apply(&self, write: Write) {
        use crate::model::Action;
        assert!(write.is_storable(), "compare probes cannot be accepted");

        let mut state = self.state.write();
        let index = state.history.len();
        let key = write.key().to_string();
        let record = write.record();
        let value = write.value().clone();
        let version = write.version();

        state
            .field_index
            .entry((key.clone(), record))
            .or_default()
            .push(index);
        state.record_index.entry(record).or_default().push(index);
        state.key_index.entry(key.clone()).or_default().push(index);

        match write.action() {
            Action::Add => {
                state
                    .present_fields
                    .entry((key.clone(), record))
                    .or_default()
                    .insert(value.clone());
                state
                    .present_keys
                    .entry(key.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(record);
                state
                    .present_records
                    .entry(record)
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .insert(value.clone());
            }
            Action::Remove => {
                if let Some(values) = state.present_fields.get_mut(&(key.clone(), record)) {
                    values.remove(&value);
                    if values.is_empty() {
                        state.present_fields.remove(&(key.clone(), record));
                    }
                }
                if let Some(by_value) = state.present_keys.get_mut(&key) {
                    if let Some(records) = by_value.get_mut(&value) {
                        records.remove(&record);
                        if records.is_empty() {
                            by_value.remove(&value);
                        }
                    }
                    if by_value.is_empty() {
                        state.present_keys.remove(&key);
                    }
                }
                if let Some(by_key) = state.present_records.get_mut(&record) {
                    if let Some(values) = by_key.get_mut(&key) {
                        values.remove(&value);
                        if values.is_empty() {
                            by_key.remove(&key);
                        }
                    }
                    if by_key.is_empty() {
                        state.present_records.remove(&record);
                    }
                }
            }
            Action::Compare => unreachable!(),
        }

        for scope in [
            Token::record(record),
            Token::key(&key),
            Token::field(&key, record),
        ] {
            let entry = state.versions.entry(scope).or_insert(0);
            *entry = (*entry).max(version);
        }
        state.history.push(write);
    }

    /// Values currently in one field.
    pub fn select(&self, key: &str, record: RecordId) -> HashSet<Value> {
        self.state
            .read()
            .present_fields
            .get(&(key.to_string(), record))
            .cloned()
            .unwrap_or_default()
    }

    /// Values in one field as of `timestamp`, replayed from history.
    pub fn select_at(&self, key: &str, record: RecordId, timestamp: u64) -> HashSet<Value> {
        let state = self.state.read();
        let writes = state.replay(state.field_index.get(&(key.to_string(), record)));
        let mut context = HashSet::new();
        limbo::fold_select(&writes, key, record, timestamp, &mut context);
        context
    }

    /// Current mapping of keys to value sets in `record`.
    pub fn browse_record(&self, record: RecordId) -> HashMap<String, HashSet<Value>> {
        self.state
            .read()
            .present_records
            .get(&record)
            .cloned()
            .unwrap_or_default()
    }

    pub fn browse_record_at(
        &self,
        record: RecordId,
        timestamp: u64,
    ) -> HashMap<String, HashSet<Value>> {
        let state = self.state.read();
        let writes = state.replay(state.record_index.get(&record));
        let mut context = HashMap::new();
        limbo::fold_browse_record(&writes, record, timestamp, &mut context);
        context
    }

    /// Current inverted index for `key`: value to the records containing it.
    pub fn browse_key(&self, key: &str) -> HashMap<Value, HashSet<RecordId>> {
        self.state
            .read()
            .present_keys
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn browse_key_at(&self, key: &str, timestamp: u64) -> HashMap<Value, HashSet<RecordId>> {
        let state = self.state.read();
        let writes = state.replay(state.key_index.get(key));
        let mut context = HashMap::new();
        limbo::fold_browse_key(&writes, key, timestamp, &mut context);
        context
    }

    /// Membership of `value` in one field, now.
    pub fn verify(&self, key: &str, value: &Value, record: RecordId) -> bool {
        self.state
            .read()
            .present_fields
            .get(&(key.to_string(), record))
            .is_some_and(|values| values.contains(value))
    }

    /// Membership of `value` in one field at `timestamp`, by write parity.
    pub fn verify_at(&self, key: &str, value: &Value, record: RecordId, timestamp: u64) -> bool {
        let state = self.state.read();
        let writes = state.replay(state.field_index.get(&(key.to_string(), record)));
        let probe = Write::compare(key, value.clone(), record);
        limbo::fold_verify(&writes, &probe, timestamp, false)
    }

    /// Records whose current values for `key` satisfy the predicate, mapped
    /// to those matching values.
    pub fn explore(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) -> BTreeMap<RecordId, HashSet<Value>> {
        let state = self.state.read();
        let mut result: BTreeMap<RecordId, HashSet<Value>> = BTreeMap::new();
        if let Some(by_value) = state.present_keys.get(key) {
            for (stored, records) in by_value {
                if operator.matches(stored, values) {
                    for record in records {
                        result.entry(*record).or_default().insert(stored.clone());
                    }
                }
            }
        }
        result
    }

    pub fn explore_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        timestamp: u64,
    ) -> BTreeMap<RecordId, HashSet<Value>> {
        let state = self.state.read();
        let writes = state.replay(state.key_index.get(key));
        let mut context = BTreeMap::new();
        limbo::fold_explore(&writes, &mut context, timestamp, key, operator, values);
        context
    }

    /// Records whose current values for `key` satisfy the text query.
    pub fn search(&self, key: &str, query: &str) -> HashSet<RecordId> {
        let state = self.state.read();
        let mut result = HashSet::new();
        if let Some(by_value) = state.present_keys.get(key) {
            for (stored, records) in by_value {
                if limbo::matches_query(stored, query) {
                    result.extend(records.iter().copied());
                }
            }
        }
        result
    }

    /// Revision log for `record`: version to revision string.
    pub fn audit_record(&self, record: RecordId) -> BTreeMap<u64, String> {
        let state = self.state.read();
        let writes = state.replay(state.record_index.get(&record));
        limbo::fold_audit_record(&writes, record)
    }

    /// Revision log for one field.
    pub fn audit_field(&self, key: &str, record: RecordId) -> BTreeMap<u64, String> {
        let state = self.state.read();
        let writes = state.replay(state.field_index.get(&(key.to_string(), record)));
        limbo::fold_audit_field(&writes, key, record)
    }

    /// Max accepted version for `scope`, zero if untouched.
    pub fn version(&self, scope: &Token) -> u64 {
        self.state.read().versions.get(scope).copied().unwrap_or(0)
    }
}

impl Destination for Database {
    fn accept(&self, write: Write) -> Result<(), StoreError> {
        self.apply(write);
        Ok(())
    }

    fn select(
        &self,
        key: &str,
        record: RecordId,
        _policy: LockPolicy,
    ) -> Result<HashSet<Value>, StoreError> {
        Ok(Database::select(self, key, record))
    }

    fn select_at(
        &self,
        key: &str,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashSet<Value>, StoreError> {
        Ok(Database::select_at(self, key, record, timestamp))
    }

    fn browse_record(
        &self,
        record: RecordId,
        _policy: LockPolicy,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        Ok(Database::browse_record(self, record))
    }

    fn browse_record_at(
        &self,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        Ok(Database::browse_record_at(self, record, timestamp))
    }

    fn browse_key(
        &self,
        key: &str,
        _policy: LockPolicy,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        Ok(Database::browse_key(self, key))
    }

    fn browse_key_at(
        &self,
        key: &str,
        timestamp: u64,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        Ok(Database::browse_key_at(self, key, timestamp))
    }

    fn verify(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        _policy: LockPolicy,
    ) -> Result<bool, StoreError> {
        Ok(Database::verify(self, key, value, record))
    }

    fn verify_at(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        timestamp: u64,
    ) -> Result<bool, StoreError> {
        Ok(Database::verify_at(self, key, value, record, timestamp))
    }

    fn explore(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        _policy: LockPolicy,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        Ok(Database::explore(self, key, operator, values))
    }

    fn explore_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        timestamp: u64,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        Ok(Database::explore_at(self, key, operator, values, timestamp))
    }

    fn search(
        &self,
        key: &str,
        query: &str,
        _policy: LockPolicy,
    ) -> Result<HashSet<RecordId>, StoreError> {
        Ok(Database::search(self, key, query))
    }

    fn audit_record(&self, record: RecordId) -> Result<BTreeMap<u64, String>, StoreError> {
        Ok(Database::audit_record(self, record))
    }

    fn audit_field(
        &self,
        key: &str,
        record: RecordId,
    ) -> Result<BTreeMap<u64, String>, StoreError> {
        Ok(Database::audit_field(self, key, record))
    }

    fn version(&self, scope: &Token) -> u64 {
        Database::version(self, scope)
    }
}
