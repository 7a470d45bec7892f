// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Limbo: ordered, volatile buffers of writes awaiting transport.
//!
//! A buffer absorbs writes in strict insertion order and answers reads by
//! folding its pending writes into a context obtained from a permanent store.
//! The folds follow XOR semantics: each matching add/remove toggles
//! membership, so the combined view of (permanent baseline, buffer toggles)
//! is the present state without ever rewriting the baseline.
//!
//! Three implementations exist: [`Queue`] for atomic operation scopes,
//! [`TransactionQueue`] for transaction scopes, and [`WriteLog`] as the
//! engine's main buffer with constant-time version lookups and FIFO
//! transport.

mod log;
mod queue;

use std::collections::{BTreeMap, HashMap, HashSet};

pub use log::WriteLog;
pub use queue::{Queue, TransactionQueue};

use crate::model::{Operator, RecordId, Token, Value, Write};
use crate::storage::{Destination, StoreError};

/// An ordered, appendable buffer of writes.
///
/// Browse, select, verify, explore, and search are pure functions of
/// `(writes, timestamp, context)`.
pub trait Limbo: Send + Sync {
    /// Appends a write. If `sync` is set, the buffer guarantees durability
    /// before returning (a no-op for in-memory buffers). Returns true.
    fn insert(&self, write: Write, sync: bool) -> bool;

    /// Returns an ordered snapshot of all buffered writes.
    fn writes(&self) -> Vec<Write>;

    /// Folds buffered writes on `key` up to `timestamp` into a
    /// value-to-records context. Empty record sets are pruned.
    fn browse_key(
        &self,
        key: &str,
        timestamp: u64,
        context: &mut HashMap<Value, HashSet<RecordId>>,
    );

    /// Folds buffered writes on `record` up to `timestamp` into a
    /// key-to-values context. Empty value sets are pruned.
    fn browse_record(
        &self,
        record: RecordId,
        timestamp: u64,
        context: &mut HashMap<String, HashSet<Value>>,
    );

    /// Folds buffered writes on one field up to `timestamp` into a value set.
    fn select(&self, key: &str, record: RecordId, timestamp: u64, context: &mut HashSet<Value>);

    /// Returns `baseline` XOR the count-parity of buffered writes matching
    /// the probe's `(key, value, record)` up to `timestamp`.
    fn verify(&self, probe: &Write, timestamp: u64, baseline: bool) -> bool;

    /// Refines an operator predicate result by replaying buffered writes on
    /// `key` up to `timestamp`. Records left without matching values are
    /// pruned.
    fn explore(
        &self,
        context: &mut BTreeMap<RecordId, HashSet<Value>>,
        timestamp: u64,
        key: &str,
        operator: Operator,
        values: &[Value],
    );

    /// Replays buffered writes on `key` whose values satisfy the text query
    /// against `context`: an add inserts the record, a remove deletes it.
    fn search(&self, key: &str, query: &str, context: &mut HashSet<RecordId>);

    /// Revision log of buffered writes touching `record`.
    fn audit_record(&self, record: RecordId) -> BTreeMap<u64, String>;

    /// Revision log of buffered writes touching one field.
    fn audit_field(&self, key: &str, record: RecordId) -> BTreeMap<u64, String>;

    /// Removes and returns all buffered writes in insertion order.
    fn drain(&self) -> Vec<Write>;

    /// Drains all buffered writes, in order, into `destination.accept`.
    /// Each write is delivered at most once.
    fn transport(&self, destination: &dyn Destination) -> Result<(), StoreError>;

    /// Max timestamp this buffer has observed for `scope`, zero if untouched.
    fn version(&self, scope: &Token) -> u64;

    /// Number of buffered writes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Toggles `value` in `set` and reports whether the set became empty.
fn toggle<T: std::hash::Hash + Eq>(set: &mut HashSet<T>, value: T) -> bool {
    if !set.remove(&value) {
        set.insert(value);
    }
    set.is_empty()
}

/// Returns true if a stored value satisfies the search query: a
/// case-insensitive substring match over textual values.
pub(crate) fn matches_query(value: &Value, query: &str) -> bool {
    value
        .as_text()
        .is_some_and(|text| text.to_lowercase().contains(&query.to_lowercase()))
}

pub(crate) fn fold_browse_key(
    writes: &[Write],
    key: &str,
    timestamp: u64,
    context: &mut HashMap<Value, HashSet<RecordId>>,
) {
    for write in writes {
        if write.version() <= timestamp && write.key() == key {
            let records = context.entry(write.value().clone()).or_default();
            if toggle(records, write.record()) {
                context.remove(write.value());
            }
        }
    }
}

pub(crate) fn fold_browse_record(
    writes: &[Write],
    record: RecordId,
    timestamp: u64,
    context: &mut HashMap<String, HashSet<Value>>,
) {
    for write in writes {
        if write.version() <= timestamp && write.record() == record {
            let values = context.entry(write.key().to_string()).or_default();
            if toggle(values, write.value().clone()) {
                context.remove(write.key());
            }
        }
    }
}

pub(crate) fn fold_select(
    writes: &[Write],
    key: &str,
    record: RecordId,
    timestamp: u64,
    context: &mut HashSet<Value>,
) {
    for write in writes {
        if write.version() <= timestamp && write.key() == key && write.record() == record {
            toggle(context, write.value().clone());
        }
    }
}

pub(crate) fn fold_verify(writes: &[Write], probe: &Write, timestamp: u64, baseline: bool) -> bool {
    let mut present = baseline;
    for write in writes {
        if write.version() <= timestamp && write.matches(probe) {
            present = !present;
        }
    }
    present
}

pub(crate) fn fold_explore(
    writes: &[Write],
    context: &mut BTreeMap<RecordId, HashSet<Value>>,
    timestamp: u64,
    key: &str,
    operator: Operator,
    values: &[Value],
) {
    for write in writes {
        if write.version() <= timestamp
            && write.key() == key
            && operator.matches(write.value(), values)
        {
            let matching = context.entry(write.record()).or_default();
            if toggle(matching, write.value().clone()) {
                context.remove(&write.record());
            }
        }
    }
}

pub(crate) fn fold_search(
    writes: &[Write],
    key: &str,
    query: &str,
    context: &mut HashSet<RecordId>,
) {
    use crate::model::Action;
    for write in writes {
        if write.key() == key && matches_query(write.value(), query) {
            match write.action() {
                Action::Add => {
                    context.insert(write.record());
                }
                Action::Remove => {
                    context.remove(&write.record());
                }
                Action::Compare => {}
            }
        }
    }
}

pub(crate) fn fold_audit_record(writes: &[Write], record: RecordId) -> BTreeMap<u64, String> {
    writes
        .iter()
        .filter(|write| write.record() == record)
        .map(|write| (write.version(), write.describe()))
        .collect()
}

pub(crate) fn fold_audit_field(
    writes: &[Write],
    key: &str,
    record: RecordId,
) -> BTreeMap<u64, String> {
    writes
        .iter()
        .filter(|write| write.record() == record && write.key() == key)
        .map(|write| (write.version(), write.describe()))
        .collect()
}

/// Returns true if `write` touches `scope`.
pub(crate) fn touches(write: &Write, scope: &Token) -> bool {
    match scope {
        Token::Record(record) => write.record() == *record,
        Token::Key(key) => write.key() == key,
        Token::Field(key, record) => write.key() == key && write.record() == *record,
        Token::Range { key, value } => write.key() == key && write.value() == value,
    }
}

pub(crate) fn scope_version(writes: &[Write], scope: &Token) -> u64 {
    writes
        .iter()
        .filter(|write| touches(write, scope))
        .map(Write::version)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(key: &str, value: Value, record: RecordId, version: u64) -> Write {
        Write::add(key, value, record, version)
    }

    fn remove(key: &str, value: Value, record: RecordId, version: u64) -> Write {
        Write::remove(key, value, record, version)
    }

    #[test]
    fn test_fold_select_toggles() {
        let writes = vec![
            add("name", Value::from("alice"), 1, 10),
            remove("name", Value::from("alice"), 1, 20),
            add("name", Value::from("alice"), 1, 30),
        ];
        let mut context = HashSet::new();
        fold_select(&writes, "name", 1, u64::MAX, &mut context);
        assert_eq!(context, HashSet::from([Value::from("alice")]));

        // Up to the remove, the value is gone.
        let mut context = HashSet::new();
        fold_select(&writes, "name", 1, 20, &mut context);
        assert!(context.is_empty());
    }

    #[test]
    fn test_fold_select_toggles_baseline_out() {
        let writes = vec![remove("name", Value::from("alice"), 1, 10)];
        let mut context = HashSet::from([Value::from("alice"), Value::from("bob")]);
        fold_select(&writes, "name", 1, u64::MAX, &mut context);
        assert_eq!(context, HashSet::from([Value::from("bob")]));
    }

    #[test]
    fn test_fold_verify_parity() {
        let probe = Write::compare("name", Value::from("alice"), 1);
        let writes = vec![
            add("name", Value::from("alice"), 1, 10),
            remove("name", Value::from("alice"), 1, 20),
            add("name", Value::from("alice"), 1, 30),
        ];
        assert!(fold_verify(&writes, &probe, u64::MAX, false));
        assert!(!fold_verify(&writes, &probe, 25, false));
        assert!(fold_verify(&writes, &probe, 15, false));
        // An odd parity inverts a true baseline.
        assert!(!fold_verify(&writes, &probe, u64::MAX, true));
    }

    #[test]
    fn test_fold_browse_key_prunes_empty_sets() {
        let writes = vec![remove("name", Value::from("alice"), 1, 10)];
        let mut context = HashMap::from([(Value::from("alice"), HashSet::from([1]))]);
        fold_browse_key(&writes, "name", u64::MAX, &mut context);
        assert!(context.is_empty());
    }

    #[test]
    fn test_fold_browse_record_prunes_empty_sets() {
        let writes = vec![
            add("age", Value::Integer(30), 1, 10),
            remove("name", Value::from("alice"), 1, 20),
        ];
        let mut context = HashMap::from([(
            "name".to_string(),
            HashSet::from([Value::from("alice")]),
        )]);
        fold_browse_record(&writes, 1, u64::MAX, &mut context);
        assert_eq!(
            context,
            HashMap::from([("age".to_string(), HashSet::from([Value::Integer(30)]))])
        );
    }

    #[test]
    fn test_fold_explore_refines_predicate() {
        // Permanent result for age > 3: {1: {5}, 2: {10}}.
        let mut context = BTreeMap::from([
            (1, HashSet::from([Value::Integer(5)])),
            (2, HashSet::from([Value::Integer(10)])),
        ]);
        let writes = vec![
            remove("age", Value::Integer(5), 1, 10),
            add("age", Value::Integer(4), 3, 20),
        ];
        fold_explore(
            &writes,
            &mut context,
            u64::MAX,
            "age",
            Operator::GreaterThan,
            &[Value::Integer(3)],
        );
        assert_eq!(
            context,
            BTreeMap::from([
                (2, HashSet::from([Value::Integer(10)])),
                (3, HashSet::from([Value::Integer(4)])),
            ])
        );
    }

    #[test]
    fn test_fold_search_replays_hits() {
        let writes = vec![
            add("bio", Value::from("Rust engineer"), 1, 10),
            add("bio", Value::from("gardener"), 2, 20),
            remove("bio", Value::from("Rust engineer"), 1, 30),
            add("bio", Value::from("rustacean"), 3, 40),
        ];
        let mut context = HashSet::from([4]); // permanent hit
        fold_search(&writes, "bio", "rust", &mut context);
        assert_eq!(context, HashSet::from([3, 4]));
    }

    #[test]
    fn test_scope_version() {
        let writes = vec![
            add("name", Value::from("alice"), 1, 10),
            add("age", Value::Integer(30), 1, 20),
            add("name", Value::from("bob"), 2, 30),
        ];
        assert_eq!(scope_version(&writes, &Token::record(1)), 20);
        assert_eq!(scope_version(&writes, &Token::key("name")), 30);
        assert_eq!(scope_version(&writes, &Token::field("name", 1)), 10);
        assert_eq!(scope_version(&writes, &Token::field("age", 9)), 0);
    }
}
