// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The engine: the top-level buffered store hosting parallel operations.
//!
//! The engine composes the main [`WriteLog`] buffer with the permanent
//! [`Database`], owns the lock services and the monotonic clock, publishes
//! version changes to subscribed listeners, and sweeps the transaction store
//! for crash backups on startup.
//!
//! # Coordination
//!
//! Lock acquisition follows a fixed phase order everywhere: token locks
//! (sorted), then range locks, then the transport lock. Readers take only the
//! transport read lock around the merged read, so a committing operation
//! draining its writes under the transport write lock is never observed
//! halfway.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::limbo::{Limbo, WriteLog};
use crate::lock::{LockMode, LockService, RangeLockService};
use crate::model::{Interval, Operator, RecordId, Token, Value, Write};
use crate::time::MonotonicClock;

use super::{
    BufferedStore, Database, Destination, LockPolicy, StoreError, VersionChangeListener,
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding transaction commit backups (`<id>.txn`).
    transaction_store: PathBuf,
    /// Bound on lock acquisition during transactional commits.
    lock_timeout: Duration,
    /// Buffer size at which the engine transports to the database.
    transport_threshold: usize,
}

impl EngineConfig {
    pub fn new(transaction_store: impl Into<PathBuf>) -> Self {
        Self {
            transaction_store: transaction_store.into(),
            lock_timeout: Duration::from_secs(5),
            transport_threshold: 1024,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_transport_threshold(mut self, threshold: usize) -> Self {
        self.transport_threshold = threshold;
        self
    }

    pub fn transaction_store(&self) -> &Path {
        &self.transaction_store
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn transport_threshold(&self) -> usize {
        self.transport_threshold
    }
}

#[derive(Default)]
struct ListenerRegistry {
    exact: HashMap<Token, Vec<(u64, Weak<dyn VersionChangeListener>)>>,
    ranges: HashMap<String, Vec<(u64, Interval, Weak<dyn VersionChangeListener>)>>,
}

impl ListenerRegistry {
    /// Strong handles to every listener subscribed to the written point.
    fn subscribers(&mut self, write: &Write) -> Vec<(Token, Arc<dyn VersionChangeListener>)> {
        let mut notify = Vec::new();
        for token in [
            Token::record(write.record()),
            Token::key(write.key()),
            Token::field(write.key(), write.record()),
        ] {
            if let Some(entries) = self.exact.get_mut(&token) {
                entries.retain(|(_, listener)| {
                    if let Some(listener) = listener.upgrade() {
                        notify.push((token.clone(), listener));
                        true
                    } else {
                        false
                    }
                });
                if entries.is_empty() {
                    self.exact.remove(&token);
                }
            }
        }
        if let Some(entries) = self.ranges.get_mut(write.key()) {
            let point = Token::Range {
                key: write.key().to_string(),
                value: write.value().clone(),
            };
            entries.retain(|(_, interval, listener)| {
                if let Some(listener) = listener.upgrade() {
                    if interval.contains(write.value()) {
                        notify.push((point.clone(), listener));
                    }
                    true
                } else {
                    false
                }
            });
            if entries.is_empty() {
                self.ranges.remove(write.key());
            }
        }
        notify
    }

    fn release(&mut self, id: u64) {
        self.exact.retain(|_, entries| {
            entries.retain(|(entry_id, _)| *entry_id != id);
            !entries.is_empty()
        });
        self.ranges.retain(|_, entries| {
            entries.retain(|(entry_id, _, _)| *entry_id != id);
            !entries.is_empty()
        });
    }
}

/// The buffered transactional store hosting all engine-level operations.
pub struct Engine {
    store: BufferedStore<WriteLog, Database>,
    lock_service: Arc<LockService>,
    range_lock_service: Arc<RangeLockService>,
    /// Readers hold this shared; drains and transports hold it exclusive.
    transport_lock: RwLock<()>,
    listeners: Mutex<ListenerRegistry>,
    config: EngineConfig,
}

impl Engine {
    /// Opens an engine and recovers any transaction backups left behind by a
    /// crash.
    pub fn start(config: EngineConfig) -> Result<Engine, StoreError> {
        std::fs::create_dir_all(&config.transaction_store)?;
        let engine = Engine {
            store: BufferedStore::new(
                WriteLog::new(),
                Database::new(),
                Arc::new(MonotonicClock::new()),
            ),
            lock_service: Arc::new(LockService::new()),
            range_lock_service: Arc::new(RangeLockService::new()),
            transport_lock: RwLock::new(()),
            listeners: Mutex::new(ListenerRegistry::default()),
            config,
        };
        engine.recover_transactions()?;
        Ok(engine)
    }

    fn recover_transactions(&self) -> Result<(), StoreError> {
        let mut backups: Vec<PathBuf> = std::fs::read_dir(&self.config.transaction_store)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "txn"))
            .collect();
        // Backup names are commit timestamps, so name order is commit order.
        backups.sort();
        for path in backups {
            crate::txn::Transaction::recover(self, &path);
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<MonotonicClock> {
        self.store.clock()
    }

    pub(crate) fn lock_service(&self) -> &Arc<LockService> {
        &self.lock_service
    }

    pub(crate) fn range_lock_service(&self) -> &Arc<RangeLockService> {
        &self.range_lock_service
    }

    /// Registers `listener` for version changes on `token`. Restricted to
    /// the transactional protocol; subscriptions are weak and are pruned
    /// once released or dropped.
    pub fn watch(&self, token: Token, listener: &Arc<dyn VersionChangeListener>) {
        self.listeners
            .lock()
            .exact
            .entry(token)
            .or_default()
            .push((listener.id(), Arc::downgrade(listener)));
    }

    /// Registers `listener` for version changes on any written point of
    /// `key` inside `interval`.
    pub fn watch_range(
        &self,
        key: &str,
        interval: Interval,
        listener: &Arc<dyn VersionChangeListener>,
    ) {
        self.listeners
            .lock()
            .ranges
            .entry(key.to_string())
            .or_default()
            .push((listener.id(), interval, Arc::downgrade(listener)));
    }

    /// Drops every subscription held by the listener with `id`.
    pub fn release_listener(&self, id: u64) {
        self.listeners.lock().release(id);
    }

    /// Announces a landed write to all subscribed listeners.
    fn announce(&self, write: &Write) {
        let notify = self.listeners.lock().subscribers(write);
        for (token, listener) in notify {
            listener.on_version_change(&token);
        }
    }

    /// Moves all buffered writes into the database, invisibly to concurrent
    /// merged readers.
    pub fn transport(&self) -> Result<(), StoreError> {
        let _exclusive = self.transport_lock.write();
        let moved = self.store.buffer().len();
        self.store.buffer().transport(self.store.destination())?;
        if moved > 0 {
            debug!(writes = moved, "transported buffer to database");
        }
        Ok(())
    }

    fn maybe_transport(&self) -> Result<(), StoreError> {
        if self.store.buffer().len() >= self.config.transport_threshold {
            self.transport()?;
        }
        Ok(())
    }

    /// Adds `value` to a field iff not currently present. Takes the field's
    /// write locks eagerly; there is no deferred commit phase for direct
    /// writes.
    pub fn add(&self, key: &str, value: Value, record: RecordId) -> Result<bool, StoreError> {
        let token = Token::field(key, record);
        let _guard = self.lock_service.write_lock(&token);
        let _range = self.range_lock_service.lock(
            self.clock().now(),
            key,
            LockMode::Write,
            Interval::point(value.clone()),
        );
        let inserted = {
            let _shared = self.transport_lock.read();
            self.store
                .add(key, value, record, true, true, LockPolicy::Coordinate)?
        };
        match inserted {
            Some(write) => {
                self.announce(&write);
                self.maybe_transport()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes `value` from a field iff currently present.
    pub fn remove(&self, key: &str, value: Value, record: RecordId) -> Result<bool, StoreError> {
        let token = Token::field(key, record);
        let _guard = self.lock_service.write_lock(&token);
        let _range = self.range_lock_service.lock(
            self.clock().now(),
            key,
            LockMode::Write,
            Interval::point(value.clone()),
        );
        let inserted = {
            let _shared = self.transport_lock.read();
            self.store
                .remove(key, value, record, true, true, LockPolicy::Coordinate)?
        };
        match inserted {
            Some(write) => {
                self.announce(&write);
                self.maybe_transport()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replaces all values of a field with `value`, with no existence check.
    pub fn set(&self, key: &str, value: Value, record: RecordId) -> Result<(), StoreError> {
        let token = Token::field(key, record);
        let _guard = self.lock_service.write_lock(&token);
        let holder = self.clock().now();

        // The field lock keeps the value set stable while the range locks
        // for every touched point are collected in sorted order.
        let mut points: Vec<Value> = {
            let _shared = self.transport_lock.read();
            self.store
                .select(key, record, LockPolicy::Coordinate)?
                .into_iter()
                .collect()
        };
        points.push(value.clone());
        points.sort();
        let _ranges: Vec<_> = points
            .into_iter()
            .map(|point| {
                self.range_lock_service
                    .lock(holder, key, LockMode::Write, Interval::point(point))
            })
            .collect();

        let writes = {
            let _exclusive = self.transport_lock.write();
            self.store.set(key, value, record, true, LockPolicy::Coordinate)?
        };
        for write in &writes {
            self.announce(write);
        }
        self.maybe_transport()
    }

    pub fn select(&self, key: &str, record: RecordId) -> Result<HashSet<Value>, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::field(key, record));
        let _shared = self.transport_lock.read();
        self.store.select(key, record, LockPolicy::Coordinate)
    }

    pub fn select_at(
        &self,
        key: &str,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashSet<Value>, StoreError> {
        let _shared = self.transport_lock.read();
        self.store.select_at(key, record, timestamp)
    }

    pub fn browse_record(
        &self,
        record: RecordId,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::record(record));
        let _shared = self.transport_lock.read();
        self.store.browse_record(record, LockPolicy::Coordinate)
    }

    pub fn browse_record_at(
        &self,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        let _shared = self.transport_lock.read();
        self.store.browse_record_at(record, timestamp)
    }

    pub fn browse_key(&self, key: &str) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::key(key));
        let _shared = self.transport_lock.read();
        self.store.browse_key(key, LockPolicy::Coordinate)
    }

    pub fn browse_key_at(
        &self,
        key: &str,
        timestamp: u64,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        let _shared = self.transport_lock.read();
        self.store.browse_key_at(key, timestamp)
    }

    pub fn verify(&self, key: &str, value: &Value, record: RecordId) -> Result<bool, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::field(key, record));
        let _shared = self.transport_lock.read();
        self.store.verify(key, value, record, LockPolicy::Coordinate)
    }

    pub fn verify_at(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        timestamp: u64,
    ) -> Result<bool, StoreError> {
        let _shared = self.transport_lock.read();
        self.store.verify_at(key, value, record, timestamp)
    }

    pub fn explore(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        let _range = self.range_lock_service.lock(
            self.clock().now(),
            key,
            LockMode::Read,
            operator.interval(values),
        );
        let _shared = self.transport_lock.read();
        self.store.explore(key, operator, values, LockPolicy::Coordinate)
    }

    pub fn explore_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        timestamp: u64,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        let _shared = self.transport_lock.read();
        self.store.explore_at(key, operator, values, timestamp)
    }

    pub fn search(&self, key: &str, query: &str) -> Result<HashSet<RecordId>, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::key(key));
        let _shared = self.transport_lock.read();
        self.store.search(key, query, LockPolicy::Coordinate)
    }

    pub fn audit_record(&self, record: RecordId) -> Result<BTreeMap<u64, String>, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::record(record));
        let _shared = self.transport_lock.read();
        self.store.audit_record(record)
    }

    pub fn audit_field(
        &self,
        key: &str,
        record: RecordId,
    ) -> Result<BTreeMap<u64, String>, StoreError> {
        let _guard = self.lock_service.read_lock(&Token::field(key, record));
        let _shared = self.transport_lock.read();
        self.store.audit_field(key, record)
    }

    /// Max version for `scope` across the buffer and the database.
    pub fn version(&self, scope: &Token) -> u64 {
        self.store.version(scope)
    }
}

impl Destination for Engine {
    fn accept(&self, write: Write) -> Result<(), StoreError> {
        assert!(write.is_storable(), "compare probes cannot be accepted");
        {
            let _shared = self.transport_lock.read();
            self.store.buffer().insert(write.clone(), true);
        }
        self.announce(&write);
        self.maybe_transport()
    }

    fn accept_all(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        {
            let _exclusive = self.transport_lock.write();
            for write in &writes {
                assert!(write.is_storable(), "compare probes cannot be accepted");
                self.store.buffer().insert(write.clone(), true);
            }
        }
        for write in &writes {
            self.announce(write);
        }
        self.maybe_transport()
    }

    fn select(
        &self,
        key: &str,
        record: RecordId,
        policy: LockPolicy,
    ) -> Result<HashSet<Value>, StoreError> {
        match policy {
            LockPolicy::Coordinate => Engine::select(self, key, record),
            LockPolicy::Bypass => {
                let _shared = self.transport_lock.read();
                self.store.select(key, record, policy)
            }
        }
    }

    fn select_at(
        &self,
        key: &str,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashSet<Value>, StoreError> {
        Engine::select_at(self, key, record, timestamp)
    }

    fn browse_record(
        &self,
        record: RecordId,
        policy: LockPolicy,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        match policy {
            LockPolicy::Coordinate => Engine::browse_record(self, record),
            LockPolicy::Bypass => {
                let _shared = self.transport_lock.read();
                self.store.browse_record(record, policy)
            }
        }
    }

    fn browse_record_at(
        &self,
        record: RecordId,
        timestamp: u64,
    ) -> Result<HashMap<String, HashSet<Value>>, StoreError> {
        Engine::browse_record_at(self, record, timestamp)
    }

    fn browse_key(
        &self,
        key: &str,
        policy: LockPolicy,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        match policy {
            LockPolicy::Coordinate => Engine::browse_key(self, key),
            LockPolicy::Bypass => {
                let _shared = self.transport_lock.read();
                self.store.browse_key(key, policy)
            }
        }
    }

    fn browse_key_at(
        &self,
        key: &str,
        timestamp: u64,
    ) -> Result<HashMap<Value, HashSet<RecordId>>, StoreError> {
        Engine::browse_key_at(self, key, timestamp)
    }

    fn verify(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        policy: LockPolicy,
    ) -> Result<bool, StoreError> {
        match policy {
            LockPolicy::Coordinate => Engine::verify(self, key, value, record),
            LockPolicy::Bypass => {
                let _shared = self.transport_lock.read();
                self.store.verify(key, value, record, policy)
            }
        }
    }

    fn verify_at(
        &self,
        key: &str,
        value: &Value,
        record: RecordId,
        timestamp: u64,
    ) -> Result<bool, StoreError> {
        Engine::verify_at(self, key, value, record, timestamp)
    }

    fn explore(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        policy: LockPolicy,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        match policy {
            LockPolicy::Coordinate => Engine::explore(self, key, operator, values),
            LockPolicy::Bypass => {
                let _shared = self.transport_lock.read();
                self.store.explore(key, operator, values, policy)
            }
        }
    }

    fn explore_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        timestamp: u64,
    ) -> Result<BTreeMap<RecordId, HashSet<Value>>, StoreError> {
        Engine::explore_at(self, key, operator, values, timestamp)
    }

    fn search(
        &self,
        key: &str,
        query: &str,
        policy: LockPolicy,
    ) -> Result<HashSet<RecordId>, StoreError> {
        match policy {
            LockPolicy::Coordinate => Engine::search(self, key, query),
            LockPolicy::Bypass => {
                let _shared = self.transport_lock.read();
                self.store.search(key, query, policy)
            }
        }
    }

    fn audit_record(&self, record: RecordId) -> Result<BTreeMap<u64, String>, StoreError> {
        Engine::audit_record(self, record)
    }

    fn audit_field(
        &self,
        key: &str,
        record: RecordId,
    ) -> Result<BTreeMap<u64, String>, StoreError> {
        Engine::audit_field(self, key, record)
    }

    fn version(&self, scope: &Token) -> u64 {
        Engine::version(self, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (Engine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::start(EngineConfig::new(dir.path().join("txn"))).unwrap();
        (engine, dir)
    }

    #[test]
    fn test_add_select_remove() {
        let (engine, _dir) = engine();
        assert!(engine.add("name", Value::from("alice"), 1).unwrap());
        assert_eq!(
            engine.select("name", 1).unwrap(),
            HashSet::from([Value::from("alice")])
        );
        assert!(engine.remove("name", Value::from("alice"), 1).unwrap());
        assert!(engine.select("name", 1).unwrap().is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let (engine, _dir) = engine();
        assert!(engine.add("name", Value::from("alice"), 1).unwrap());
        assert!(!engine.add("name", Value::from("alice"), 1).unwrap());
        assert_eq!(engine.select("name", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let (engine, _dir) = engine();
        assert!(!engine.remove("name", Value::from("alice"), 1).unwrap());
    }

    #[test]
    fn test_set_replaces_values() {
        let (engine, _dir) = engine();
        engine.add("name", Value::from("alice"), 1).unwrap();
        engine.add("name", Value::from("bob"), 1).unwrap();
        engine.set("name", Value::from("carol"), 1).unwrap();
        assert_eq!(
            engine.select("name", 1).unwrap(),
            HashSet::from([Value::from("carol")])
        );
    }

    #[test]
    fn test_reads_merge_across_transport() {
        let (engine, _dir) = engine();
        engine.add("name", Value::from("alice"), 1).unwrap();
        engine.transport().unwrap();
        // The buffered remove must cancel the now-permanent add.
        engine.remove("name", Value::from("alice"), 1).unwrap();
        assert!(engine.select("name", 1).unwrap().is_empty());
        assert!(!engine.verify("name", &Value::from("alice"), 1).unwrap());
    }

    #[test]
    fn test_historical_reads() {
        let (engine, _dir) = engine();
        engine.add("name", Value::from("alice"), 1).unwrap();
        let after_add = engine.clock().now();
        engine.remove("name", Value::from("alice"), 1).unwrap();

        assert_eq!(
            engine.select_at("name", 1, after_add).unwrap(),
            HashSet::from([Value::from("alice")])
        );
        assert!(engine.verify_at("name", &Value::from("alice"), 1, after_add).unwrap());
        assert!(engine
            .select_at("name", 1, engine.clock().now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_explore_merges_tiers() {
        let (engine, _dir) = engine();
        engine.add("age", Value::Integer(5), 1).unwrap();
        engine.add("age", Value::Integer(10), 2).unwrap();
        engine.transport().unwrap();
        engine.remove("age", Value::Integer(5), 1).unwrap();
        engine.add("age", Value::Integer(4), 3).unwrap();

        let result = engine
            .explore("age", Operator::GreaterThan, &[Value::Integer(3)])
            .unwrap();
        assert_eq!(
            result,
            BTreeMap::from([
                (2, HashSet::from([Value::Integer(10)])),
                (3, HashSet::from([Value::Integer(4)])),
            ])
        );
    }

    #[test]
    fn test_threshold_transport() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::start(
            EngineConfig::new(dir.path().join("txn")).with_transport_threshold(2),
        )
        .unwrap();
        engine.add("k", Value::Long(1), 1).unwrap();
        assert_eq!(engine.store.buffer().len(), 1);
        engine.add("k", Value::Long(2), 1).unwrap();
        // Crossing the threshold drained the buffer into the database.
        assert_eq!(engine.store.buffer().len(), 0);
        assert_eq!(
            engine.select("k", 1).unwrap(),
            HashSet::from([Value::Long(1), Value::Long(2)])
        );
    }

    #[test]
    fn test_version_monotonicity() {
        let (engine, _dir) = engine();
        let scope = Token::field("name", 1);
        assert_eq!(engine.version(&scope), 0);
        engine.add("name", Value::from("alice"), 1).unwrap();
        let v1 = engine.version(&scope);
        assert!(v1 > 0);
        engine.transport().unwrap();
        assert_eq!(engine.version(&scope), v1);
        engine.remove("name", Value::from("alice"), 1).unwrap();
        assert!(engine.version(&scope) > v1);
    }

    #[test]
    fn test_audit_merges_buffer_and_database() {
        let (engine, _dir) = engine();
        engine.add("name", Value::from("alice"), 1).unwrap();
        engine.transport().unwrap();
        engine.add("name", Value::from("bob"), 1).unwrap();

        let audit = engine.audit_record(1).unwrap();
        assert_eq!(audit.len(), 2);
        let lines: Vec<&String> = audit.values().collect();
        assert_eq!(lines[0], "ADD 'name' AS 'alice' TO 1");
        assert_eq!(lines[1], "ADD 'name' AS 'bob' TO 1");
    }

    #[test]
    fn test_search() {
        let (engine, _dir) = engine();
        engine.add("bio", Value::from("Rust engineer"), 1).unwrap();
        engine.add("bio", Value::from("gardener"), 2).unwrap();
        engine.transport().unwrap();
        engine.remove("bio", Value::from("Rust engineer"), 1).unwrap();

        assert_eq!(engine.search("bio", "rust").unwrap(), HashSet::new());
        assert_eq!(engine.search("bio", "garden").unwrap(), HashSet::from([2]));
    }

    #[test]
    fn test_announce_reaches_listener() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Flag {
            id: u64,
            hit: AtomicBool,
        }
        impl VersionChangeListener for Flag {
            fn id(&self) -> u64 {
                self.id
            }
            fn on_version_change(&self, _token: &Token) {
                self.hit.store(true, Ordering::Release);
            }
        }

        let (engine, _dir) = engine();
        let flag = Arc::new(Flag { id: 1, hit: AtomicBool::new(false) });
        let listener: Arc<dyn VersionChangeListener> = flag.clone();
        engine.watch(Token::field("name", 1), &listener);

        engine.add("name", Value::from("alice"), 2).unwrap();
        assert!(!flag.hit.load(Ordering::Acquire));
        engine.add("name", Value::from("alice"), 1).unwrap();
        assert!(flag.hit.load(Ordering::Acquire));
    }

    #[test]
    fn test_release_listener_stops_notifications() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counter {
            id: u64,
            hits: AtomicUsize,
        }
        impl VersionChangeListener for Counter {
            fn id(&self) -> u64 {
                self.id
            }
            fn on_version_change(&self, _token: &Token) {
                self.hits.fetch_add(1, Ordering::AcqRel);
            }
        }

        let (engine, _dir) = engine();
        let counter = Arc::new(Counter { id: 7, hits: AtomicUsize::new(0) });
        let listener: Arc<dyn VersionChangeListener> = counter.clone();
        engine.watch(Token::record(1), &listener);
        engine.watch_range("age", Interval::full(), &listener);

        engine.add("age", Value::Integer(1), 1).unwrap();
        assert_eq!(counter.hits.load(Ordering::Acquire), 2); // record + range

        engine.release_listener(7);
        engine.add("age", Value::Integer(2), 1).unwrap();
        assert_eq!(counter.hits.load(Ordering::Acquire), 2);
    }
}
