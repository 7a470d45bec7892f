// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The engine's main write log.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use crate::model::{Operator, RecordId, Token, Value, Write};
use crate::storage::{Destination, StoreError};

use super::Limbo;

#[derive(Debug, Default)]
struct LogState {
    pending: VecDeque<Write>,
    versions: HashMap<Token, u64>,
}

impl LogState {
    fn observe(&mut self, write: &Write) {
        let version = write.version();
        for scope in [
            Token::record(write.record()),
            Token::key(write.key()),
            Token::field(write.key(), write.record()),
        ] {
            let entry = self.versions.entry(scope).or_insert(0);
            *entry = (*entry).max(version);
        }
    }
}

/// The general ordered write log used as the engine's buffer.
///
/// Unlike the queue buffers, the log remembers the max version it has
/// observed per scope even after the writes themselves are transported, so
/// `version` stays constant-time regardless of how reads and transports
/// interleave.
#[derive(Debug, Default)]
pub struct WriteLog {
    state: Mutex<LogState>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Limbo for WriteLog {
    fn insert(&self, write: Write, _sync: bool) -> bool {
        debug_assert!(write.is_storable());
        let mut state = self.state.lock();
        state.observe(&write);
        state.pending.push_back(write);
        true
    }

    fn writes(&self) -> Vec<Write> {
        self.state.lock().pending.iter().cloned().collect()
    }

    fn browse_key(
        &self,
        key: &str,
        timestamp: u64,
        context: &mut HashMap<Value, HashSet<RecordId>>,
    ) {
        super::fold_browse_key(&self.writes(), key, timestamp, context);
    }

    fn browse_record(
        &self,
        record: RecordId,
        timestamp: u64,
        context: &mut HashMap<String, HashSet<Value>>,
    ) {
        super::fold_browse_record(&self.writes(), record, timestamp, context);
    }

    fn select(&self, key: &str, record: RecordId, timestamp: u64, context: &mut HashSet<Value>) {
        super::fold_select(&self.writes(), key, record, timestamp, context);
    }

    fn verify(&self, probe: &Write, timestamp: u64, baseline: bool) -> bool {
        super::fold_verify(&self.writes(), probe, timestamp, baseline)
    }

    fn explore(
        &self,
        context: &mut BTreeMap<RecordId, HashSet<Value>>,
        timestamp: u64,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) {
        super::fold_explore(&self.writes(), context, timestamp, key, operator, values);
    }

    fn search(&self, key: &str, query: &str, context: &mut HashSet<RecordId>) {
        super::fold_search(&self.writes(), key, query, context);
    }

    fn audit_record(&self, record: RecordId) -> BTreeMap<u64, String> {
        super::fold_audit_record(&self.writes(), record)
    }

    fn audit_field(&self, key: &str, record: RecordId) -> BTreeMap<u64, String> {
        super::fold_audit_field(&self.writes(), key, record)
    }

    fn drain(&self) -> Vec<Write> {
        let mut state = self.state.lock();
        state.pending.drain(..).collect()
    }

    fn transport(&self, destination: &dyn Destination) -> Result<(), StoreError> {
        loop {
            // Pop one at a time so a write is never delivered twice even if
            // the destination fails midway.
            let write = match self.state.lock().pending.pop_front() {
                Some(write) => write,
                None => return Ok(()),
            };
            destination.accept(write)?;
        }
    }

    fn version(&self, scope: &Token) -> u64 {
        self.state.lock().versions.get(scope).copied().unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.state.lock().pending.len()
    }
}
