// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Write intents: immutable records of one membership toggle.

use std::fmt;

use super::codec::{put_framed, ByteReader};
use super::{DecodeError, RecordId, Value};

/// The kind of a [`Write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Adds a value to a field.
    Add,
    /// Removes a value from a field.
    Remove,
    /// A read probe used to check membership. Never storable.
    Compare,
}

impl Action {
    pub fn code(self) -> u8 {
        match self {
            Action::Add => 1,
            Action::Remove => 2,
            Action::Compare => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Action, DecodeError> {
        match code {
            1 => Ok(Action::Add),
            2 => Ok(Action::Remove),
            3 => Ok(Action::Compare),
            other => Err(DecodeError::InvalidAction(other)),
        }
    }
}

/// An immutable intent describing a membership toggle of one value in one
/// field at one version.
///
/// Writes are created by write operations, inserted into exactly one buffer,
/// and become permanent when transported. They are never mutated. A `Compare`
/// write is a probe that carries [`Write::NO_VERSION`] and never enters a
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Write {
    action: Action,
    key: String,
    value: Value,
    record: RecordId,
    version: u64,
}

impl Write {
    /// Version carried by non-storable probe writes.
    pub const NO_VERSION: u64 = 0;

    /// Creates an `Add` write at `version`.
    pub fn add(key: impl Into<String>, value: Value, record: RecordId, version: u64) -> Write {
        Write { action: Action::Add, key: key.into(), value, record, version }
    }

    /// Creates a `Remove` write at `version`.
    pub fn remove(key: impl Into<String>, value: Value, record: RecordId, version: u64) -> Write {
        Write { action: Action::Remove, key: key.into(), value, record, version }
    }

    /// Creates a non-storable `Compare` probe.
    pub fn compare(key: impl Into<String>, value: Value, record: RecordId) -> Write {
        Write {
            action: Action::Compare,
            key: key.into(),
            value,
            record,
            version: Self::NO_VERSION,
        }
    }

    #[inline]
    pub fn action(&self) -> Action {
        self.action
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn record(&self) -> RecordId {
        self.record
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns true if this write may be inserted into a buffer.
    #[inline]
    pub fn is_storable(&self) -> bool {
        self.action != Action::Compare
    }

    /// Returns true if the writes touch the same `(key, value, record)`
    /// triple, regardless of action or version.
    pub fn matches(&self, other: &Write) -> bool {
        self.record == other.record && self.key == other.key && self.value == other.value
    }

    /// Renders the revision string used by audit logs, for example
    /// `ADD 'name' AS 'alice' TO 1`.
    pub fn describe(&self) -> String {
        match self.action {
            Action::Add => format!("ADD '{}' AS '{}' TO {}", self.key, self.value, self.record),
            Action::Remove => {
                format!("REMOVE '{}' AS '{}' FROM {}", self.key, self.value, self.record)
            }
            Action::Compare => {
                format!("COMPARE '{}' AS '{}' IN {}", self.key, self.value, self.record)
            }
        }
    }

    /// Encodes the write record:
    /// `[u8 action][u64 version][u32 key-len][key][u8 tag][u32 value-len]
    /// [value][i64 record]`, all integers big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.value.payload();
        let mut out = Vec::with_capacity(1 + 8 + 4 + self.key.len() + 1 + 4 + payload.len() + 8);
        out.push(self.action.code());
        out.extend_from_slice(&self.version.to_be_bytes());
        put_framed(&mut out, self.key.as_bytes());
        out.push(self.value.tag());
        put_framed(&mut out, &payload);
        out.extend_from_slice(&self.record.to_be_bytes());
        out
    }

    /// Decodes a write record produced by [`Write::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Write, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let write = Self::read_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(DecodeError::LengthMismatch {
                expected: bytes.len() - reader.remaining(),
                actual: bytes.len(),
            });
        }
        Ok(write)
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<Write, DecodeError> {
        let action = Action::from_code(reader.u8()?)?;
        let version = reader.u64()?;
        let key = reader.string()?;
        let tag = reader.u8()?;
        let len = reader.u32()? as usize;
        let value = Value::decode(tag, reader.bytes(len)?)?;
        let record = reader.i64()?;
        Ok(Write { action, key, value, record, version })
    }
}

impl fmt::Display for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}
