// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Concurrency scopes: tokens, value intervals, and range tokens.
//!
//! A [`Token`] names the unit a lock or a version-change subscription applies
//! to. Range predicates are named by a [`RangeToken`] and conflict by interval
//! overlap rather than by identity.

use std::cmp::Ordering;
use std::fmt;

use super::codec::{put_framed, ByteReader};
use super::{DecodeError, Operator, RecordId, Value};

/// A named concurrency scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    /// All fields of one record.
    Record(RecordId),
    /// One key across all records.
    Key(String),
    /// One field: a key within one record.
    Field(String, RecordId),
    /// A written point on a key; the announcement form matched against range
    /// subscriptions. Never used as a lock scope.
    Range { key: String, value: Value },
}

impl Token {
    pub fn record(record: RecordId) -> Token {
        Token::Record(record)
    }

    pub fn key(key: impl Into<String>) -> Token {
        Token::Key(key.into())
    }

    pub fn field(key: impl Into<String>, record: RecordId) -> Token {
        Token::Field(key.into(), record)
    }

    /// Encodes the token as `[u8 kind][payload]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Token::Record(record) => {
                out.push(1);
                out.extend_from_slice(&record.to_be_bytes());
            }
            Token::Key(key) => {
                out.push(2);
                put_framed(&mut out, key.as_bytes());
            }
            Token::Field(key, record) => {
                out.push(3);
                put_framed(&mut out, key.as_bytes());
                out.extend_from_slice(&record.to_be_bytes());
            }
            Token::Range { key, value } => {
                out.push(4);
                put_framed(&mut out, key.as_bytes());
                out.push(value.tag());
                put_framed(&mut out, &value.payload());
            }
        }
        out
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<Token, DecodeError> {
        let kind = reader.u8()?;
        Token::read_body(kind, reader)
    }

    /// Decodes the token payload that follows an already-consumed kind byte.
    pub(crate) fn read_body(kind: u8, reader: &mut ByteReader<'_>) -> Result<Token, DecodeError> {
        match kind {
            1 => Ok(Token::Record(reader.i64()?)),
            2 => Ok(Token::Key(reader.string()?)),
            3 => Ok(Token::Field(reader.string()?, reader.i64()?)),
            4 => {
                let key = reader.string()?;
                let tag = reader.u8()?;
                let len = reader.u32()? as usize;
                let value = Value::decode(tag, reader.bytes(len)?)?;
                Ok(Token::Range { key, value })
            }
            other => Err(DecodeError::InvalidTokenKind(other)),
        }
    }

    /// Decodes a token produced by [`Token::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Token, DecodeError> {
        Token::read_from(&mut ByteReader::new(bytes))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Record(record) => write!(f, "{record}"),
            Token::Key(key) => write!(f, "{key}"),
            Token::Field(key, record) => write!(f, "{key}|{record}"),
            Token::Range { key, value } => write!(f, "{key}|={value}"),
        }
    }
}

/// One end of an [`Interval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    Included(Value),
    Excluded(Value),
}

/// An interval over values under [`Value::weak_cmp`] ordering.
///
/// Values from a comparison class that cannot be ordered against a bound fall
/// outside the interval, except that an unbounded end admits everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    low: Bound,
    high: Bound,
}

impl Interval {
    pub fn new(low: Bound, high: Bound) -> Interval {
        Interval { low, high }
    }

    /// The interval containing every value.
    pub fn full() -> Interval {
        Interval { low: Bound::Unbounded, high: Bound::Unbounded }
    }

    /// The degenerate interval containing exactly `value` and values weakly
    /// equal to it.
    pub fn point(value: Value) -> Interval {
        Interval { low: Bound::Included(value.clone()), high: Bound::Included(value) }
    }

    /// Returns true if `value` lies within the interval.
    pub fn contains(&self, value: &Value) -> bool {
        let above_low = match &self.low {
            Bound::Unbounded => true,
            Bound::Included(b) => {
                matches!(value.weak_cmp(b), Some(Ordering::Greater | Ordering::Equal))
            }
            Bound::Excluded(b) => matches!(value.weak_cmp(b), Some(Ordering::Greater)),
        };
        let below_high = match &self.high {
            Bound::Unbounded => true,
            Bound::Included(b) => {
                matches!(value.weak_cmp(b), Some(Ordering::Less | Ordering::Equal))
            }
            Bound::Excluded(b) => matches!(value.weak_cmp(b), Some(Ordering::Less)),
        };
        above_low && below_high
    }

    /// Returns true if the intervals share at least one value.
    pub fn overlaps(&self, other: &Interval) -> bool {
        fn reaches(low: &Bound, high: &Bound) -> bool {
            let (low_value, low_open) = match low {
                Bound::Unbounded => return true,
                Bound::Included(v) => (v, false),
                Bound::Excluded(v) => (v, true),
            };
            let (high_value, high_open) = match high {
                Bound::Unbounded => return true,
                Bound::Included(v) => (v, false),
                Bound::Excluded(v) => (v, true),
            };
            match low_value.weak_cmp(high_value) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => !low_open && !high_open,
                Some(Ordering::Greater) | None => false,
            }
        }
        reaches(&self.low, &other.high) && reaches(&other.low, &self.high)
    }
}

/// Names the scope of a range predicate: a key, an operator, and its
/// operand values. Conflicts are decided by the derived [`Interval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeToken {
    key: String,
    operator: Operator,
    values: Vec<Value>,
}

impl RangeToken {
    pub fn new(key: impl Into<String>, operator: Operator, values: Vec<Value>) -> RangeToken {
        RangeToken { key: key.into(), operator, values }
    }

    /// The range token guarding one written point on `key`.
    pub fn point(key: impl Into<String>, value: Value) -> RangeToken {
        RangeToken { key: key.into(), operator: Operator::Equals, values: vec![value] }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The interval of values this token guards.
    pub fn interval(&self) -> Interval {
        self.operator.interval(&self.values)
    }

    /// Encodes the token as
    /// `[u32 key-len][key][u8 operator][u8 count][per value: u8 tag][u32 len][bytes]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_framed(&mut out, self.key.as_bytes());
        out.push(self.operator.code());
        out.push(self.values.len() as u8);
        for value in &self.values {
            out.push(value.tag());
            put_framed(&mut out, &value.payload());
        }
        out
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<RangeToken, DecodeError> {
        let key = reader.string()?;
        let operator = Operator::from_code(reader.u8()?)?;
        let count = reader.u8()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = reader.u8()?;
            let len = reader.u32()? as usize;
            values.push(Value::decode(tag, reader.bytes(len)?)?);
        }
        Ok(RangeToken { key, operator, values })
    }

    /// Decodes a token produced by [`RangeToken::encode`].
    pub fn decode(bytes: &[u8]) -> Result<RangeToken, DecodeError> {
        RangeToken::read_from(&mut ByteReader::new(bytes))
    }
}

impl fmt::Display for RangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.operator)?;
        for value in &self.values {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}
