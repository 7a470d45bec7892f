// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Typed values and their binary encoding.
//!
//! A value is a tagged union over the eight storable types. Equality and
//! hashing are structural over (tag, payload bytes), so `Long(3)` and
//! `Integer(3)` are distinct stored values even though they compare equal
//! numerically. Range queries use [`Value::weak_cmp`], which compares across
//! numeric types by magnitude and across `String`/`Tag` by text.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::{DecodeError, RecordId};

/// A typed value stored in a field.
#[derive(Debug, Clone)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Tag(String),
    Link(RecordId),
}

impl Value {
    /// Returns the tag byte identifying this value's type on the wire.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Long(_) => 3,
            Value::Float(_) => 4,
            Value::Double(_) => 5,
            Value::String(_) => 6,
            Value::Tag(_) => 7,
            Value::Link(_) => 8,
        }
    }

    /// Returns the deterministic payload encoding: big-endian for numeric
    /// types, raw UTF-8 with no terminator for textual types.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Value::Boolean(b) => vec![u8::from(*b)],
            Value::Integer(i) => i.to_be_bytes().to_vec(),
            Value::Long(l) => l.to_be_bytes().to_vec(),
            Value::Float(f) => f.to_be_bytes().to_vec(),
            Value::Double(d) => d.to_be_bytes().to_vec(),
            Value::String(s) | Value::Tag(s) => s.as_bytes().to_vec(),
            Value::Link(r) => r.to_be_bytes().to_vec(),
        }
    }

    /// Decodes a value from its tag byte and payload bytes.
    pub fn decode(tag: u8, payload: &[u8]) -> Result<Value, DecodeError> {
        fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N], DecodeError> {
            payload
                .try_into()
                .map_err(|_| DecodeError::LengthMismatch { expected: N, actual: payload.len() })
        }
        match tag {
            1 => match fixed::<1>(payload)?[0] {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                b => Err(DecodeError::InvalidBoolean(b)),
            },
            2 => Ok(Value::Integer(i32::from_be_bytes(fixed(payload)?))),
            3 => Ok(Value::Long(i64::from_be_bytes(fixed(payload)?))),
            4 => Ok(Value::Float(f32::from_be_bytes(fixed(payload)?))),
            5 => Ok(Value::Double(f64::from_be_bytes(fixed(payload)?))),
            6 => Ok(Value::String(String::from_utf8(payload.to_vec())?)),
            7 => Ok(Value::Tag(String::from_utf8(payload.to_vec())?)),
            8 => Ok(Value::Link(i64::from_be_bytes(fixed(payload)?))),
            other => Err(DecodeError::InvalidValueTag(other)),
        }
    }

    /// Returns the text of a `String` or `Tag` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Tag(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric magnitude of a numeric value.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Rank of the comparison class this value belongs to.
    fn class_rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) => 1,
            Value::String(_) | Value::Tag(_) => 2,
            Value::Link(_) => 3,
        }
    }

    /// Compares two values for query evaluation.
    ///
    /// Numeric values compare by magnitude regardless of their concrete type,
    /// so `Integer(3)` equals `Long(3)`. `String` and `Tag` compare by text.
    /// Values from different comparison classes are incomparable and yield
    /// `None`; operator evaluation treats that as "does not match".
    pub fn weak_cmp(&self, other: &Value) -> Option<Ordering> {
        if self.class_rank() != other.class_rank() {
            return None;
        }
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Link(a), Value::Link(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Some(a.total_cmp(&b)),
                // Both textual at this point.
                _ => Some(self.as_text()?.cmp(other.as_text()?)),
            },
        }
    }

    /// Returns true if the values are equal under [`Value::weak_cmp`].
    pub fn weak_eq(&self, other: &Value) -> bool {
        self.weak_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.tag() == other.tag() && self.payload() == other.payload()
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.tag());
        state.write(&self.payload());
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Total order: comparison class, then [`Value::weak_cmp`], then tag and
    /// payload bytes so that distinct stored values never compare equal.
    fn cmp(&self, other: &Self) -> Ordering {
        self.class_rank()
            .cmp(&other.class_rank())
            .then_with(|| self.weak_cmp(other).unwrap_or(Ordering::Equal))
            .then_with(|| self.tag().cmp(&other.tag()))
            .then_with(|| self.payload().cmp(&other.payload()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) | Value::Tag(s) => write!(f, "{s}"),
            Value::Link(r) => write!(f, "@{r}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}


#[cfg(test)]
pub(crate) mod proptests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Boolean),
            any::<i32>().prop_map(Value::Integer),
            any::<i64>().prop_map(Value::Long),
            any::<f32>().prop_map(Value::Float),
            any::<f64>().prop_map(Value::Double),
            ".{0,24}".prop_map(Value::String),
            "[a-z]{0,12}".prop_map(Value::Tag),
            any::<i64>().prop_map(Value::Link),
        ]
    }

    proptest! {
        #[test]
        fn value_roundtrip(v in arb_value()) {
            let decoded = Value::decode(v.tag(), &v.payload()).unwrap();
            prop_assert_eq!(v, decoded);
        }

        #[test]
        fn weak_cmp_is_antisymmetric(a in arb_value(), b in arb_value()) {
            let ab = a.weak_cmp(&b);
            let ba = b.weak_cmp(&a);
            prop_assert_eq!(ab.map(Ordering::reverse), ba);
        }

        #[test]
        fn total_order_consistent_with_eq(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        }
    }
}
