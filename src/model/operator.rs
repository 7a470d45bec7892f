// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Query operators for explore-style predicates.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use super::{Bound, DecodeError, Interval, Value};

/// The comparison applied between a stored value and the operand values of an
/// explore query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Between,
    LinksTo,
    Regex,
    NotRegex,
}

impl Operator {
    pub fn code(self) -> u8 {
        match self {
            Operator::Equals => 1,
            Operator::NotEquals => 2,
            Operator::GreaterThan => 3,
            Operator::GreaterThanOrEquals => 4,
            Operator::LessThan => 5,
            Operator::LessThanOrEquals => 6,
            Operator::Between => 7,
            Operator::LinksTo => 8,
            Operator::Regex => 9,
            Operator::NotRegex => 10,
        }
    }

    pub fn from_code(code: u8) -> Result<Operator, DecodeError> {
        match code {
            1 => Ok(Operator::Equals),
            2 => Ok(Operator::NotEquals),
            3 => Ok(Operator::GreaterThan),
            4 => Ok(Operator::GreaterThanOrEquals),
            5 => Ok(Operator::LessThan),
            6 => Ok(Operator::LessThanOrEquals),
            7 => Ok(Operator::Between),
            8 => Ok(Operator::LinksTo),
            9 => Ok(Operator::Regex),
            10 => Ok(Operator::NotRegex),
            other => Err(DecodeError::InvalidOperator(other)),
        }
    }

    /// Evaluates the predicate `stored <operator> operands`.
    ///
    /// Ordering comparisons use [`Value::weak_cmp`]; a stored value that is
    /// incomparable with the operands does not match. Regex operators apply
    /// to textual values only; a pattern that fails to compile matches
    /// nothing.
    pub fn matches(self, stored: &Value, operands: &[Value]) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Operator::Equals => operands.first().is_some_and(|v| stored.weak_eq(v)),
            Operator::NotEquals => operands.first().is_some_and(|v| !stored.weak_eq(v)),
            Operator::GreaterThan => operands
                .first()
                .is_some_and(|v| stored.weak_cmp(v) == Some(Greater)),
            Operator::GreaterThanOrEquals => operands
                .first()
                .is_some_and(|v| matches!(stored.weak_cmp(v), Some(Greater | Equal))),
            Operator::LessThan => operands
                .first()
                .is_some_and(|v| stored.weak_cmp(v) == Some(Less)),
            Operator::LessThanOrEquals => operands
                .first()
                .is_some_and(|v| matches!(stored.weak_cmp(v), Some(Less | Equal))),
            Operator::Between => match operands {
                [low, high, ..] => {
                    matches!(stored.weak_cmp(low), Some(Greater | Equal))
                        && stored.weak_cmp(high) == Some(Less)
                }
                _ => false,
            },
            Operator::LinksTo => match (stored, operands.first()) {
                (Value::Link(record), Some(Value::Link(target))) => record == target,
                (Value::Link(record), Some(Value::Long(target))) => record == target,
                (Value::Link(record), Some(Value::Integer(target))) => {
                    *record == i64::from(*target)
                }
                _ => false,
            },
            Operator::Regex | Operator::NotRegex => {
                let Some(text) = stored.as_text() else {
                    return false;
                };
                let Some(pattern) = operands.first().and_then(Value::as_text) else {
                    return false;
                };
                match Regex::new(pattern) {
                    Ok(regex) => regex.is_match(text) == (self == Operator::Regex),
                    Err(_) => false,
                }
            }
        }
    }

    /// The interval of values this predicate can observe, used for range lock
    /// conflict detection. Predicates without a bounded shape guard the whole
    /// key.
    pub fn interval(self, operands: &[Value]) -> Interval {
        let first = operands.first().cloned();
        match (self, first) {
            (Operator::Equals, Some(v)) => Interval::point(v),
            (Operator::GreaterThan, Some(v)) => {
                Interval::new(Bound::Excluded(v), Bound::Unbounded)
            }
            (Operator::GreaterThanOrEquals, Some(v)) => {
                Interval::new(Bound::Included(v), Bound::Unbounded)
            }
            (Operator::LessThan, Some(v)) => Interval::new(Bound::Unbounded, Bound::Excluded(v)),
            (Operator::LessThanOrEquals, Some(v)) => {
                Interval::new(Bound::Unbounded, Bound::Included(v))
            }
            (Operator::Between, Some(low)) => match operands.get(1).cloned() {
                Some(high) => Interval::new(Bound::Included(low), Bound::Excluded(high)),
                None => Interval::full(),
            },
            (Operator::LinksTo, Some(v)) => {
                let record = match v {
                    Value::Link(record) | Value::Long(record) => record,
                    Value::Integer(record) => i64::from(record),
                    _ => return Interval::full(),
                };
                Interval::point(Value::Link(record))
            }
            // Negations and regular expressions can observe any value.
            _ => Interval::full(),
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(symbol: &str) -> Result<Operator, String> {
        match symbol {
            "=" | "eq" => Ok(Operator::Equals),
            "!=" | "ne" => Ok(Operator::NotEquals),
            ">" | "gt" => Ok(Operator::GreaterThan),
            ">=" | "gte" => Ok(Operator::GreaterThanOrEquals),
            "<" | "lt" => Ok(Operator::LessThan),
            "<=" | "lte" => Ok(Operator::LessThanOrEquals),
            "><" | "bw" => Ok(Operator::Between),
            "->" | "lnk2" => Ok(Operator::LinksTo),
            "regex" => Ok(Operator::Regex),
            "nregex" => Ok(Operator::NotRegex),
            other => Err(format!("unknown operator symbol: {other}")),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEquals => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEquals => "<=",
            Operator::Between => "><",
            Operator::LinksTo => "->",
            Operator::Regex => "regex",
            Operator::NotRegex => "nregex",
        };
        write!(f, "{symbol}")
    }
}
