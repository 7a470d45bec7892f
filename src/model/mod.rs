// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Core data model: typed values, write intents, and concurrency scopes.
//!
//! A field is the mapping `(key, record) -> set of values`, realized as an
//! ordered sequence of add/remove toggles. Every mutation is captured as an
//! immutable [`Write`] stamped with a version from the engine clock, and every
//! concurrency decision is named by a [`Token`] scope.

pub(crate) mod codec;
mod error;
mod operator;
mod token;
mod value;
mod write;

pub use error::DecodeError;
pub use operator::Operator;
pub use token::{Bound, Interval, RangeToken, Token};
pub use value::Value;
pub use write::{Action, Write};

/// Identifier of a record (a row/document in the logical data model).
pub type RecordId = i64;
