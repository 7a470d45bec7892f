// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock coordination services.
//!
//! Two services cooperate to serialize commits:
//!
//! - [`LockService`] hands out shared/exclusive locks named by [`Token`]
//!   scopes. Guards are owned, so a committing operation can collect them in
//!   acquisition order and release them all at scope exit.
//! - [`RangeLockService`] guards intervals of values on a key. Two
//!   overlapping range reads never conflict; a range write conflicts with any
//!   overlapping hold by a different holder.
//!
//! Both services have a `no_op` variant whose acquisitions succeed
//! immediately. It is handed to atomic operations nested inside a
//! transaction, because the transaction is the single serializing authority
//! for its children.
//!
//! [`Token`]: crate::model::Token

mod range;
mod service;

pub use range::{RangeGuard, RangeLockService};
pub use service::{LockMode, LockService, TokenGuard};
