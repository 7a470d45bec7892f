// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key must not be empty")]
    InvalidKey,

    #[error("store is closed to new operations")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
