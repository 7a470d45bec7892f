// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transactional error types.

use crate::storage::StoreError;

/// An atomic operation was used after it committed or aborted.
#[derive(Debug, thiserror::Error)]
#[error("atomic operation used after commit or abort")]
pub struct AtomicStateError;

/// A transaction was used after it committed or aborted.
///
/// Distinct from [`AtomicStateError`] so callers can tell transaction-level
/// failures apart from nested-operation conflicts.
#[derive(Debug, thiserror::Error)]
#[error("transaction used after commit or abort")]
pub struct TransactionStateError;

/// Errors that can occur in transactional operations.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error(transparent)]
    AtomicState(#[from] AtomicStateError),

    #[error(transparent)]
    TransactionState(#[from] TransactionStateError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("transaction backup io: {0}")]
    Backup(#[from] std::io::Error),
}

impl From<StoreError> for TxnError {
    fn from(error: StoreError) -> Self {
        match error {
            // A closed destination is a transaction that stopped accepting
            // operations underneath its children.
            StoreError::Closed => TxnError::TransactionState(TransactionStateError),
            other => TxnError::Store(other),
        }
    }
}
