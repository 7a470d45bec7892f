// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Decoding error types.

/// Errors that can occur while decoding serialized model types.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("byte stream truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("unknown value tag: {0}")]
    InvalidValueTag(u8),

    #[error("unknown action: {0}")]
    InvalidAction(u8),

    #[error("unknown token kind: {0}")]
    InvalidTokenKind(u8),

    #[error("unknown lock mode: {0}")]
    InvalidLockMode(u8),

    #[error("unknown operator code: {0}")]
    InvalidOperator(u8),

    #[error("invalid boolean payload: {0}")]
    InvalidBoolean(u8),

    #[error("invalid utf-8 in payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("payload length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
