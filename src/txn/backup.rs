// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction backup serialization.
//!
//! A backup captures everything needed to finish a commit after a crash: the
//! lock descriptions and the buffered writes, in order. Layout:
//!
//! ```text
//! [u32 lock-section length]
//! [lock section  = framed collection of LockDescription]
//! [write section = framed collection of Write]
//! ```
//!
//! where a framed collection is `[u32 count]` followed by `[u32 size][bytes]`
//! per item, and a lock description is `[u8 mode][u8 kind][token bytes]`.
//! The file is written exactly once, forced to disk, and deleted after the
//! commit completes.

use std::fs::File;
use std::io::Write as IoWrite;
use std::path::Path;

use crate::model::codec::{put_framed, ByteReader};
use crate::model::{DecodeError, RangeToken, Token, Write};

use super::LockIntent;

const RANGE_KIND: u8 = 4;

fn encode_intent(intent: &LockIntent) -> Vec<u8> {
    let mut out = Vec::new();
    match intent {
        LockIntent::Token(token, mode) => {
            out.push(mode.code());
            out.extend_from_slice(&token.encode());
        }
        LockIntent::Range(token, mode) => {
            out.push(mode.code());
            out.push(RANGE_KIND);
            out.extend_from_slice(&token.encode());
        }
    }
    out
}

fn decode_intent(bytes: &[u8]) -> Result<LockIntent, DecodeError> {
    use crate::lock::LockMode;

    let mut reader = ByteReader::new(bytes);
    let mode = match reader.u8()? {
        1 => LockMode::Read,
        2 => LockMode::Write,
        other => return Err(DecodeError::InvalidLockMode(other)),
    };
    let kind = reader.u8()?;
    if kind == RANGE_KIND {
        Ok(LockIntent::Range(RangeToken::read_from(&mut reader)?, mode))
    } else {
        Ok(LockIntent::Token(Token::read_body(kind, &mut reader)?, mode))
    }
}

fn put_collection(out: &mut Vec<u8>, items: &[Vec<u8>]) {
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        put_framed(out, item);
    }
}

fn read_collection<'a>(reader: &mut ByteReader<'a>) -> Result<Vec<&'a [u8]>, DecodeError> {
    let count = reader.u32()? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let size = reader.u32()? as usize;
        items.push(reader.bytes(size)?);
    }
    Ok(items)
}

/// Serializes `(locks, writes)` into the backup byte stream.
pub(crate) fn serialize(intents: &[LockIntent], writes: &[Write]) -> Vec<u8> {
    let mut lock_section = Vec::new();
    let encoded: Vec<Vec<u8>> = intents.iter().map(encode_intent).collect();
    put_collection(&mut lock_section, &encoded);

    let mut out = Vec::with_capacity(4 + lock_section.len());
    out.extend_from_slice(&(lock_section.len() as u32).to_be_bytes());
    out.extend_from_slice(&lock_section);

    let encoded: Vec<Vec<u8>> = writes.iter().map(Write::encode).collect();
    put_collection(&mut out, &encoded);
    out
}

/// Deserializes a backup byte stream back into `(locks, writes)`.
pub(crate) fn deserialize(bytes: &[u8]) -> Result<(Vec<LockIntent>, Vec<Write>), DecodeError> {
    let mut reader = ByteReader::new(bytes);
    let lock_section_len = reader.u32()? as usize;
    let lock_section = reader.bytes(lock_section_len)?;

    let mut lock_reader = ByteReader::new(lock_section);
    let mut intents = Vec::new();
    for item in read_collection(&mut lock_reader)? {
        intents.push(decode_intent(item)?);
    }

    let mut writes = Vec::new();
    for item in read_collection(&mut reader)? {
        writes.push(Write::decode(item)?);
    }
    if !reader.is_empty() {
        return Err(DecodeError::LengthMismatch {
            expected: bytes.len() - reader.remaining(),
            actual: bytes.len(),
        });
    }
    Ok((intents, writes))
}

/// Writes the backup to `path` and forces it to durable storage before
/// returning. Commit correctness depends on the force happening before any
/// write reaches the destination.
pub(crate) fn persist(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
