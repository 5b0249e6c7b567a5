// ==============================================================================
// encoding.rs - Sample ID List Encoding
// ==============================================================================
// Description: LEB128 varint encoding for ascending sample-id lists
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Layout:
//   varint(count) varint(id[0]) varint(id[1] - id[0]) ... varint(id[n-1] - id[n-2])
//
//   Deltas after the first id are strictly positive. Dense cohorts keep most
//   deltas under 128, i.e. one byte per sample.
// ==============================================================================

use crate::models::SampleId;
use thiserror::Error;

/// Maximum bytes a u64 LEB128 varint can occupy
pub const MAX_VARINT_BYTES: usize = 10;

/// Errors raised while decoding a varint-encoded sample list
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VarIntError {
    #[error("Truncated varint after {0} bytes")]
    Truncated(usize),

    #[error("Varint overflow after {0} bytes")]
    Overflow(usize),

    #[error("{0} trailing bytes after sample list")]
    Trailing(usize),

    #[error("Sample ids not strictly ascending at position {0}")]
    NotAscending(usize),

    #[error("Sample id out of range at position {0}")]
    OutOfRange(usize),
}

/// Append one LEB128 varint to `out`
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode one LEB128 varint, returning the value and bytes consumed
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return Err(VarIntError::Overflow(i));
        }
        let bits = u64::from(byte & 0x7f);
        // Tenth byte may only carry the top bit of a u64
        if i == MAX_VARINT_BYTES - 1 && bits > 1 {
            return Err(VarIntError::Overflow(i + 1));
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(VarIntError::Truncated(bytes.len()))
}

/// Encode an ascending, duplicate-free sample list
///
/// Callers pass ids from a `BTreeSet`, which already guarantees ordering.
pub fn encode_sample_ids<I>(ids: I) -> Vec<u8>
where
    I: IntoIterator<Item = SampleId>,
    I::IntoIter: ExactSizeIterator,
{
    let iter = ids.into_iter();
    let mut out = Vec::with_capacity(iter.len() + 1);
    encode_varint(iter.len() as u64, &mut out);
    let mut prev: u64 = 0;
    for id in iter {
        let id = u64::from(id);
        encode_varint(id - prev, &mut out);
        prev = id;
    }
    out
}

/// Decode a sample list written by [`encode_sample_ids`]
pub fn decode_sample_ids(bytes: &[u8]) -> Result<Vec<SampleId>, VarIntError> {
    let (count, mut pos) = decode_varint(bytes)?;
    // Every id takes at least one byte; reject absurd counts before allocating
    if count > (bytes.len() - pos) as u64 {
        return Err(VarIntError::Truncated(bytes.len()));
    }
    let mut ids = Vec::with_capacity(count as usize);
    let mut prev: u64 = 0;
    for i in 0..count as usize {
        let (delta, consumed) = decode_varint(&bytes[pos..]).map_err(|e| match e {
            VarIntError::Truncated(_) => VarIntError::Truncated(bytes.len()),
            other => other,
        })?;
        pos += consumed;
        if i > 0 && delta == 0 {
            return Err(VarIntError::NotAscending(i));
        }
        let value = prev.checked_add(delta).ok_or(VarIntError::OutOfRange(i))?;
        let id = SampleId::try_from(value).map_err(|_| VarIntError::OutOfRange(i))?;
        ids.push(id);
        prev = value;
    }
    if pos != bytes.len() {
        return Err(VarIntError::Trailing(bytes.len() - pos));
    }
    Ok(ids)
}
