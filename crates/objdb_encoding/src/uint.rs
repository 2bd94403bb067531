//! Order-preserving unsigned integer encoding.
//!
//! Values up to [`SINGLE_BYTE_MAX`] encode as themselves in one byte.
//! Larger values encode as a length marker byte (`0xf0 + n`) followed by
//! the value's `n` minimal big-endian bytes. Because longer encodings get
//! strictly larger marker bytes and equal-length encodings compare
//! big-endian, byte-lexicographic order equals numeric order. The encoding
//! is self-delimiting, so it can prefix other key components.

use crate::error::{EncodingError, EncodingResult};

/// Largest value that encodes in a single byte.
pub const SINGLE_BYTE_MAX: u64 = 0xf0;

/// Appends the encoding of `value` to `buf`.
pub fn encode_uint(buf: &mut Vec<u8>, value: u64) {
    if value <= SINGLE_BYTE_MAX {
        buf.push(value as u8);
        return;
    }
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let len = 8 - skip;
    buf.push(0xf0 + len as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Returns the number of bytes `value` encodes to.
#[must_use]
pub fn encoded_uint_len(value: u64) -> usize {
    if value <= SINGLE_BYTE_MAX {
        1
    } else {
        1 + (8 - value.leading_zeros() as usize / 8)
    }
}

/// Decodes an unsigned integer from the front of `input`, advancing it past
/// the consumed bytes.
///
/// # Errors
///
/// Fails on truncated input and on non-canonical encodings (a multi-byte
/// form that would fit in fewer bytes).
pub fn decode_uint(input: &mut &[u8]) -> EncodingResult<u64> {
    let (&first, rest) = input
        .split_first()
        .ok_or(EncodingError::Truncated { needed: 1 })?;
    if u64::from(first) <= SINGLE_BYTE_MAX {
        *input = rest;
        return Ok(u64::from(first));
    }
    let len = (first - 0xf0) as usize;
    if len > 8 {
        return Err(EncodingError::InvalidMarker {
            what: "unsigned integer",
            byte: first,
        });
    }
    if rest.len() < len {
        return Err(EncodingError::Truncated {
            needed: len - rest.len(),
        });
    }
    let mut value = 0u64;
    for &byte in &rest[..len] {
        value = (value << 8) | u64::from(byte);
    }
    // Shortest-form check: a leading zero byte, or a one-byte form that
    // fits in the single-byte range, is non-canonical.
    if rest[0] == 0 || (len == 1 && value <= SINGLE_BYTE_MAX) {
        return Err(EncodingError::NonCanonical);
    }
    *input = &rest[len..];
    Ok(value)
}
