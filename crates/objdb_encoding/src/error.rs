//! Error types for the encoding layer.

use thiserror::Error;

/// Result type for encoding operations.
pub type EncodingResult<T> = Result<T, EncodingError>;

/// Errors that can occur while encoding or decoding objdb byte sequences.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// Input ended before a complete value was read.
    #[error("truncated input: needed {needed} more byte(s)")]
    Truncated {
        /// Number of additional bytes required.
        needed: usize,
    },

    /// A multi-byte integer was not encoded in its shortest form.
    #[error("non-canonical unsigned integer encoding")]
    NonCanonical,

    /// An unexpected byte was found where a typed value marker belongs.
    #[error("invalid {what} marker byte: {byte:#04x}")]
    InvalidMarker {
        /// What was being decoded.
        what: &'static str,
        /// The offending byte.
        byte: u8,
    },

    /// A decoded string was not valid UTF-8.
    #[error("decoded string is not valid UTF-8")]
    InvalidUtf8,

    /// An object ID had the wrong length.
    #[error("invalid object ID length: {len}")]
    InvalidIdLength {
        /// Actual length.
        len: usize,
    },

    /// A storage ID is too large to leave room for random ID bytes.
    #[error("storage ID {storage_id} too large for object ID prefix")]
    StorageIdTooLarge {
        /// The offending storage ID.
        storage_id: u32,
    },
}
