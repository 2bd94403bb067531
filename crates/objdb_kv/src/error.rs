//! Error types for the KV layer.

use thiserror::Error;

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur in KV store operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// The transaction has already been committed or rolled back.
    #[error("KV transaction already completed")]
    AlreadyCompleted,

    /// A stored counter value has the wrong length.
    #[error("invalid counter value: expected 8 bytes, got {len}")]
    InvalidCounter {
        /// Actual length of the stored value.
        len: usize,
    },

    /// An invalid key range was supplied.
    #[error("invalid key range: min {min:?} exceeds max {max:?}")]
    InvalidRange {
        /// Inclusive lower bound.
        min: Vec<u8>,
        /// Exclusive upper bound.
        max: Vec<u8>,
    },

    /// Store-specific failure.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },
}

impl KvError {
    /// Creates a store-specific error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}
