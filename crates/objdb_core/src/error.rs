//! Error types for the object layer.

use objdb_encoding::{ObjId, ValueType};
use thiserror::Error;

/// Result type for object-layer operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in object-layer operations.
///
/// Lifecycle errors (`StaleTransaction`, `ReadOnlyTransaction`,
/// `RollbackOnlyTransaction`) mean the caller must start a new transaction.
/// `DeletedObject` and `ReferencedObject` are expected, recoverable
/// conditions callers branch on. `InconsistentDatabase` is fatal: stored
/// data references storage IDs no known schema version recognizes.
#[derive(Debug, Error)]
pub enum DbError {
    /// The transaction has already been committed or rolled back.
    #[error("transaction is stale (already committed or rolled back)")]
    StaleTransaction,

    /// A mutation was attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// The transaction has been marked rollback-only.
    #[error("transaction is marked rollback-only")]
    RollbackOnlyTransaction,

    /// The object does not exist (or was deleted).
    #[error("object {id} not found")]
    DeletedObject {
        /// The missing object.
        id: ObjId,
    },

    /// A delete was rejected because another object still references the
    /// target through an exception-policy reference field.
    #[error("object {id} is still referenced by {referrer} via field {storage_id}")]
    ReferencedObject {
        /// The object whose delete was rejected.
        id: ObjId,
        /// The referring object.
        referrer: ObjId,
        /// Storage ID of the referring field.
        storage_id: u32,
    },

    /// No field with this storage ID (or of the expected kind) exists in the
    /// object's type.
    #[error("no such field {storage_id} in type \"{type_name}\": {reason}")]
    UnknownField {
        /// The offending field storage ID.
        storage_id: u32,
        /// Name of the type that was searched.
        type_name: String,
        /// Why the lookup failed.
        reason: &'static str,
    },

    /// No object type with this storage ID exists in the schema version.
    #[error("no object type with storage ID {storage_id} in schema version {version}")]
    UnknownType {
        /// The offending type storage ID.
        storage_id: u32,
        /// Schema version searched.
        version: u32,
    },

    /// The schema catalog does not contain this version.
    #[error("unknown schema version {version}")]
    UnknownVersion {
        /// The missing version number.
        version: u32,
    },

    /// Stored data is inconsistent with every known schema version.
    #[error("inconsistent database: {message}")]
    InconsistentDatabase {
        /// Description of the inconsistency.
        message: String,
    },

    /// A value of the wrong type was supplied for a field.
    #[error("invalid value for field {storage_id}: expected {expected:?}, got {actual:?}")]
    InvalidValue {
        /// The field's storage ID.
        storage_id: u32,
        /// The field's declared type.
        expected: ValueType,
        /// The supplied value's type.
        actual: ValueType,
    },

    /// A list operation referenced a position past the end of the list.
    #[error("list index {index} out of bounds for field {storage_id} (len {len})")]
    ListIndexOutOfBounds {
        /// The list field's storage ID.
        storage_id: u32,
        /// The requested position.
        index: u64,
        /// Current list length.
        len: u64,
    },

    /// A schema definition failed validation.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Random ID generation kept colliding; this signals a broken randomness
    /// source or a pathologically full ID space, not a retryable condition.
    #[error("could not generate unused object ID for type {storage_id} after {attempts} attempts")]
    IdGenerationFailed {
        /// The type being created.
        storage_id: u32,
        /// Number of attempts made.
        attempts: usize,
    },

    /// Source and destination IDs of a copy have different types.
    #[error("copy type mismatch: source type {source_type} vs destination type {destination_type}")]
    CopyTypeMismatch {
        /// Source type storage ID.
        source_type: u32,
        /// Destination type storage ID.
        destination_type: u32,
    },

    /// Underlying KV store error.
    #[error("KV store error: {0}")]
    Kv(#[from] objdb_kv::KvError),

    /// Byte encoding error while interpreting stored data.
    #[error("encoding error: {0}")]
    Encoding(#[from] objdb_encoding::EncodingError),

    /// A listener or callback reported a failure.
    #[error("callback failed: {message}")]
    Callback {
        /// Description of the failure.
        message: String,
    },
}

impl DbError {
    /// Creates an inconsistent-database error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentDatabase {
            message: message.into(),
        }
    }

    /// Creates an invalid-schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a callback-failure error.
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }
}
