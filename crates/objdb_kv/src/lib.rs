//! # objdb KV
//!
//! Ordered key/value transaction abstraction for objdb.
//!
//! This crate defines the lowest-level storage contract the object layer is
//! built on. Stores are **opaque ordered byte maps**: they provide get, put,
//! remove, range removal, and ordered range scans over byte-string keys,
//! plus an optional counter extension. The object layer owns all key format
//! interpretation - stores do not understand objects, fields, or indexes.
//!
//! ## Available stores
//!
//! - [`MemoryKvStore`] - In-memory store with snapshot-per-transaction
//!   semantics, used by tests and ephemeral databases.
//!
//! ## Example
//!
//! ```rust
//! use objdb_kv::{KvStore, MemoryKvStore};
//!
//! let store = MemoryKvStore::new();
//! let mut tx = store.transaction();
//! tx.put(b"key", b"value").unwrap();
//! assert_eq!(tx.get(b"key").unwrap(), Some(b"value".to_vec()));
//! tx.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;

pub use error::{KvError, KvResult};
pub use memory::{KvStats, MemoryKvStore, MemoryKvTransaction};
pub use store::{key_after_prefix, KvStore, KvTransaction};
