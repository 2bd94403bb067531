//! # objdb core
//!
//! The object layer of objdb: typed objects with simple, counter, set,
//! list, and map fields, persisted in an ordered key/value store through
//! [`objdb_kv`] using the order-preserving encodings of [`objdb_encoding`].
//!
//! A [`Schema`] describes the object types of one or more numbered schema
//! versions. A [`Transaction`] reads and writes objects against one version
//! and migrates stored objects to it lazily, on first access. On top of
//! that the crate provides:
//!
//! - **Secondary indexes** over simple fields and complex sub-fields,
//!   queried through [`Transaction::query_index`] and friends
//! - **Delete cascades** driven by per-reference-field
//!   [`DeleteAction`] policies
//! - **Field-change notification** with reference-path back-tracking, so a
//!   listener can watch a field several hops away from the objects it
//!   cares about
//! - **Object copying** between transactions via [`Transaction::copy_to`]
//!   and [`Transaction::copy_tree`]
//!
//! ## Example
//!
//! ```rust
//! use objdb_core::{ObjTypeBuilder, SchemaBuilder, SchemaVersionBuilder, Transaction};
//! use objdb_encoding::{Value, ValueType};
//! use objdb_kv::MemoryKvStore;
//! use std::sync::Arc;
//!
//! const BOOK: u32 = 10;
//! const TITLE: u32 = 1;
//!
//! let version = SchemaVersionBuilder::new(1)
//!     .obj_type(
//!         ObjTypeBuilder::new(BOOK, "book")
//!             .simple_field(TITLE, "title", ValueType::String, true),
//!     )
//!     .build()
//!     .unwrap();
//! let schema = Arc::new(SchemaBuilder::new().version(version).build().unwrap());
//!
//! let store = MemoryKvStore::new();
//! let mut tx = Transaction::open(&store, schema, 1).unwrap();
//! let id = tx.create_of_type(BOOK).unwrap();
//! tx.write_simple_field(id, TITLE, Value::String("Dune".into())).unwrap();
//! let hits = tx.query_index(TITLE).unwrap().get(&Value::String("Dune".into())).unwrap();
//! assert!(hits.contains(&id));
//! tx.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod copy;
mod error;
mod index;
mod keys;
mod listener;
mod objinfo;
mod schema;
mod tx;

pub use copy::CopyState;
pub use error::{DbError, DbResult};
pub use index::{IndexQuery, ListIndexQuery, MapValueIndexQuery};
pub use listener::{
    Callback, CreateListener, DeleteListener, FieldChange, FieldChangeListener, OldFieldValue,
    OldFieldValues, VersionChangeListener,
};
pub use schema::{
    reference_sub_field, sub_field, CounterField, DeleteAction, Field, ListField, MapField,
    ObjType, ObjTypeBuilder, RefContainer, RefFieldLoc, Schema, SchemaBuilder, SchemaVersion,
    SchemaVersionBuilder, SetField, SimpleField,
};
pub use tx::{ListView, MapView, SetView, Transaction};

// The encodings are part of the public API surface (IDs and field values).
pub use objdb_encoding::{ObjId, Value, ValueType};
