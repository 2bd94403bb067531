//! # objdb encoding
//!
//! Order-preserving byte encodings for objdb.
//!
//! Every key the object layer persists is built from these primitives:
//!
//! - [`encode_uint`] / [`decode_uint`] - self-delimiting unsigned integers
//!   whose byte-lexicographic order equals their numeric order, used for
//!   storage IDs and list positions
//! - [`ObjId`] - the fixed-width object identifier whose leading bytes are
//!   its type's encoded storage ID
//! - [`Value`] / [`ValueType`] - typed field values with order-preserving,
//!   self-delimiting encodings and well-defined default byte sequences
//!
//! The ordering invariant is what makes byte-prefix indexing work: a range
//! scan over encoded keys visits values in their natural order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod id;
mod uint;
mod value;

pub use error::{EncodingError, EncodingResult};
pub use id::{ObjId, OBJ_ID_LEN};
pub use uint::{decode_uint, encode_uint, encoded_uint_len};
pub use value::{Value, ValueType};
