//! Typed field values and their byte encodings.
//!
//! Every encoding here is **order-preserving** (byte-lexicographic order of
//! the encodings equals the natural order of the values) and
//! **self-delimiting** (a decoder can find the end of a value without an
//! outer length), because encoded values are embedded in the middle of index
//! keys with more components after them.

use crate::error::{EncodingError, EncodingResult};
use crate::id::{ObjId, OBJ_ID_LEN};
use std::fmt;

/// Marker byte for a null reference.
const REF_NULL: u8 = 0x00;
/// Marker byte preceding a non-null reference's ID bytes.
const REF_SOME: u8 = 0x01;

/// The encoding family of a simple field.
///
/// Two field definitions with the same `ValueType` are schema-change
/// compatible: an object migrating between schema versions keeps the stored
/// bytes of such a field as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean, encoded as a single `0x00`/`0x01` byte.
    Bool,
    /// Signed 64-bit integer, encoded sign-flipped big-endian.
    Int,
    /// UTF-8 string, encoded with NUL escaping and a NUL-NUL terminator.
    String,
    /// Raw byte string, encoded like [`ValueType::String`].
    Bytes,
    /// Optional reference to another object.
    Reference,
}

impl ValueType {
    /// Returns the default value of this type: the value a field reads as
    /// when no entry is stored for it.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::String => Value::String(String::new()),
            Self::Bytes => Value::Bytes(Vec::new()),
            Self::Reference => Value::Reference(None),
        }
    }

    /// Returns the encoded byte sequence of the default value.
    #[must_use]
    pub fn default_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.default_value()
            .encode(&mut buf)
            .unwrap_or_else(|_| unreachable!("default value always matches its type"));
        buf
    }

    /// Whether a stored value of `old` usefully migrates to this type.
    #[must_use]
    pub fn is_compatible(&self, old: ValueType) -> bool {
        *self == old
    }

    /// Decodes one value of this type from the front of `input`, advancing
    /// it past the consumed bytes.
    pub fn decode(&self, input: &mut &[u8]) -> EncodingResult<Value> {
        match self {
            Self::Bool => match take_byte(input)? {
                0x00 => Ok(Value::Bool(false)),
                0x01 => Ok(Value::Bool(true)),
                byte => Err(EncodingError::InvalidMarker {
                    what: "boolean",
                    byte,
                }),
            },
            Self::Int => {
                let raw = take_array::<8>(input)?;
                Ok(Value::Int((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64))
            }
            Self::String => {
                let bytes = decode_escaped(input)?;
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| EncodingError::InvalidUtf8)
            }
            Self::Bytes => Ok(Value::Bytes(decode_escaped(input)?)),
            Self::Reference => match take_byte(input)? {
                REF_NULL => Ok(Value::Reference(None)),
                REF_SOME => {
                    let raw = take_array::<OBJ_ID_LEN>(input)?;
                    Ok(Value::Reference(Some(ObjId::from_bytes(raw))))
                }
                byte => Err(EncodingError::InvalidMarker {
                    what: "reference",
                    byte,
                }),
            },
        }
    }

    /// Decodes a value occupying exactly `input`.
    pub fn decode_all(&self, input: &[u8]) -> EncodingResult<Value> {
        let mut cursor = input;
        let value = self.decode(&mut cursor)?;
        if cursor.is_empty() {
            Ok(value)
        } else {
            Err(EncodingError::InvalidMarker {
                what: "trailing bytes",
                byte: cursor[0],
            })
        }
    }
}

const SIGN_BIT: u64 = 1 << 63;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// String value.
    String(String),
    /// Byte-string value.
    Bytes(Vec<u8>),
    /// Reference value; `None` is the null reference.
    Reference(Option<ObjId>),
}

impl Value {
    /// Returns the [`ValueType`] this value belongs to.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::String(_) => ValueType::String,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Reference(_) => ValueType::Reference,
        }
    }

    /// Appends this value's encoding to `buf`.
    ///
    /// # Errors
    ///
    /// Never fails for well-formed values; the `Result` exists so callers
    /// can thread encoding failures uniformly.
    pub fn encode(&self, buf: &mut Vec<u8>) -> EncodingResult<()> {
        match self {
            Self::Bool(b) => buf.push(u8::from(*b)),
            Self::Int(n) => buf.extend_from_slice(&((*n as u64) ^ SIGN_BIT).to_be_bytes()),
            Self::String(s) => encode_escaped(buf, s.as_bytes()),
            Self::Bytes(b) => encode_escaped(buf, b),
            Self::Reference(None) => buf.push(REF_NULL),
            Self::Reference(Some(id)) => {
                buf.push(REF_SOME);
                buf.extend_from_slice(id.as_bytes());
            }
        }
        Ok(())
    }

    /// Returns this value's encoding as a fresh vector.
    pub fn encoded(&self) -> EncodingResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Returns the referenced object, if this is a non-null reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<ObjId> {
        match self {
            Self::Reference(id) => *id,
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "{} byte(s)", b.len()),
            Self::Reference(None) => write!(f, "null"),
            Self::Reference(Some(id)) => write!(f, "@{id}"),
        }
    }
}

/// Escaped byte-string encoding: each `0x00` content byte becomes
/// `0x00 0x01`; the terminator is `0x00 0x00`. Prefix ordering is preserved
/// because the terminator sorts below every escaped content byte.
fn encode_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        if byte == 0x00 {
            buf.extend_from_slice(&[0x00, 0x01]);
        } else {
            buf.push(byte);
        }
    }
    buf.extend_from_slice(&[0x00, 0x00]);
}

fn decode_escaped(input: &mut &[u8]) -> EncodingResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match take_byte(input)? {
            0x00 => match take_byte(input)? {
                0x00 => return Ok(out),
                0x01 => out.push(0x00),
                byte => {
                    return Err(EncodingError::InvalidMarker {
                        what: "escape sequence",
                        byte,
                    })
                }
            },
            byte => out.push(byte),
        }
    }
}

fn take_byte(input: &mut &[u8]) -> EncodingResult<u8> {
    let (&first, rest) = input
        .split_first()
        .ok_or(EncodingError::Truncated { needed: 1 })?;
    *input = rest;
    Ok(first)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> EncodingResult<[u8; N]> {
    if input.len() < N {
        return Err(EncodingError::Truncated {
            needed: N - input.len(),
        });
    }
    let (head, rest) = input.split_at(N);
    *input = rest;
    Ok(head.try_into().unwrap_or_else(|_| unreachable!()))
}
