//! Per-object meta-data record.

use crate::error::{DbError, DbResult};
use crate::keys::obj_key;
use objdb_encoding::{decode_uint, encode_uint, ObjId};
use objdb_kv::KvTransaction;

/// Flag bit: delete listeners have already been notified for this object.
const FLAG_DELETE_NOTIFIED: u8 = 0x01;

/// The meta-data record stored at an object's base key.
///
/// Every existing object has exactly one of these; its absence *is* the
/// "object does not exist" state, which is why [`ObjInfo::read`] returns an
/// `Option` instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjInfo {
    /// Schema version this object's stored data conforms to.
    pub version: u32,
    /// Whether delete listeners have been notified.
    pub delete_notified: bool,
}

impl ObjInfo {
    /// Creates a fresh record at the given schema version.
    #[must_use]
    pub fn new(version: u32) -> Self {
        Self {
            version,
            delete_notified: false,
        }
    }

    /// Encodes the record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_uint(&mut buf, u64::from(self.version));
        buf.push(if self.delete_notified {
            FLAG_DELETE_NOTIFIED
        } else {
            0
        });
        buf
    }

    /// Decodes a stored record.
    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let mut input = bytes;
        let version = decode_uint(&mut input)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| DbError::inconsistent("corrupt object meta-data version"))?;
        let &[flags] = input else {
            return Err(DbError::inconsistent("corrupt object meta-data flags"));
        };
        Ok(Self {
            version,
            delete_notified: flags & FLAG_DELETE_NOTIFIED != 0,
        })
    }

    /// Reads the record for `id`, or `None` if the object does not exist.
    pub fn read(kv: &dyn KvTransaction, id: ObjId) -> DbResult<Option<Self>> {
        match kv.get(&obj_key(id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes the record for `id`.
    pub fn write(&self, kv: &mut dyn KvTransaction, id: ObjId) -> DbResult<()> {
        kv.put(&obj_key(id), &self.encode())?;
        Ok(())
    }
}
