//! Object identifier.

use crate::error::{EncodingError, EncodingResult};
use crate::uint::{decode_uint, encode_uint, encoded_uint_len};
use rand::Rng;
use std::fmt;

/// Width of an object ID in bytes.
pub const OBJ_ID_LEN: usize = 8;

/// Minimum number of random bytes every ID must carry after its type prefix.
const MIN_RANDOM_BYTES: usize = 4;

/// Fixed-width identifier for a stored object.
///
/// The leading bytes are the encoded storage ID of the object's type; the
/// remaining bytes are randomly generated at creation. Ordering is the
/// byte-lexicographic order of the encoding, which places all objects of the
/// same type in one contiguous key range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId([u8; OBJ_ID_LEN]);

impl ObjId {
    /// Creates an object ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; OBJ_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a new ID for the given type storage ID with random trailing
    /// bytes.
    ///
    /// # Errors
    ///
    /// Fails if the encoded storage ID leaves no room for random bytes.
    pub fn random(storage_id: u32) -> EncodingResult<Self> {
        let prefix = Self::type_prefix(storage_id)?;
        let mut bytes = [0u8; OBJ_ID_LEN];
        bytes[..prefix.len()].copy_from_slice(&prefix);
        rand::thread_rng().fill(&mut bytes[prefix.len()..]);
        Ok(Self(bytes))
    }

    /// Returns the encoded storage ID prefix shared by all IDs of a type.
    ///
    /// # Errors
    ///
    /// Fails if the storage ID encodes too wide to leave [`MIN_RANDOM_BYTES`]
    /// random bytes.
    pub fn type_prefix(storage_id: u32) -> EncodingResult<Vec<u8>> {
        if encoded_uint_len(u64::from(storage_id)) > OBJ_ID_LEN - MIN_RANDOM_BYTES {
            return Err(EncodingError::StorageIdTooLarge { storage_id });
        }
        let mut prefix = Vec::new();
        encode_uint(&mut prefix, u64::from(storage_id));
        Ok(prefix)
    }

    /// Decodes the type storage ID from the ID's leading bytes.
    ///
    /// # Errors
    ///
    /// Fails if the leading bytes are not a valid storage ID encoding.
    pub fn storage_id(&self) -> EncodingResult<u32> {
        let mut input: &[u8] = &self.0;
        let id = decode_uint(&mut input)?;
        u32::try_from(id).map_err(|_| EncodingError::InvalidIdLength { len: OBJ_ID_LEN })
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; OBJ_ID_LEN] {
        &self.0
    }

    /// Returns the raw bytes as a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates an object ID from a slice.
    ///
    /// Returns `None` if the slice is not exactly [`OBJ_ID_LEN`] bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; OBJ_ID_LEN] = slice.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({self})")
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; OBJ_ID_LEN]> for ObjId {
    fn from(bytes: [u8; OBJ_ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<ObjId> for [u8; OBJ_ID_LEN] {
    fn from(id: ObjId) -> Self {
        id.0
    }
}
