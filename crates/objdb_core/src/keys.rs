//! Key construction.
//!
//! Two keyspace regions share one ordered map:
//!
//! - **Object data**: `ObjId bytes ++ encode_uint(fieldStorageId) [++ sub-key]`,
//!   with the object's meta-data record at the bare `ObjId` key.
//! - **Index entries**: `encode_uint(fieldStorageId) ++ encoded value ++ ObjId
//!   [++ extra component]`, mapping to an empty value.
//!
//! The regions cannot collide because storage IDs are globally unique within
//! a schema version and both regions open with an encoded storage ID.

use objdb_encoding::{encode_uint, ObjId, OBJ_ID_LEN};

/// Key of an object's meta-data record.
#[must_use]
pub fn obj_key(id: ObjId) -> Vec<u8> {
    id.to_vec()
}

/// Key of a simple or counter field's stored value.
#[must_use]
pub fn field_key(id: ObjId, storage_id: u32) -> Vec<u8> {
    let mut key = id.to_vec();
    encode_uint(&mut key, u64::from(storage_id));
    key
}

/// Prefix owned by a complex field's content.
#[must_use]
pub fn field_prefix(id: ObjId, storage_id: u32) -> Vec<u8> {
    field_key(id, storage_id)
}

/// Key of one set element.
#[must_use]
pub fn set_entry_key(id: ObjId, storage_id: u32, element_bytes: &[u8]) -> Vec<u8> {
    let mut key = field_prefix(id, storage_id);
    key.extend_from_slice(element_bytes);
    key
}

/// Key of one list entry at the given position.
#[must_use]
pub fn list_entry_key(id: ObjId, storage_id: u32, position: u64) -> Vec<u8> {
    let mut key = field_prefix(id, storage_id);
    encode_uint(&mut key, position);
    key
}

/// Key of one map entry.
#[must_use]
pub fn map_entry_key(id: ObjId, storage_id: u32, key_bytes: &[u8]) -> Vec<u8> {
    let mut key = field_prefix(id, storage_id);
    key.extend_from_slice(key_bytes);
    key
}

/// Prefix of all index entries for one indexed simple field or sub-field.
#[must_use]
pub fn index_prefix(storage_id: u32) -> Vec<u8> {
    let mut key = Vec::new();
    encode_uint(&mut key, u64::from(storage_id));
    key
}

/// Prefix of all index entries for one (field, value) pair.
#[must_use]
pub fn index_value_prefix(storage_id: u32, value_bytes: &[u8]) -> Vec<u8> {
    let mut key = index_prefix(storage_id);
    key.extend_from_slice(value_bytes);
    key
}

/// Index entry for a simple field or set element: `fid ++ value ++ id`.
#[must_use]
pub fn simple_index_entry(storage_id: u32, value_bytes: &[u8], id: ObjId) -> Vec<u8> {
    let mut key = index_value_prefix(storage_id, value_bytes);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Index entry for a list element: `fid ++ value ++ id ++ position`.
#[must_use]
pub fn list_index_entry(storage_id: u32, value_bytes: &[u8], id: ObjId, position: u64) -> Vec<u8> {
    let mut key = simple_index_entry(storage_id, value_bytes, id);
    encode_uint(&mut key, position);
    key
}

/// Index entry for a map value: `fid ++ value ++ id ++ key`.
#[must_use]
pub fn map_value_index_entry(
    storage_id: u32,
    value_bytes: &[u8],
    id: ObjId,
    key_bytes: &[u8],
) -> Vec<u8> {
    let mut key = simple_index_entry(storage_id, value_bytes, id);
    key.extend_from_slice(key_bytes);
    key
}

/// Extracts the object ID that follows `prefix` in an index entry key.
///
/// Returns `None` when the key is too short (corrupt entry).
#[must_use]
pub fn index_entry_id(key: &[u8], prefix_len: usize) -> Option<ObjId> {
    let suffix = key.get(prefix_len..)?;
    ObjId::from_slice(suffix.get(..OBJ_ID_LEN)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ObjId {
        ObjId::from_bytes([100, 1, 2, 3, 4, 5, 6, 7])
    }

    #[test]
    fn field_key_layout() {
        let key = field_key(id(), 42);
        assert_eq!(&key[..8], id().as_bytes());
        assert_eq!(key[8], 42);
    }

    #[test]
    fn object_keys_share_id_prefix() {
        let meta = obj_key(id());
        let field = field_key(id(), 9);
        let set = set_entry_key(id(), 10, &[1, 2]);
        assert!(field.starts_with(&meta));
        assert!(set.starts_with(&meta));
        assert!(meta < field);
    }

    #[test]
    fn index_entry_id_extraction() {
        let value = vec![0x07, 0x08];
        let entry = simple_index_entry(42, &value, id());
        let prefix = index_value_prefix(42, &value);
        assert_eq!(index_entry_id(&entry, prefix.len()), Some(id()));
    }

    #[test]
    fn index_entry_id_on_short_key() {
        assert_eq!(index_entry_id(&[1, 2, 3], 2), None);
    }

    #[test]
    fn list_index_entry_carries_position() {
        let entry = list_index_entry(13, &[9], id(), 300);
        let base = simple_index_entry(13, &[9], id());
        assert!(entry.starts_with(&base));
        assert!(entry.len() > base.len());
    }

    proptest::proptest! {
        #[test]
        fn list_entry_keys_sort_by_position(a: u64, b: u64) {
            let ka = list_entry_key(id(), 7, a);
            let kb = list_entry_key(id(), 7, b);
            proptest::prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }
}
