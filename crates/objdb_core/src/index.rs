//! Secondary-index queries.
//!
//! A query is a live read-only view over one indexed simple field's index
//! entries; nothing is materialized until asked for. Queries resolve the
//! field in the transaction's schema version, so objects still stored at
//! other versions appear exactly as far as those versions maintained the
//! same index entries.

use crate::error::{DbError, DbResult};
use crate::keys::{index_entry_id, index_prefix, index_value_prefix};
use crate::schema::{ListField, MapField, SimpleField};
use crate::tx::Transaction;
use objdb_encoding::{decode_uint, ObjId, Value, OBJ_ID_LEN};
use objdb_kv::{key_after_prefix, KvTransaction};
use std::collections::BTreeSet;

fn unknown_indexed_field(storage_id: u32, reason: &'static str) -> DbError {
    DbError::UnknownField {
        storage_id,
        type_name: "(any type)".to_string(),
        reason,
    }
}

fn check_query_value(field: &SimpleField, value: &Value) -> DbResult<()> {
    if value.value_type() != field.value_type {
        return Err(DbError::InvalidValue {
            storage_id: field.storage_id,
            expected: field.value_type,
            actual: value.value_type(),
        });
    }
    Ok(())
}

impl Transaction {
    /// Opens a query over the index of a simple field or set element.
    ///
    /// # Errors
    ///
    /// Fails with [`DbError::UnknownField`] if no type in the transaction's
    /// schema version indexes a field with this storage ID.
    pub fn query_index(&self, storage_id: u32) -> DbResult<IndexQuery<'_>> {
        self.check_open()?;
        for ty in self.tx_schema.types.values() {
            if let Some((field, _)) = ty.locate_simple(storage_id) {
                if !field.indexed {
                    return Err(unknown_indexed_field(storage_id, "field is not indexed"));
                }
                return Ok(IndexQuery {
                    kv: self.kv(),
                    field: field.clone(),
                });
            }
        }
        Err(unknown_indexed_field(storage_id, "no such indexed field"))
    }

    /// Opens a query over a list field's element index, which additionally
    /// reports each occurrence's position.
    pub fn query_list_index(&self, element_storage_id: u32) -> DbResult<ListIndexQuery<'_>> {
        self.check_open()?;
        for ty in self.tx_schema.types.values() {
            for field in ty.complex_fields() {
                if let crate::schema::Field::List(list) = field {
                    if list.element.storage_id == element_storage_id {
                        if !list.element.indexed {
                            return Err(unknown_indexed_field(
                                element_storage_id,
                                "field is not indexed",
                            ));
                        }
                        return Ok(ListIndexQuery {
                            kv: self.kv(),
                            list: list.clone(),
                        });
                    }
                }
            }
        }
        Err(unknown_indexed_field(
            element_storage_id,
            "no such list element field",
        ))
    }

    /// Opens a query over a map field's value index, which additionally
    /// reports the key each value is stored under.
    pub fn query_map_value_index(&self, value_storage_id: u32) -> DbResult<MapValueIndexQuery<'_>> {
        self.check_open()?;
        for ty in self.tx_schema.types.values() {
            for field in ty.complex_fields() {
                if let crate::schema::Field::Map(map) = field {
                    if map.value.storage_id == value_storage_id {
                        if !map.value.indexed {
                            return Err(unknown_indexed_field(
                                value_storage_id,
                                "field is not indexed",
                            ));
                        }
                        return Ok(MapValueIndexQuery {
                            kv: self.kv(),
                            map: map.clone(),
                        });
                    }
                }
            }
        }
        Err(unknown_indexed_field(
            value_storage_id,
            "no such map value field",
        ))
    }
}

/// A live view over one indexed simple field (or set element, or map key).
pub struct IndexQuery<'a> {
    kv: &'a dyn KvTransaction,
    field: SimpleField,
}

impl IndexQuery<'_> {
    /// Returns the IDs of all objects holding `value` in the indexed field.
    pub fn get(&self, value: &Value) -> DbResult<BTreeSet<ObjId>> {
        check_query_value(&self.field, value)?;
        let prefix = index_value_prefix(self.field.storage_id, &value.encoded()?);
        let end = key_after_prefix(&prefix);
        let mut ids = BTreeSet::new();
        let mut lower = prefix.clone();
        while let Some((key, _)) = self.kv.next_entry(&lower, end.as_deref())? {
            let id = index_entry_id(&key, prefix.len())
                .ok_or_else(|| DbError::inconsistent("truncated index entry"))?;
            ids.insert(id);
            lower = key;
            lower.push(0x00);
        }
        Ok(ids)
    }

    /// Whether the index holds an entry for `(value, id)`.
    pub fn contains(&self, value: &Value, id: ObjId) -> DbResult<bool> {
        Ok(self.get(value)?.contains(&id))
    }

    /// Returns every distinct indexed value with the IDs holding it, in
    /// value order.
    pub fn entries(&self) -> DbResult<Vec<(Value, BTreeSet<ObjId>)>> {
        let prefix = index_prefix(self.field.storage_id);
        let end = key_after_prefix(&prefix);
        let mut entries: Vec<(Value, BTreeSet<ObjId>)> = Vec::new();
        let mut lower = prefix.clone();
        while let Some((key, _)) = self.kv.next_entry(&lower, end.as_deref())? {
            let mut cursor = &key[prefix.len()..];
            let value = self.field.value_type.decode(&mut cursor)?;
            let id = ObjId::from_slice(cursor.get(..OBJ_ID_LEN).unwrap_or(&[]))
                .ok_or_else(|| DbError::inconsistent("truncated index entry"))?;
            match entries.last_mut() {
                Some((last, ids)) if *last == value => {
                    ids.insert(id);
                }
                _ => {
                    entries.push((value, BTreeSet::from([id])));
                }
            }
            lower = key;
            lower.push(0x00);
        }
        Ok(entries)
    }
}

/// A live view over a list field's element index.
pub struct ListIndexQuery<'a> {
    kv: &'a dyn KvTransaction,
    list: ListField,
}

impl ListIndexQuery<'_> {
    /// Returns every `(object, position)` occurrence of `value`, in object
    /// then position order.
    pub fn get(&self, value: &Value) -> DbResult<Vec<(ObjId, u64)>> {
        check_query_value(&self.list.element, value)?;
        let prefix = index_value_prefix(self.list.element.storage_id, &value.encoded()?);
        let end = key_after_prefix(&prefix);
        let mut occurrences = Vec::new();
        let mut lower = prefix.clone();
        while let Some((key, _)) = self.kv.next_entry(&lower, end.as_deref())? {
            let id = index_entry_id(&key, prefix.len())
                .ok_or_else(|| DbError::inconsistent("truncated index entry"))?;
            let mut cursor = &key[prefix.len() + OBJ_ID_LEN..];
            let position = decode_uint(&mut cursor)?;
            if !cursor.is_empty() {
                return Err(DbError::inconsistent("trailing bytes in list index entry"));
            }
            occurrences.push((id, position));
            lower = key;
            lower.push(0x00);
        }
        Ok(occurrences)
    }
}

/// A live view over a map field's value index.
pub struct MapValueIndexQuery<'a> {
    kv: &'a dyn KvTransaction,
    map: MapField,
}

impl MapValueIndexQuery<'_> {
    /// Returns every `(object, key)` entry holding `value`, in object then
    /// key order.
    pub fn get(&self, value: &Value) -> DbResult<Vec<(ObjId, Value)>> {
        check_query_value(&self.map.value, value)?;
        let prefix = index_value_prefix(self.map.value.storage_id, &value.encoded()?);
        let end = key_after_prefix(&prefix);
        let mut entries = Vec::new();
        let mut lower = prefix.clone();
        while let Some((key, _)) = self.kv.next_entry(&lower, end.as_deref())? {
            let id = index_entry_id(&key, prefix.len())
                .ok_or_else(|| DbError::inconsistent("truncated index entry"))?;
            let mut cursor = &key[prefix.len() + OBJ_ID_LEN..];
            let map_key = self.map.key.value_type.decode(&mut cursor)?;
            if !cursor.is_empty() {
                return Err(DbError::inconsistent("trailing bytes in map index entry"));
            }
            entries.push((id, map_key));
            lower = key;
            lower.push(0x00);
        }
        Ok(entries)
    }
}
