//! Field access: simple fields, counters, and the complex collections.
//!
//! Writes resolve fields through the transaction's schema version and
//! migrate the object forward first; reads resolve through the schema
//! version the object's data is actually stored under, so a read never
//! mutates anything unless explicitly asked to.
//!
//! Every mutation runs inside [`Transaction::mutate_and_notify`], and every
//! mutator is a strict no-op (zero KV mutations, no change notification)
//! when the new state equals the old state byte-for-byte.

use crate::error::{DbError, DbResult};
use crate::keys::{
    field_key, field_prefix, list_entry_key, list_index_entry, map_entry_key,
    map_value_index_entry, set_entry_key, simple_index_entry,
};
use crate::listener::FieldChange;
use crate::schema::{Field, SimpleField};
use crate::tx::Transaction;
use objdb_encoding::{decode_uint, ObjId, Value};
use objdb_kv::key_after_prefix;

fn check_value(field: &SimpleField, value: &Value) -> DbResult<()> {
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
    // ------------------------------------------------------------------
    // Simple fields
    // ------------------------------------------------------------------

    /// Reads a simple field, returning the field type's default value when
    /// nothing is stored.
    ///
    /// With `update_version` the object is first migrated to the
    /// transaction's schema version; otherwise the field is resolved in the
    /// version the object is stored under.
    pub fn read_simple_field(
        &mut self,
        id: ObjId,
        storage_id: u32,
        update_version: bool,
    ) -> DbResult<Value> {
        self.check_open()?;
        if update_version {
            self.update_schema_version(id)?;
        }
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let field = ot.simple_field(storage_id)?.clone();
        match self.kv.get(&field_key(id, storage_id))? {
            Some(bytes) => Ok(field.value_type.decode_all(&bytes)?),
            None => Ok(field.value_type.default_value()),
        }
    }

    /// Writes a simple field.
    ///
    /// Writing the field type's default value removes the stored entry
    /// instead; the index entry (for indexed fields) is maintained either
    /// way. Writing the current value does nothing.
    pub fn write_simple_field(&mut self, id: ObjId, storage_id: u32, value: Value) -> DbResult<()> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let field = ot.simple_field(storage_id)?.clone();
            check_value(&field, &value)?;
            let key = field_key(id, storage_id);
            let default_bytes = field.value_type.default_bytes();
            let old_bytes = tx.kv.get(&key)?.unwrap_or_else(|| default_bytes.clone());
            let new_bytes = value.encoded()?;
            if old_bytes == new_bytes {
                return Ok(());
            }
            if new_bytes == default_bytes {
                tx.kv.remove(&key)?;
            } else {
                tx.kv.put(&key, &new_bytes)?;
            }
            if field.indexed {
                tx.kv.remove(&simple_index_entry(storage_id, &old_bytes, id))?;
                tx.kv.put(&simple_index_entry(storage_id, &new_bytes, id), &[])?;
            }
            let old = field.value_type.decode_all(&old_bytes)?;
            tx.queue_change(id, storage_id, FieldChange::Simple { old, new: value });
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Counter fields
    // ------------------------------------------------------------------

    /// Reads a counter field; an unstored counter reads as zero.
    pub fn read_counter_field(
        &mut self,
        id: ObjId,
        storage_id: u32,
        update_version: bool,
    ) -> DbResult<i64> {
        self.check_open()?;
        if update_version {
            self.update_schema_version(id)?;
        }
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        ot.counter_field(storage_id)?;
        match self.kv.get(&field_key(id, storage_id))? {
            Some(bytes) => Ok(self.kv.decode_counter(&bytes)?),
            None => Ok(0),
        }
    }

    /// Sets a counter field to an absolute value.
    pub fn write_counter_field(&mut self, id: ObjId, storage_id: u32, value: i64) -> DbResult<()> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            ot.counter_field(storage_id)?;
            let encoded = tx.kv.encode_counter(value);
            tx.kv.put(&field_key(id, storage_id), &encoded)?;
            Ok(())
        })
    }

    /// Atomically adds `delta` to a counter field. Counters are not
    /// monitorable, so no change notification is generated.
    pub fn adjust_counter_field(&mut self, id: ObjId, storage_id: u32, delta: i64) -> DbResult<()> {
        if delta == 0 {
            self.check_open()?;
            self.check_writable()?;
            return Ok(());
        }
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            ot.counter_field(storage_id)?;
            tx.kv.adjust_counter(&field_key(id, storage_id), delta)?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Set fields
    // ------------------------------------------------------------------

    /// Adds an element to a set field. Returns `false` if it was already
    /// present.
    pub fn set_add(&mut self, id: ObjId, storage_id: u32, element: Value) -> DbResult<bool> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let set = ot.set_field(storage_id)?.clone();
            check_value(&set.element, &element)?;
            let elem_bytes = element.encoded()?;
            let key = set_entry_key(id, storage_id, &elem_bytes);
            if tx.kv.get(&key)?.is_some() {
                return Ok(false);
            }
            tx.kv.put(&key, &[])?;
            if set.element.indexed {
                tx.kv
                    .put(&simple_index_entry(set.element.storage_id, &elem_bytes, id), &[])?;
            }
            tx.queue_change(id, storage_id, FieldChange::SetAdd { element });
            Ok(true)
        })
    }

    /// Removes an element from a set field. Returns `false` if it was not
    /// present.
    pub fn set_remove(&mut self, id: ObjId, storage_id: u32, element: &Value) -> DbResult<bool> {
        let element = element.clone();
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let set = ot.set_field(storage_id)?.clone();
            check_value(&set.element, &element)?;
            let elem_bytes = element.encoded()?;
            let key = set_entry_key(id, storage_id, &elem_bytes);
            if tx.kv.get(&key)?.is_none() {
                return Ok(false);
            }
            tx.kv.remove(&key)?;
            if set.element.indexed {
                tx.kv
                    .remove(&simple_index_entry(set.element.storage_id, &elem_bytes, id))?;
            }
            tx.queue_change(id, storage_id, FieldChange::SetRemove { element });
            Ok(true)
        })
    }

    /// Clears a set field. Clearing an empty set does nothing.
    pub fn set_clear(&mut self, id: ObjId, storage_id: u32) -> DbResult<()> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let set = ot.set_field(storage_id)?.clone();
            let elements = tx.set_raw_elements(id, storage_id)?;
            if elements.is_empty() {
                return Ok(());
            }
            if set.element.indexed {
                for bytes in &elements {
                    tx.kv
                        .remove(&simple_index_entry(set.element.storage_id, bytes, id))?;
                }
            }
            let prefix = field_prefix(id, storage_id);
            tx.kv
                .remove_range(&prefix, key_after_prefix(&prefix).as_deref())?;
            tx.queue_change(id, storage_id, FieldChange::SetClear);
            Ok(())
        })
    }

    /// Whether a set field contains the element.
    pub fn set_contains(&self, id: ObjId, storage_id: u32, element: &Value) -> DbResult<bool> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let set = ot.set_field(storage_id)?.clone();
        check_value(&set.element, element)?;
        let key = set_entry_key(id, storage_id, &element.encoded()?);
        Ok(self.kv.get(&key)?.is_some())
    }

    /// Returns a set field's elements in their encoded order.
    pub fn set_elements(&self, id: ObjId, storage_id: u32) -> DbResult<Vec<Value>> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let set = ot.set_field(storage_id)?.clone();
        let raw = self.set_raw_elements(id, storage_id)?;
        let mut elements = Vec::with_capacity(raw.len());
        for bytes in raw {
            elements.push(set.element.value_type.decode_all(&bytes)?);
        }
        Ok(elements)
    }

    // ------------------------------------------------------------------
    // List fields
    // ------------------------------------------------------------------

    /// Returns a list field's length.
    pub fn list_len(&self, id: ObjId, storage_id: u32) -> DbResult<u64> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        ot.list_field(storage_id)?;
        Ok(self.list_raw_entries(id, storage_id)?.len() as u64)
    }

    /// Reads the list element at `index`.
    pub fn list_get(&self, id: ObjId, storage_id: u32, index: u64) -> DbResult<Value> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let list = ot.list_field(storage_id)?.clone();
        match self.kv.get(&list_entry_key(id, storage_id, index))? {
            Some(bytes) => Ok(list.element.value_type.decode_all(&bytes)?),
            None => {
                let len = self.list_raw_entries(id, storage_id)?.len() as u64;
                Err(DbError::ListIndexOutOfBounds {
                    storage_id,
                    index,
                    len,
                })
            }
        }
    }

    /// Returns a list field's elements in list order.
    pub fn list_elements(&self, id: ObjId, storage_id: u32) -> DbResult<Vec<Value>> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let list = ot.list_field(storage_id)?.clone();
        let raw = self.list_raw_entries(id, storage_id)?;
        let mut elements = Vec::with_capacity(raw.len());
        for (_, bytes) in raw {
            elements.push(list.element.value_type.decode_all(&bytes)?);
        }
        Ok(elements)
    }

    /// Appends an element to a list field. Returns the element's position.
    pub fn list_push(&mut self, id: ObjId, storage_id: u32, element: Value) -> DbResult<u64> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let list = ot.list_field(storage_id)?.clone();
            check_value(&list.element, &element)?;
            let elem_bytes = element.encoded()?;
            let index = tx.list_raw_entries(id, storage_id)?.len() as u64;
            tx.kv
                .put(&list_entry_key(id, storage_id, index), &elem_bytes)?;
            if list.element.indexed {
                tx.kv.put(
                    &list_index_entry(list.element.storage_id, &elem_bytes, id, index),
                    &[],
                )?;
            }
            tx.queue_change(id, storage_id, FieldChange::ListPush { index, element });
            Ok(index)
        })
    }

    /// Replaces the list element at `index`, returning the old element.
    /// Replacing an element with itself does nothing.
    pub fn list_set(
        &mut self,
        id: ObjId,
        storage_id: u32,
        index: u64,
        element: Value,
    ) -> DbResult<Value> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let list = ot.list_field(storage_id)?.clone();
            check_value(&list.element, &element)?;
            let key = list_entry_key(id, storage_id, index);
            let Some(old_bytes) = tx.kv.get(&key)? else {
                let len = tx.list_raw_entries(id, storage_id)?.len() as u64;
                return Err(DbError::ListIndexOutOfBounds {
                    storage_id,
                    index,
                    len,
                });
            };
            let old = list.element.value_type.decode_all(&old_bytes)?;
            let new_bytes = element.encoded()?;
            if old_bytes == new_bytes {
                return Ok(old);
            }
            tx.kv.put(&key, &new_bytes)?;
            if list.element.indexed {
                tx.kv.remove(&list_index_entry(
                    list.element.storage_id,
                    &old_bytes,
                    id,
                    index,
                ))?;
                tx.kv.put(
                    &list_index_entry(list.element.storage_id, &new_bytes, id, index),
                    &[],
                )?;
            }
            tx.queue_change(
                id,
                storage_id,
                FieldChange::ListReplace {
                    index,
                    old: old.clone(),
                    new: element,
                },
            );
            Ok(old)
        })
    }

    /// Removes the list element at `index`, shifting later elements down by
    /// one. Returns the removed element.
    pub fn list_remove(&mut self, id: ObjId, storage_id: u32, index: u64) -> DbResult<Value> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let list = ot.list_field(storage_id)?.clone();
            let entries = tx.list_raw_entries(id, storage_id)?;
            let len = entries.len() as u64;
            let Some(removed_bytes) = entries
                .iter()
                .find(|(position, _)| *position == index)
                .map(|(_, bytes)| bytes.clone())
            else {
                return Err(DbError::ListIndexOutOfBounds {
                    storage_id,
                    index,
                    len,
                });
            };
            if list.element.indexed {
                tx.kv.remove(&list_index_entry(
                    list.element.storage_id,
                    &removed_bytes,
                    id,
                    index,
                ))?;
            }
            for (position, bytes) in entries.iter().filter(|(position, _)| *position > index) {
                let position = *position;
                tx.kv
                    .put(&list_entry_key(id, storage_id, position - 1), bytes)?;
                if list.element.indexed {
                    tx.kv.remove(&list_index_entry(
                        list.element.storage_id,
                        bytes,
                        id,
                        position,
                    ))?;
                    tx.kv.put(
                        &list_index_entry(list.element.storage_id, bytes, id, position - 1),
                        &[],
                    )?;
                }
            }
            tx.kv.remove(&list_entry_key(id, storage_id, len - 1))?;
            let element = list.element.value_type.decode_all(&removed_bytes)?;
            tx.queue_change(
                id,
                storage_id,
                FieldChange::ListRemove {
                    index,
                    element: element.clone(),
                },
            );
            Ok(element)
        })
    }

    /// Clears a list field. Clearing an empty list does nothing.
    pub fn list_clear(&mut self, id: ObjId, storage_id: u32) -> DbResult<()> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let list = ot.list_field(storage_id)?.clone();
            let entries = tx.list_raw_entries(id, storage_id)?;
            if entries.is_empty() {
                return Ok(());
            }
            if list.element.indexed {
                for (position, bytes) in &entries {
                    tx.kv.remove(&list_index_entry(
                        list.element.storage_id,
                        bytes,
                        id,
                        *position,
                    ))?;
                }
            }
            let prefix = field_prefix(id, storage_id);
            tx.kv
                .remove_range(&prefix, key_after_prefix(&prefix).as_deref())?;
            tx.queue_change(id, storage_id, FieldChange::ListClear);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Map fields
    // ------------------------------------------------------------------

    /// Reads the value stored under `key` in a map field.
    pub fn map_get(&self, id: ObjId, storage_id: u32, key: &Value) -> DbResult<Option<Value>> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let map = ot.map_field(storage_id)?.clone();
        check_value(&map.key, key)?;
        match self.kv.get(&map_entry_key(id, storage_id, &key.encoded()?))? {
            Some(bytes) => Ok(Some(map.value.value_type.decode_all(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns a map field's entries in key order.
    pub fn map_entries(&self, id: ObjId, storage_id: u32) -> DbResult<Vec<(Value, Value)>> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let map = ot.map_field(storage_id)?.clone();
        let raw = self.map_raw_entries(id, storage_id)?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key_bytes, value_bytes) in raw {
            entries.push((
                map.key.value_type.decode_all(&key_bytes)?,
                map.value.value_type.decode_all(&value_bytes)?,
            ));
        }
        Ok(entries)
    }

    /// Returns a map field's keys in key order.
    pub fn map_keys(&self, id: ObjId, storage_id: u32) -> DbResult<Vec<Value>> {
        Ok(self
            .map_entries(id, storage_id)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Inserts or overwrites a map entry, returning the previous value under
    /// that key. Overwriting a value with itself does nothing.
    pub fn map_put(
        &mut self,
        id: ObjId,
        storage_id: u32,
        key: Value,
        value: Value,
    ) -> DbResult<Option<Value>> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let map = ot.map_field(storage_id)?.clone();
            check_value(&map.key, &key)?;
            check_value(&map.value, &value)?;
            let key_bytes = key.encoded()?;
            let value_bytes = value.encoded()?;
            let entry_key = map_entry_key(id, storage_id, &key_bytes);
            let old_bytes = tx.kv.get(&entry_key)?;
            let old = match &old_bytes {
                Some(bytes) => Some(map.value.value_type.decode_all(bytes)?),
                None => None,
            };
            if old_bytes.as_deref() == Some(value_bytes.as_slice()) {
                return Ok(old);
            }
            tx.kv.put(&entry_key, &value_bytes)?;
            if map.key.indexed && old_bytes.is_none() {
                tx.kv
                    .put(&simple_index_entry(map.key.storage_id, &key_bytes, id), &[])?;
            }
            if map.value.indexed {
                if let Some(bytes) = &old_bytes {
                    tx.kv.remove(&map_value_index_entry(
                        map.value.storage_id,
                        bytes,
                        id,
                        &key_bytes,
                    ))?;
                }
                tx.kv.put(
                    &map_value_index_entry(map.value.storage_id, &value_bytes, id, &key_bytes),
                    &[],
                )?;
            }
            tx.queue_change(
                id,
                storage_id,
                FieldChange::MapPut {
                    key,
                    old: old.clone(),
                    new: value,
                },
            );
            Ok(old)
        })
    }

    /// Removes a map entry, returning the removed value. Removing an absent
    /// key does nothing.
    pub fn map_remove(&mut self, id: ObjId, storage_id: u32, key: &Value) -> DbResult<Option<Value>> {
        let key = key.clone();
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let map = ot.map_field(storage_id)?.clone();
            check_value(&map.key, &key)?;
            let key_bytes = key.encoded()?;
            let entry_key = map_entry_key(id, storage_id, &key_bytes);
            let Some(value_bytes) = tx.kv.get(&entry_key)? else {
                return Ok(None);
            };
            tx.kv.remove(&entry_key)?;
            if map.key.indexed {
                tx.kv
                    .remove(&simple_index_entry(map.key.storage_id, &key_bytes, id))?;
            }
            if map.value.indexed {
                tx.kv.remove(&map_value_index_entry(
                    map.value.storage_id,
                    &value_bytes,
                    id,
                    &key_bytes,
                ))?;
            }
            let value = map.value.value_type.decode_all(&value_bytes)?;
            tx.queue_change(
                id,
                storage_id,
                FieldChange::MapRemove {
                    key,
                    value: value.clone(),
                },
            );
            Ok(Some(value))
        })
    }

    /// Clears a map field. Clearing an empty map does nothing.
    pub fn map_clear(&mut self, id: ObjId, storage_id: u32) -> DbResult<()> {
        self.mutate_and_notify(id, move |tx| {
            tx.update_schema_version(id)?;
            let ot = tx.current_obj_type(id)?;
            let map = ot.map_field(storage_id)?.clone();
            let entries = tx.map_raw_entries(id, storage_id)?;
            if entries.is_empty() {
                return Ok(());
            }
            for (key_bytes, value_bytes) in &entries {
                if map.key.indexed {
                    tx.kv
                        .remove(&simple_index_entry(map.key.storage_id, key_bytes, id))?;
                }
                if map.value.indexed {
                    tx.kv.remove(&map_value_index_entry(
                        map.value.storage_id,
                        value_bytes,
                        id,
                        key_bytes,
                    ))?;
                }
            }
            let prefix = field_prefix(id, storage_id);
            tx.kv
                .remove_range(&prefix, key_after_prefix(&prefix).as_deref())?;
            tx.queue_change(id, storage_id, FieldChange::MapClear);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Raw content access (encoded bytes, no schema interpretation)
    // ------------------------------------------------------------------

    pub(crate) fn set_raw_elements(&self, id: ObjId, storage_id: u32) -> DbResult<Vec<Vec<u8>>> {
        let prefix = field_prefix(id, storage_id);
        let entries = self.kv.scan(&prefix, key_after_prefix(&prefix).as_deref())?;
        Ok(entries
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_vec())
            .collect())
    }

    pub(crate) fn list_raw_entries(
        &self,
        id: ObjId,
        storage_id: u32,
    ) -> DbResult<Vec<(u64, Vec<u8>)>> {
        let prefix = field_prefix(id, storage_id);
        let entries = self.kv.scan(&prefix, key_after_prefix(&prefix).as_deref())?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let mut suffix = &key[prefix.len()..];
            let position = decode_uint(&mut suffix)?;
            if !suffix.is_empty() {
                return Err(DbError::inconsistent("trailing bytes in list entry key"));
            }
            out.push((position, value));
        }
        Ok(out)
    }

    pub(crate) fn map_raw_entries(
        &self,
        id: ObjId,
        storage_id: u32,
    ) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let prefix = field_prefix(id, storage_id);
        let entries = self.kv.scan(&prefix, key_after_prefix(&prefix).as_deref())?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| (key[prefix.len()..].to_vec(), value))
            .collect())
    }

    /// Removes every index entry maintained for a complex field's current
    /// content.
    pub(crate) fn remove_complex_index_entries(&mut self, id: ObjId, field: &Field) -> DbResult<()> {
        match field {
            Field::Simple(_) | Field::Counter(_) => {}
            Field::Set(set) => {
                if set.element.indexed {
                    let elements = self.set_raw_elements(id, set.storage_id)?;
                    for bytes in elements {
                        self.kv
                            .remove(&simple_index_entry(set.element.storage_id, &bytes, id))?;
                    }
                }
            }
            Field::List(list) => {
                if list.element.indexed {
                    let entries = self.list_raw_entries(id, list.storage_id)?;
                    for (position, bytes) in entries {
                        self.kv.remove(&list_index_entry(
                            list.element.storage_id,
                            &bytes,
                            id,
                            position,
                        ))?;
                    }
                }
            }
            Field::Map(map) => {
                let entries = self.map_raw_entries(id, map.storage_id)?;
                for (key_bytes, value_bytes) in entries {
                    if map.key.indexed {
                        self.kv
                            .remove(&simple_index_entry(map.key.storage_id, &key_bytes, id))?;
                    }
                    if map.value.indexed {
                        self.kv.remove(&map_value_index_entry(
                            map.value.storage_id,
                            &value_bytes,
                            id,
                            &key_bytes,
                        ))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes every index entry for a complex field's current content.
    pub(crate) fn add_complex_index_entries(&mut self, id: ObjId, field: &Field) -> DbResult<()> {
        match field {
            Field::Simple(_) | Field::Counter(_) => {}
            Field::Set(set) => {
                if set.element.indexed {
                    let elements = self.set_raw_elements(id, set.storage_id)?;
                    for bytes in elements {
                        self.kv
                            .put(&simple_index_entry(set.element.storage_id, &bytes, id), &[])?;
                    }
                }
            }
            Field::List(list) => {
                if list.element.indexed {
                    let entries = self.list_raw_entries(id, list.storage_id)?;
                    for (position, bytes) in entries {
                        self.kv.put(
                            &list_index_entry(list.element.storage_id, &bytes, id, position),
                            &[],
                        )?;
                    }
                }
            }
            Field::Map(map) => {
                let entries = self.map_raw_entries(id, map.storage_id)?;
                for (key_bytes, value_bytes) in entries {
                    if map.key.indexed {
                        self.kv
                            .put(&simple_index_entry(map.key.storage_id, &key_bytes, id), &[])?;
                    }
                    if map.value.indexed {
                        self.kv.put(
                            &map_value_index_entry(
                                map.value.storage_id,
                                &value_bytes,
                                id,
                                &key_bytes,
                            ),
                            &[],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Opens a live view of a set field, optionally migrating the object
    /// first.
    pub fn set_view(
        &mut self,
        id: ObjId,
        storage_id: u32,
        update_version: bool,
    ) -> DbResult<SetView<'_>> {
        self.check_open()?;
        if update_version {
            self.update_schema_version(id)?;
        }
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        ot.set_field(storage_id)?;
        Ok(SetView {
            tx: self,
            id,
            storage_id,
        })
    }

    /// Opens a live view of a list field, optionally migrating the object
    /// first.
    pub fn list_view(
        &mut self,
        id: ObjId,
        storage_id: u32,
        update_version: bool,
    ) -> DbResult<ListView<'_>> {
        self.check_open()?;
        if update_version {
            self.update_schema_version(id)?;
        }
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        ot.list_field(storage_id)?;
        Ok(ListView {
            tx: self,
            id,
            storage_id,
        })
    }

    /// Opens a live view of a map field, optionally migrating the object
    /// first.
    pub fn map_view(
        &mut self,
        id: ObjId,
        storage_id: u32,
        update_version: bool,
    ) -> DbResult<MapView<'_>> {
        self.check_open()?;
        if update_version {
            self.update_schema_version(id)?;
        }
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        ot.map_field(storage_id)?;
        Ok(MapView {
            tx: self,
            id,
            storage_id,
        })
    }
}

/// A live, mutating view of one object's set field. All operations read and
/// write through the owning transaction; nothing is cached.
pub struct SetView<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    storage_id: u32,
}

impl SetView<'_> {
    /// Adds an element; returns `false` if it was already present.
    pub fn add(&mut self, element: Value) -> DbResult<bool> {
        self.tx.set_add(self.id, self.storage_id, element)
    }

    /// Removes an element; returns `false` if it was not present.
    pub fn remove(&mut self, element: &Value) -> DbResult<bool> {
        self.tx.set_remove(self.id, self.storage_id, element)
    }

    /// Whether the set contains the element.
    pub fn contains(&self, element: &Value) -> DbResult<bool> {
        self.tx.set_contains(self.id, self.storage_id, element)
    }

    /// Removes all elements.
    pub fn clear(&mut self) -> DbResult<()> {
        self.tx.set_clear(self.id, self.storage_id)
    }

    /// Elements in encoded order.
    pub fn elements(&self) -> DbResult<Vec<Value>> {
        self.tx.set_elements(self.id, self.storage_id)
    }

    /// Number of elements.
    pub fn len(&self) -> DbResult<usize> {
        Ok(self.tx.set_raw_elements(self.id, self.storage_id)?.len())
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// A live, mutating view of one object's list field.
pub struct ListView<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    storage_id: u32,
}

impl ListView<'_> {
    /// Appends an element, returning its position.
    pub fn push(&mut self, element: Value) -> DbResult<u64> {
        self.tx.list_push(self.id, self.storage_id, element)
    }

    /// Reads the element at `index`.
    pub fn get(&self, index: u64) -> DbResult<Value> {
        self.tx.list_get(self.id, self.storage_id, index)
    }

    /// Replaces the element at `index`, returning the old element.
    pub fn set(&mut self, index: u64, element: Value) -> DbResult<Value> {
        self.tx.list_set(self.id, self.storage_id, index, element)
    }

    /// Removes the element at `index`, returning it; later elements shift
    /// down.
    pub fn remove(&mut self, index: u64) -> DbResult<Value> {
        self.tx.list_remove(self.id, self.storage_id, index)
    }

    /// Removes all elements.
    pub fn clear(&mut self) -> DbResult<()> {
        self.tx.list_clear(self.id, self.storage_id)
    }

    /// Elements in list order.
    pub fn elements(&self) -> DbResult<Vec<Value>> {
        self.tx.list_elements(self.id, self.storage_id)
    }

    /// Number of elements.
    pub fn len(&self) -> DbResult<u64> {
        self.tx.list_len(self.id, self.storage_id)
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// A live, mutating view of one object's map field.
pub struct MapView<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    storage_id: u32,
}

impl MapView<'_> {
    /// Inserts or overwrites an entry, returning the previous value.
    pub fn put(&mut self, key: Value, value: Value) -> DbResult<Option<Value>> {
        self.tx.map_put(self.id, self.storage_id, key, value)
    }

    /// Reads the value under `key`.
    pub fn get(&self, key: &Value) -> DbResult<Option<Value>> {
        self.tx.map_get(self.id, self.storage_id, key)
    }

    /// Removes the entry under `key`, returning its value.
    pub fn remove(&mut self, key: &Value) -> DbResult<Option<Value>> {
        self.tx.map_remove(self.id, self.storage_id, key)
    }

    /// Removes all entries.
    pub fn clear(&mut self) -> DbResult<()> {
        self.tx.map_clear(self.id, self.storage_id)
    }

    /// Entries in key order.
    pub fn entries(&self) -> DbResult<Vec<(Value, Value)>> {
        self.tx.map_entries(self.id, self.storage_id)
    }

    /// Keys in key order.
    pub fn keys(&self) -> DbResult<Vec<Value>> {
        self.tx.map_keys(self.id, self.storage_id)
    }

    /// Number of entries.
    pub fn len(&self) -> DbResult<usize> {
        Ok(self.tx.map_raw_entries(self.id, self.storage_id)?.len())
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }
}
