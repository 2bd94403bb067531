//! Schema-version migration.
//!
//! Objects migrate forward lazily: any write (and any read that asks for it)
//! first brings the object to the transaction's schema version. Migration is
//! a pure storage transform followed by listener notification; it never
//! invents data, it only preserves compatible fields, reverts incompatible
//! ones to defaults, and keeps every index entry in agreement with what is
//! stored.

use crate::error::DbResult;
use crate::keys::{field_key, field_prefix, map_value_index_entry, simple_index_entry};
use crate::listener::{OldFieldValue, OldFieldValues};
use crate::objinfo::ObjInfo;
use crate::schema::{Field, SimpleField};
use crate::tx::Transaction;
use objdb_encoding::ObjId;
use objdb_kv::key_after_prefix;
use std::collections::BTreeMap;

impl Transaction {
    /// Returns the schema version the object's data is currently stored
    /// under.
    pub fn get_schema_version(&self, id: ObjId) -> DbResult<u32> {
        self.check_open()?;
        Ok(self.obj_info(id)?.version)
    }

    /// Migrates the object to the transaction's schema version, if it is not
    /// there already. Returns whether a migration happened.
    pub fn update_schema_version(&mut self, id: ObjId) -> DbResult<bool> {
        self.check_open()?;
        let info = self.obj_info(id)?;
        if info.version == self.version {
            return Ok(false);
        }
        self.check_writable()?;
        self.migrate_object(id, &info)?;
        Ok(true)
    }

    fn migrate_object(&mut self, id: ObjId, info: &ObjInfo) -> DbResult<()> {
        let old_version = info.version;
        let new_version = self.version;
        tracing::debug!(%id, old_version, new_version, "migrating object");
        let old_type = self.stored_obj_type(id, old_version)?;
        let new_type = self.current_obj_type(id)?;

        let mut old_values: OldFieldValues = BTreeMap::new();
        // Incompatible or dropped complex content survives until listeners
        // have seen the snapshot, then gets removed.
        let mut cleanups: Vec<Field> = Vec::new();

        // Counter fields. An absent counter reads as zero; a counter that is
        // no longer a counter loses its stored bytes (they are not a valid
        // simple-field encoding).
        let old_counters: Vec<u32> = old_type.counter_fields().map(|c| c.storage_id).collect();
        for fid in old_counters {
            let key = field_key(id, fid);
            let stored = self.kv.get(&key)?;
            let value = match &stored {
                Some(bytes) => self.kv.decode_counter(bytes)?,
                None => 0,
            };
            old_values.insert(fid, OldFieldValue::Counter(value));
            if new_type.counter_field(fid).is_err() && stored.is_some() {
                self.kv.remove(&key)?;
            }
        }

        // Simple fields.
        let old_simple: BTreeMap<u32, SimpleField> = old_type
            .simple_fields()
            .map(|f| (f.storage_id, f.clone()))
            .collect();
        let new_simple: BTreeMap<u32, SimpleField> = new_type
            .simple_fields()
            .map(|f| (f.storage_id, f.clone()))
            .collect();
        for (&fid, of) in &old_simple {
            let key = field_key(id, fid);
            let stored = self.kv.get(&key)?;
            let old_bytes = stored
                .clone()
                .unwrap_or_else(|| of.value_type.default_bytes());
            old_values.insert(fid, OldFieldValue::Simple(of.value_type.decode_all(&old_bytes)?));
            match new_simple.get(&fid) {
                // Compatible: the stored bytes carry over, only an indexing
                // flip needs work. When both sides are indexed the entry is
                // the same KV pair and stays untouched.
                Some(nf) if nf.value_type.is_compatible(of.value_type) => {
                    match (of.indexed, nf.indexed) {
                        (true, false) => {
                            self.kv.remove(&simple_index_entry(fid, &old_bytes, id))?;
                        }
                        (false, true) => {
                            self.kv.put(&simple_index_entry(fid, &old_bytes, id), &[])?;
                        }
                        _ => {}
                    }
                }
                // Incompatible: the value reverts to the new type's default.
                Some(nf) => {
                    if stored.is_some() {
                        self.kv.remove(&key)?;
                    }
                    if of.indexed {
                        self.kv.remove(&simple_index_entry(fid, &old_bytes, id))?;
                    }
                    if nf.indexed {
                        self.kv
                            .put(&simple_index_entry(fid, &nf.value_type.default_bytes(), id), &[])?;
                    }
                }
                // Dropped.
                None => {
                    if stored.is_some() {
                        self.kv.remove(&key)?;
                    }
                    if of.indexed {
                        self.kv.remove(&simple_index_entry(fid, &old_bytes, id))?;
                    }
                }
            }
        }
        for (&fid, nf) in &new_simple {
            if old_simple.contains_key(&fid) {
                continue;
            }
            // A brand-new indexed field holds its default, which still needs
            // an index entry.
            if nf.indexed {
                self.kv
                    .put(&simple_index_entry(fid, &nf.value_type.default_bytes(), id), &[])?;
            }
        }

        // Complex fields.
        let old_complex: BTreeMap<u32, Field> = old_type
            .complex_fields()
            .map(|f| (f.storage_id(), f.clone()))
            .collect();
        let new_complex: BTreeMap<u32, Field> = new_type
            .complex_fields()
            .map(|f| (f.storage_id(), f.clone()))
            .collect();
        for (fid, ofield) in &old_complex {
            old_values.insert(*fid, self.snapshot_complex(id, ofield)?);
            match new_complex.get(fid) {
                Some(nfield) if nfield.is_compatible_with(ofield) => {
                    self.reindex_complex(id, ofield, nfield)?;
                }
                _ => cleanups.push(ofield.clone()),
            }
        }

        ObjInfo {
            version: new_version,
            delete_notified: info.delete_notified,
        }
        .write(self.kv_mut(), id)?;

        let listeners = self.version_listeners.clone();
        let mut listener_result = Ok(());
        for listener in &listeners {
            if let Err(err) =
                listener.on_version_change(self, id, old_version, new_version, &old_values)
            {
                listener_result = Err(err);
                break;
            }
        }
        // Cleanups run even when a listener failed; the listener's error
        // still wins.
        let mut cleanup_result = Ok(());
        for field in &cleanups {
            if let Err(err) = self.remove_complex_content(id, field) {
                cleanup_result = Err(err);
                break;
            }
        }
        listener_result?;
        cleanup_result
    }

    fn snapshot_complex(&self, id: ObjId, field: &Field) -> DbResult<OldFieldValue> {
        Ok(match field {
            Field::Set(set) => {
                let raw = self.set_raw_elements(id, set.storage_id)?;
                let mut elements = Vec::with_capacity(raw.len());
                for bytes in raw {
                    elements.push(set.element.value_type.decode_all(&bytes)?);
                }
                OldFieldValue::Set(elements)
            }
            Field::List(list) => {
                let raw = self.list_raw_entries(id, list.storage_id)?;
                let mut elements = Vec::with_capacity(raw.len());
                for (_, bytes) in raw {
                    elements.push(list.element.value_type.decode_all(&bytes)?);
                }
                OldFieldValue::List(elements)
            }
            Field::Map(map) => {
                let raw = self.map_raw_entries(id, map.storage_id)?;
                let mut entries = Vec::with_capacity(raw.len());
                for (key_bytes, value_bytes) in raw {
                    entries.push((
                        map.key.value_type.decode_all(&key_bytes)?,
                        map.value.value_type.decode_all(&value_bytes)?,
                    ));
                }
                OldFieldValue::Map(entries)
            }
            Field::Simple(f) => {
                OldFieldValue::Simple(f.value_type.decode_all(
                    &self
                        .kv
                        .get(&field_key(id, f.storage_id))?
                        .unwrap_or_else(|| f.value_type.default_bytes()),
                )?)
            }
            Field::Counter(c) => OldFieldValue::Counter(
                match self.kv.get(&field_key(id, c.storage_id))? {
                    Some(bytes) => self.kv.decode_counter(&bytes)?,
                    None => 0,
                },
            ),
        })
    }

    /// Moves a compatible complex field's sub-field index entries where the
    /// new version indexes differently (or renumbers a sub-field).
    fn reindex_complex(&mut self, id: ObjId, old: &Field, new: &Field) -> DbResult<()> {
        match (old, new) {
            (Field::Set(os), Field::Set(ns)) => {
                if os.element.indexed != ns.element.indexed
                    || os.element.storage_id != ns.element.storage_id
                {
                    let elements = self.set_raw_elements(id, os.storage_id)?;
                    for bytes in &elements {
                        if os.element.indexed {
                            self.kv
                                .remove(&simple_index_entry(os.element.storage_id, bytes, id))?;
                        }
                        if ns.element.indexed {
                            self.kv
                                .put(&simple_index_entry(ns.element.storage_id, bytes, id), &[])?;
                        }
                    }
                }
            }
            (Field::List(ol), Field::List(nl)) => {
                if ol.element.indexed != nl.element.indexed
                    || ol.element.storage_id != nl.element.storage_id
                {
                    let entries = self.list_raw_entries(id, ol.storage_id)?;
                    for (position, bytes) in &entries {
                        if ol.element.indexed {
                            self.kv.remove(&crate::keys::list_index_entry(
                                ol.element.storage_id,
                                bytes,
                                id,
                                *position,
                            ))?;
                        }
                        if nl.element.indexed {
                            self.kv.put(
                                &crate::keys::list_index_entry(
                                    nl.element.storage_id,
                                    bytes,
                                    id,
                                    *position,
                                ),
                                &[],
                            )?;
                        }
                    }
                }
            }
            (Field::Map(om), Field::Map(nm)) => {
                let key_changed = om.key.indexed != nm.key.indexed
                    || om.key.storage_id != nm.key.storage_id;
                let value_changed = om.value.indexed != nm.value.indexed
                    || om.value.storage_id != nm.value.storage_id;
                if key_changed || value_changed {
                    let entries = self.map_raw_entries(id, om.storage_id)?;
                    for (key_bytes, value_bytes) in &entries {
                        if key_changed {
                            if om.key.indexed {
                                self.kv
                                    .remove(&simple_index_entry(om.key.storage_id, key_bytes, id))?;
                            }
                            if nm.key.indexed {
                                self.kv
                                    .put(&simple_index_entry(nm.key.storage_id, key_bytes, id), &[])?;
                            }
                        }
                        if value_changed {
                            if om.value.indexed {
                                self.kv.remove(&map_value_index_entry(
                                    om.value.storage_id,
                                    value_bytes,
                                    id,
                                    key_bytes,
                                ))?;
                            }
                            if nm.value.indexed {
                                self.kv.put(
                                    &map_value_index_entry(
                                        nm.value.storage_id,
                                        value_bytes,
                                        id,
                                        key_bytes,
                                    ),
                                    &[],
                                )?;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Removes a complex field's index entries and stored content.
    pub(crate) fn remove_complex_content(&mut self, id: ObjId, field: &Field) -> DbResult<()> {
        self.remove_complex_index_entries(id, field)?;
        let prefix = field_prefix(id, field.storage_id());
        self.kv
            .remove_range(&prefix, key_after_prefix(&prefix).as_deref())?;
        Ok(())
    }
}
