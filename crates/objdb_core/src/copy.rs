//! Copying objects between transactions.
//!
//! A copy is a raw transplant of the source object's key range, re-based
//! onto the target ID, with the destination's index entries rebuilt from the
//! copied content. The object keeps its stored schema version; the
//! destination's catalog must therefore know that version. No create or
//! change listeners fire on the destination.

use crate::error::{DbError, DbResult};
use crate::keys::{field_key, obj_key, simple_index_entry};
use crate::objinfo::ObjInfo;
use crate::schema::{Field, ObjType, RefContainer, SimpleField};
use crate::tx::Transaction;
use objdb_encoding::{ObjId, OBJ_ID_LEN};
use objdb_kv::key_after_prefix;
use std::collections::BTreeSet;

/// Tracks progress across related copy calls so shared subtrees are copied
/// once and reference cycles terminate.
#[derive(Debug, Default)]
pub struct CopyState {
    copied: BTreeSet<ObjId>,
    traversed: BTreeSet<(ObjId, Vec<u32>)>,
}

impl CopyState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the object has already been copied under this state.
    #[must_use]
    pub fn is_copied(&self, id: ObjId) -> bool {
        self.copied.contains(&id)
    }

    fn mark_copied(&mut self, id: ObjId) -> bool {
        self.copied.insert(id)
    }

    fn mark_traversed(&mut self, id: ObjId, path: Vec<u32>) -> bool {
        self.traversed.insert((id, path))
    }
}

impl Transaction {
    /// Copies one object into `dest` under the target ID, replacing whatever
    /// the destination stored there. Source and target must be of the same
    /// type. Returns `false` if the state says the object was already
    /// copied.
    ///
    /// # Errors
    ///
    /// Fails with [`DbError::DeletedObject`] if the source does not exist,
    /// [`DbError::CopyTypeMismatch`] if the IDs have different types, and
    /// [`DbError::UnknownVersion`] if the destination catalog does not know
    /// the object's stored schema version.
    pub fn copy_to(
        &self,
        dest: &mut Transaction,
        source: ObjId,
        target: ObjId,
        state: &mut CopyState,
    ) -> DbResult<bool> {
        self.check_open()?;
        dest.check_open()?;
        dest.check_writable()?;
        let source_type = source.storage_id()?;
        let target_type = target.storage_id()?;
        if source_type != target_type {
            return Err(DbError::CopyTypeMismatch {
                source_type,
                destination_type: target_type,
            });
        }
        if !state.mark_copied(source) {
            return Ok(false);
        }
        let info = self.obj_info(source)?;
        let ot = self.stored_obj_type(source, info.version)?;
        dest.schema.version(info.version)?.obj_type_of(target)?;

        // Silently replace any existing destination object: wipe its index
        // entries and data first, with no listeners and no cascade.
        if let Some(existing) = ObjInfo::read(dest.kv(), target)? {
            let existing_type = dest.stored_obj_type(target, existing.version)?;
            dest.remove_object_data(target, &existing_type)?;
        }

        let start = obj_key(source);
        let entries = self.kv.scan(&start, key_after_prefix(&start).as_deref())?;
        for (key, value) in entries {
            let mut rebased = target.to_vec();
            rebased.extend_from_slice(&key[OBJ_ID_LEN..]);
            dest.kv.put(&rebased, &value)?;
        }
        dest.add_object_index_entries(target, &ot)?;
        Ok(true)
    }

    /// Copies the object and everything reachable from it through the given
    /// forward reference paths, preserving IDs. Shared subtrees are copied
    /// once; cycles terminate. Returns the number of objects copied.
    pub fn copy_tree(
        &self,
        dest: &mut Transaction,
        root: ObjId,
        paths: &[Vec<u32>],
        state: &mut CopyState,
    ) -> DbResult<u64> {
        self.check_open()?;
        let mut copied = 0;
        if self.copy_to(dest, root, root, state)? {
            copied += 1;
        }
        for path in paths {
            self.copy_path(dest, root, path, state, &mut copied)?;
        }
        Ok(copied)
    }

    fn copy_path(
        &self,
        dest: &mut Transaction,
        id: ObjId,
        path: &[u32],
        state: &mut CopyState,
        copied: &mut u64,
    ) -> DbResult<()> {
        let Some((&hop, rest)) = path.split_first() else {
            return Ok(());
        };
        if !state.mark_traversed(id, path.to_vec()) {
            return Ok(());
        }
        for target in self.reference_targets(id, hop)? {
            // Dangling references (Nothing-policy leftovers) are skipped.
            if ObjInfo::read(self.kv(), target)?.is_none() {
                continue;
            }
            if self.copy_to(dest, target, target, state)? {
                *copied += 1;
            }
            self.copy_path(dest, target, rest, state, copied)?;
        }
        Ok(())
    }

    /// Returns the distinct objects one reference field of `id` currently
    /// refers to (ignoring nulls). A field the stored version does not
    /// define yields the empty set.
    pub(crate) fn reference_targets(&self, id: ObjId, storage_id: u32) -> DbResult<BTreeSet<ObjId>> {
        let info = self.obj_info(id)?;
        let ot = self.stored_obj_type(id, info.version)?;
        let Some((field, container)) = ot.locate_simple(storage_id) else {
            return Ok(BTreeSet::new());
        };
        if !field.is_reference() {
            return Err(DbError::UnknownField {
                storage_id,
                type_name: ot.name.clone(),
                reason: "not a reference field",
            });
        }
        let value_type = field.value_type;
        let mut targets = BTreeSet::new();
        match container {
            RefContainer::Top => {
                if let Some(bytes) = self.kv.get(&field_key(id, storage_id))? {
                    if let Some(target) = value_type.decode_all(&bytes)?.as_reference() {
                        targets.insert(target);
                    }
                }
            }
            RefContainer::SetElement(set_fid) => {
                for bytes in self.set_raw_elements(id, set_fid)? {
                    if let Some(target) = value_type.decode_all(&bytes)?.as_reference() {
                        targets.insert(target);
                    }
                }
            }
            RefContainer::ListElement(list_fid) => {
                for (_, bytes) in self.list_raw_entries(id, list_fid)? {
                    if let Some(target) = value_type.decode_all(&bytes)?.as_reference() {
                        targets.insert(target);
                    }
                }
            }
            RefContainer::MapKey(map_fid) => {
                for (key_bytes, _) in self.map_raw_entries(id, map_fid)? {
                    if let Some(target) = value_type.decode_all(&key_bytes)?.as_reference() {
                        targets.insert(target);
                    }
                }
            }
            RefContainer::MapValue(map_fid) => {
                for (_, value_bytes) in self.map_raw_entries(id, map_fid)? {
                    if let Some(target) = value_type.decode_all(&value_bytes)?.as_reference() {
                        targets.insert(target);
                    }
                }
            }
        }
        Ok(targets)
    }

    /// Writes every index entry implied by the object's stored content.
    pub(crate) fn add_object_index_entries(&mut self, id: ObjId, ot: &ObjType) -> DbResult<()> {
        let indexed: Vec<SimpleField> = ot
            .simple_fields()
            .filter(|f| f.indexed)
            .cloned()
            .collect();
        for field in indexed {
            let stored = self.kv.get(&field_key(id, field.storage_id))?;
            let bytes = stored.unwrap_or_else(|| field.value_type.default_bytes());
            self.kv
                .put(&simple_index_entry(field.storage_id, &bytes, id), &[])?;
        }
        let complex: Vec<Field> = ot.complex_fields().cloned().collect();
        for field in complex {
            self.add_complex_index_entries(id, &field)?;
        }
        Ok(())
    }
}
