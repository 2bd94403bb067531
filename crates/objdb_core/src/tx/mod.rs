//! Transactions over the object layer.
//!
//! A [`Transaction`] wraps exactly one [`KvTransaction`] and interprets its
//! keyspace as objects, fields, and index entries. All mutation goes through
//! `&mut self`, which is what lets listeners receive the transaction mutably
//! and perform re-entrant reads and writes without any locking.

mod fields;
mod migrate;
mod notify;

pub use fields::{ListView, MapView, SetView};

use crate::error::{DbError, DbResult};
use crate::keys::{field_key, obj_key, simple_index_entry};
use crate::listener::{
    Callback, CreateListener, DeleteListener, FieldChangeListener, VersionChangeListener,
};
use crate::objinfo::ObjInfo;
use crate::schema::{
    DeleteAction, Field, ObjType, RefContainer, RefFieldLoc, Schema, SchemaVersion,
};
use notify::{FieldMonitor, PendingChange};
use objdb_encoding::{ObjId, Value, OBJ_ID_LEN};
use objdb_kv::{key_after_prefix, KvStore, KvTransaction};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Upper bound on random-ID generation attempts before giving up.
const MAX_ID_ATTEMPTS: usize = 1000;

/// A transaction over the object layer.
///
/// Created against a [`Schema`] catalog and one version number from it; all
/// reads and writes interpret data through that version, migrating objects
/// forward on demand. The transaction becomes *stale* after [`commit`] or
/// [`rollback`]; every later operation fails with
/// [`DbError::StaleTransaction`].
///
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub struct Transaction {
    pub(crate) kv: Box<dyn KvTransaction>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) tx_schema: Arc<SchemaVersion>,
    pub(crate) version: u32,
    stale: bool,
    read_only: bool,
    rollback_only: bool,
    pub(crate) create_listeners: Vec<Arc<dyn CreateListener>>,
    pub(crate) delete_listeners: Vec<Arc<dyn DeleteListener>>,
    pub(crate) version_listeners: Vec<Arc<dyn VersionChangeListener>>,
    pub(crate) monitors: Vec<FieldMonitor>,
    callbacks: Vec<Arc<dyn Callback>>,
    pub(crate) pending: Option<Vec<PendingChange>>,
    max_id_attempts: usize,
}

impl Transaction {
    /// Opens a transaction against `store` at the given schema version.
    ///
    /// # Errors
    ///
    /// Fails with [`DbError::UnknownVersion`] if the catalog does not
    /// contain `version`.
    pub fn open(store: &dyn KvStore, schema: Arc<Schema>, version: u32) -> DbResult<Self> {
        Self::with_kv(store.transaction(), schema, version)
    }

    /// Wraps an already-open KV transaction.
    pub fn with_kv(
        kv: Box<dyn KvTransaction>,
        schema: Arc<Schema>,
        version: u32,
    ) -> DbResult<Self> {
        let tx_schema = Arc::clone(schema.version(version)?);
        Ok(Self {
            kv,
            schema,
            tx_schema,
            version,
            stale: false,
            read_only: false,
            rollback_only: false,
            create_listeners: Vec::new(),
            delete_listeners: Vec::new(),
            version_listeners: Vec::new(),
            monitors: Vec::new(),
            callbacks: Vec::new(),
            pending: None,
            max_id_attempts: MAX_ID_ATTEMPTS,
        })
    }

    /// Returns the schema catalog.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the schema version this transaction operates at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Marks the transaction read-only. Cannot be undone.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Whether the transaction is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Marks the transaction rollback-only: [`commit`] will roll back
    /// instead. Cannot be undone.
    ///
    /// [`commit`]: Transaction::commit
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Whether the transaction is marked rollback-only.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub(crate) fn check_open(&self) -> DbResult<()> {
        if self.stale {
            Err(DbError::StaleTransaction)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_writable(&self) -> DbResult<()> {
        if self.read_only {
            Err(DbError::ReadOnlyTransaction)
        } else {
            Ok(())
        }
    }

    pub(crate) fn kv(&self) -> &dyn KvTransaction {
        self.kv.as_ref()
    }

    pub(crate) fn kv_mut(&mut self) -> &mut dyn KvTransaction {
        self.kv.as_mut()
    }

    /// Resolves an object's type in the transaction's schema version.
    pub(crate) fn current_obj_type(&self, id: ObjId) -> DbResult<Arc<ObjType>> {
        Ok(Arc::clone(self.tx_schema.obj_type_of(id)?))
    }

    /// Resolves an object's type in the schema version its data is stored
    /// under. A stored version the catalog does not know is database
    /// corruption, not a caller error.
    pub(crate) fn stored_obj_type(&self, id: ObjId, version: u32) -> DbResult<Arc<ObjType>> {
        let sv = self.schema.version(version).map_err(|_| {
            DbError::inconsistent(format!("object {id} stored at unknown schema version {version}"))
        })?;
        let ot = sv.obj_type_of(id).map_err(|_| {
            DbError::inconsistent(format!("object {id} has no type in schema version {version}"))
        })?;
        Ok(Arc::clone(ot))
    }

    /// Reads an object's meta-data record, failing if the object does not
    /// exist.
    pub(crate) fn obj_info(&self, id: ObjId) -> DbResult<ObjInfo> {
        ObjInfo::read(self.kv(), id)?.ok_or(DbError::DeletedObject { id })
    }

    // ------------------------------------------------------------------
    // Object lifecycle
    // ------------------------------------------------------------------

    /// Creates the object with the given ID, if it does not already exist.
    ///
    /// Writes the meta-data record at the transaction's schema version,
    /// zero-initializes counter fields, writes the default-value index entry
    /// for every indexed simple field, and then notifies create listeners.
    ///
    /// Returns `false` (and does nothing) if the object already exists.
    pub fn create(&mut self, id: ObjId) -> DbResult<bool> {
        self.check_open()?;
        self.check_writable()?;
        let ot = self.current_obj_type(id)?;
        if ObjInfo::read(self.kv(), id)?.is_some() {
            return Ok(false);
        }
        self.initialize_object(id, &ot)?;
        for listener in self.create_listeners.clone() {
            listener.on_create(self, id)?;
        }
        Ok(true)
    }

    /// Creates a new object of the given type under a freshly generated
    /// random ID.
    ///
    /// # Errors
    ///
    /// Fails with [`DbError::IdGenerationFailed`] if every generated ID
    /// collides with an existing object.
    pub fn create_of_type(&mut self, storage_id: u32) -> DbResult<ObjId> {
        self.check_open()?;
        self.check_writable()?;
        let ot = Arc::clone(self.tx_schema.obj_type(storage_id)?);
        for _ in 0..self.max_id_attempts {
            let id = ObjId::random(storage_id)?;
            if ObjInfo::read(self.kv(), id)?.is_some() {
                continue;
            }
            self.initialize_object(id, &ot)?;
            for listener in self.create_listeners.clone() {
                listener.on_create(self, id)?;
            }
            return Ok(id);
        }
        Err(DbError::IdGenerationFailed {
            storage_id,
            attempts: self.max_id_attempts,
        })
    }

    fn initialize_object(&mut self, id: ObjId, ot: &ObjType) -> DbResult<()> {
        ObjInfo::new(self.version).write(self.kv_mut(), id)?;
        let counters: Vec<u32> = ot.counter_fields().map(|c| c.storage_id).collect();
        for fid in counters {
            let zero = self.kv.encode_counter(0);
            self.kv.put(&field_key(id, fid), &zero)?;
        }
        // An indexed field with no stored value still has exactly one index
        // entry, under its default value.
        let indexed: Vec<(u32, Vec<u8>)> = ot
            .simple_fields()
            .filter(|f| f.indexed)
            .map(|f| (f.storage_id, f.value_type.default_bytes()))
            .collect();
        for (fid, default_bytes) in indexed {
            self.kv.put(&simple_index_entry(fid, &default_bytes, id), &[])?;
        }
        Ok(())
    }

    /// Whether the object exists.
    pub fn exists(&self, id: ObjId) -> DbResult<bool> {
        self.check_open()?;
        Ok(ObjInfo::read(self.kv(), id)?.is_some())
    }

    /// Deletes the object, cascading per the schema's on-delete policies.
    ///
    /// Delete listeners are notified at most once per object before its data
    /// is removed; a listener may itself delete the object (the outer delete
    /// then finds it gone and stops) or re-create it (listeners run again).
    /// Exception-policy referrers outside the cascade reject the whole
    /// delete with [`DbError::ReferencedObject`].
    ///
    /// Returns `true` if any object was deleted.
    ///
    /// The object's data is interpreted at its stored schema version, so an
    /// object whose type no longer exists in the transaction's version is
    /// still deletable.
    pub fn delete(&mut self, id: ObjId) -> DbResult<bool> {
        self.check_open()?;
        self.check_writable()?;
        self.with_notification_scope(|tx| tx.delete_cascade(id))
    }

    fn delete_cascade(&mut self, root: ObjId) -> DbResult<bool> {
        let mut queue = VecDeque::from([root]);
        let mut enqueued = BTreeSet::from([root]);
        let mut any = false;
        while let Some(id) = queue.pop_front() {
            if self.delete_one(id, &mut queue, &mut enqueued)? {
                any = true;
            }
        }
        Ok(any)
    }

    fn delete_one(
        &mut self,
        id: ObjId,
        queue: &mut VecDeque<ObjId>,
        enqueued: &mut BTreeSet<ObjId>,
    ) -> DbResult<bool> {
        let ref_fields = self.all_reference_fields();
        let target = BTreeSet::from([id]);

        // Notify delete listeners exactly once per object generation. A
        // listener may delete or re-create the object; both are observed by
        // re-reading the meta-data record.
        let mut notified = false;
        let info = loop {
            let Some(info) = ObjInfo::read(self.kv(), id)? else {
                return Ok(notified);
            };
            for loc in &ref_fields {
                if loc.field.on_delete != DeleteAction::Exception {
                    continue;
                }
                let referrers = self.find_referrers(&target, loc.field.storage_id)?;
                if let Some(&referrer) = referrers.iter().find(|r| !enqueued.contains(r)) {
                    return Err(DbError::ReferencedObject {
                        id,
                        referrer,
                        storage_id: loc.field.storage_id,
                    });
                }
            }
            if info.delete_notified {
                break info;
            }
            ObjInfo {
                delete_notified: true,
                ..info
            }
            .write(self.kv_mut(), id)?;
            notified = true;
            for listener in self.delete_listeners.clone() {
                listener.on_delete(self, id)?;
            }
        };

        // Physical removal interprets the data at its stored version: index
        // entries first, then the object's whole key range.
        tracing::trace!(%id, version = info.version, "removing object data");
        let ot = self.stored_obj_type(id, info.version)?;
        self.remove_object_data(id, &ot)?;

        // Fix up or cascade to whoever still refers to the deleted object.
        for loc in &ref_fields {
            match loc.field.on_delete {
                DeleteAction::Exception | DeleteAction::Nothing => {}
                DeleteAction::Unreference => {
                    let referrers = self.find_referrers(&target, loc.field.storage_id)?;
                    for referrer in referrers {
                        self.unreference(referrer, loc, id)?;
                    }
                }
                DeleteAction::Delete => {
                    let referrers = self.find_referrers(&target, loc.field.storage_id)?;
                    for referrer in referrers {
                        if enqueued.insert(referrer) {
                            queue.push_back(referrer);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    /// Collects every reference field across all schema versions, preferring
    /// the transaction version's definition where storage IDs collide.
    /// Referrers still stored at old versions are found through the index
    /// entries those versions maintain.
    fn all_reference_fields(&self) -> Vec<RefFieldLoc> {
        let mut by_fid: BTreeMap<u32, RefFieldLoc> = BTreeMap::new();
        for sv in self.schema.versions() {
            let is_tx_version = sv.version == self.version;
            for ty in sv.types.values() {
                for loc in ty.reference_fields() {
                    if is_tx_version {
                        by_fid.insert(loc.field.storage_id, loc);
                    } else {
                        by_fid.entry(loc.field.storage_id).or_insert(loc);
                    }
                }
            }
        }
        by_fid.into_values().collect()
    }

    /// Removes all of the object's index entries and its key range.
    pub(crate) fn remove_object_data(&mut self, id: ObjId, ot: &ObjType) -> DbResult<()> {
        let indexed: Vec<_> = ot
            .simple_fields()
            .filter(|f| f.indexed)
            .cloned()
            .collect();
        for field in indexed {
            let stored = self.kv.get(&field_key(id, field.storage_id))?;
            let bytes = stored.unwrap_or_else(|| field.value_type.default_bytes());
            self.kv
                .remove(&simple_index_entry(field.storage_id, &bytes, id))?;
        }
        let complex: Vec<Field> = ot.complex_fields().cloned().collect();
        for field in complex {
            self.remove_complex_index_entries(id, &field)?;
        }
        let start = obj_key(id);
        self.kv.remove_range(&start, key_after_prefix(&start).as_deref())?;
        Ok(())
    }

    /// Removes all instances of a reference to `target` from one field of
    /// `referrer`. The referrer is migrated first; if migration drops the
    /// field there is nothing left to fix.
    fn unreference(&mut self, referrer: ObjId, loc: &RefFieldLoc, target: ObjId) -> DbResult<()> {
        self.update_schema_version(referrer)?;
        let target_value = Value::Reference(Some(target));
        match loc.container {
            RefContainer::Top => {
                if self.has_field(referrer, loc.field.storage_id)? {
                    self.write_simple_field(referrer, loc.field.storage_id, Value::Reference(None))?;
                }
            }
            RefContainer::SetElement(set_fid) => {
                if self.has_field(referrer, set_fid)? {
                    self.set_remove(referrer, set_fid, &target_value)?;
                }
            }
            RefContainer::ListElement(list_fid) => {
                if self.has_field(referrer, list_fid)? {
                    let target_bytes = target_value.encoded()?;
                    loop {
                        let entries = self.list_raw_entries(referrer, list_fid)?;
                        let Some(position) = entries
                            .iter()
                            .find(|(_, bytes)| *bytes == target_bytes)
                            .map(|(position, _)| *position)
                        else {
                            break;
                        };
                        self.list_remove(referrer, list_fid, position)?;
                    }
                }
            }
            RefContainer::MapKey(map_fid) => {
                if self.has_field(referrer, map_fid)? {
                    self.map_remove(referrer, map_fid, &target_value)?;
                }
            }
            RefContainer::MapValue(map_fid) => {
                if self.has_field(referrer, map_fid)? {
                    let entries = self.map_entries(referrer, map_fid)?;
                    for (key, value) in entries {
                        if value == target_value {
                            self.map_remove(referrer, map_fid, &key)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn has_field(&self, id: ObjId, storage_id: u32) -> DbResult<bool> {
        Ok(self
            .tx_schema
            .obj_type_of(id)?
            .fields
            .contains_key(&storage_id))
    }

    /// Lists the IDs of all existing objects of one type, in ID order.
    pub fn ids(&self, storage_id: u32) -> DbResult<Vec<ObjId>> {
        self.check_open()?;
        self.tx_schema.obj_type(storage_id)?;
        let prefix = ObjId::type_prefix(storage_id)?;
        let end = key_after_prefix(&prefix);
        let mut ids = Vec::new();
        let mut lower = prefix;
        while let Some((key, _)) = self.kv.next_entry(&lower, end.as_deref())? {
            let id = key
                .get(..OBJ_ID_LEN)
                .and_then(ObjId::from_slice)
                .ok_or_else(|| DbError::inconsistent("short key in object keyspace"))?;
            if key.len() == OBJ_ID_LEN {
                ids.push(id);
            }
            // Jump past this object's entire key range.
            match key_after_prefix(id.as_bytes()) {
                Some(next) => lower = next,
                None => break,
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Key introspection
    // ------------------------------------------------------------------

    /// Returns the key of the object's meta-data record.
    #[must_use]
    pub fn get_key(&self, id: ObjId) -> Vec<u8> {
        obj_key(id)
    }

    /// Returns the key (or key prefix, for complex fields) of one of the
    /// object's fields. Sub-fields have no key of their own.
    pub fn get_field_key(&self, id: ObjId, storage_id: u32) -> DbResult<Vec<u8>> {
        self.check_open()?;
        let ot = self.current_obj_type(id)?;
        if ot.fields.contains_key(&storage_id) {
            return Ok(field_key(id, storage_id));
        }
        let reason = if ot
            .fields
            .values()
            .any(|f| f.sub_fields().iter().any(|s| s.storage_id == storage_id))
        {
            "sub-fields have no key of their own"
        } else {
            "no such field"
        };
        Err(DbError::UnknownField {
            storage_id,
            type_name: ot.name.clone(),
            reason,
        })
    }

    // ------------------------------------------------------------------
    // Listener and callback registration
    // ------------------------------------------------------------------

    /// Registers a create listener.
    pub fn add_create_listener(&mut self, listener: Arc<dyn CreateListener>) {
        self.create_listeners.push(listener);
    }

    /// Registers a delete listener.
    pub fn add_delete_listener(&mut self, listener: Arc<dyn DeleteListener>) {
        self.delete_listeners.push(listener);
    }

    /// Registers a version-change listener.
    pub fn add_version_change_listener(&mut self, listener: Arc<dyn VersionChangeListener>) {
        self.version_listeners.push(listener);
    }

    /// Registers a field-change listener on the field with the given storage
    /// ID, monitored through `path` (a chain of reference-field storage IDs
    /// walked backward from the changed object; empty to observe it
    /// directly).
    pub fn add_field_change_listener(
        &mut self,
        storage_id: u32,
        path: Vec<u32>,
        listener: Arc<dyn FieldChangeListener>,
    ) {
        self.monitors.push(FieldMonitor {
            storage_id,
            path,
            listener,
        });
    }

    /// Registers a transaction-completion callback. Registering the same
    /// instance twice is a no-op.
    pub fn add_callback(&mut self, callback: Arc<dyn Callback>) {
        if self.callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            return;
        }
        self.callbacks.push(callback);
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Commits the transaction.
    ///
    /// Callback order: `before_commit` (an error rolls back and
    /// propagates), `before_completion` (errors logged and suppressed), the
    /// store commit, `after_commit` (errors propagate), then
    /// `after_completion` (errors logged and suppressed).
    ///
    /// # Errors
    ///
    /// Fails with [`DbError::RollbackOnlyTransaction`] if the transaction
    /// was marked rollback-only; the transaction is rolled back instead.
    pub fn commit(&mut self) -> DbResult<()> {
        self.check_open()?;
        if self.rollback_only {
            self.stale = true;
            if let Err(err) = self.kv.rollback() {
                tracing::error!(error = %err, "rollback of rollback-only transaction failed");
            }
            self.run_after_completion(false);
            return Err(DbError::RollbackOnlyTransaction);
        }
        let callbacks = self.callbacks.clone();
        for callback in &callbacks {
            if let Err(err) = callback.before_commit(self.read_only) {
                self.stale = true;
                if let Err(rb) = self.kv.rollback() {
                    tracing::error!(error = %rb, "rollback after failed before-commit callback failed");
                }
                self.run_after_completion(false);
                return Err(err);
            }
        }
        for callback in &callbacks {
            if let Err(err) = callback.before_completion() {
                tracing::error!(error = %err, "before-completion callback failed");
            }
        }
        self.stale = true;
        if let Err(err) = self.kv.commit() {
            self.run_after_completion(false);
            return Err(err.into());
        }
        let mut result = Ok(());
        for callback in &callbacks {
            if let Err(err) = callback.after_commit() {
                if result.is_ok() {
                    result = Err(err);
                } else {
                    tracing::error!(error = %err, "after-commit callback failed");
                }
            }
        }
        self.run_after_completion(true);
        result
    }

    /// Rolls the transaction back, discarding all writes.
    pub fn rollback(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.stale = true;
        let result = self.kv.rollback();
        self.run_after_completion(false);
        result.map_err(Into::into)
    }

    fn run_after_completion(&self, committed: bool) {
        for callback in &self.callbacks {
            if let Err(err) = callback.after_completion(committed) {
                tracing::error!(error = %err, committed, "after-completion callback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjTypeBuilder, SchemaBuilder, SchemaVersionBuilder};
    use objdb_encoding::ValueType;
    use objdb_kv::MemoryKvStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PERSON: u32 = 100;

    fn schema() -> Arc<Schema> {
        let v1 = SchemaVersionBuilder::new(1)
            .obj_type(
                ObjTypeBuilder::new(PERSON, "person")
                    .simple_field(2, "name", ValueType::String, true)
                    .counter_field(3, "visits"),
            )
            .build()
            .unwrap();
        Arc::new(SchemaBuilder::new().version(v1).build().unwrap())
    }

    fn open(store: &MemoryKvStore) -> Transaction {
        Transaction::open(store, schema(), 1).unwrap()
    }

    #[test]
    fn create_exists_delete() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        let id = tx.create_of_type(PERSON).unwrap();
        assert!(tx.exists(id).unwrap());
        assert!(!tx.create(id).unwrap());
        assert!(tx.delete(id).unwrap());
        assert!(!tx.exists(id).unwrap());
        assert!(!tx.delete(id).unwrap());
    }

    #[test]
    fn delete_leaves_no_keys_behind() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        let id = tx.create_of_type(PERSON).unwrap();
        tx.write_simple_field(id, 2, Value::String("amy".into()))
            .unwrap();
        tx.adjust_counter_field(id, 3, 5).unwrap();
        tx.delete(id).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn unknown_type_rejected() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        assert!(matches!(
            tx.create_of_type(999),
            Err(DbError::UnknownType {
                storage_id: 999,
                ..
            })
        ));
        let id = ObjId::random(999).unwrap();
        assert!(matches!(
            tx.create(id),
            Err(DbError::UnknownType {
                storage_id: 999,
                ..
            })
        ));
    }

    #[test]
    fn delete_works_when_type_dropped_from_current_version() {
        let schema = {
            let v1 = SchemaVersionBuilder::new(1)
                .obj_type(
                    ObjTypeBuilder::new(PERSON, "person")
                        .simple_field(2, "name", ValueType::String, true),
                )
                .build()
                .unwrap();
            let v2 = SchemaVersionBuilder::new(2).build().unwrap();
            Arc::new(SchemaBuilder::new().version(v1).version(v2).build().unwrap())
        };
        let store = MemoryKvStore::new();
        let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
        let id = tx.create_of_type(PERSON).unwrap();
        tx.write_simple_field(id, 2, Value::String("amy".into()))
            .unwrap();
        tx.commit().unwrap();

        // The type exists only in v1; its objects must still be deletable
        // from a v2 transaction, interpreted at their stored version.
        let mut tx = Transaction::open(&store, schema, 2).unwrap();
        assert!(tx.exists(id).unwrap());
        assert!(tx.delete(id).unwrap());
        tx.commit().unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn ids_lists_only_that_type() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        let mut created: Vec<ObjId> = (0..5)
            .map(|_| tx.create_of_type(PERSON).unwrap())
            .collect();
        created.sort();
        // Field content must not be mistaken for object meta-data records.
        tx.write_simple_field(created[0], 2, Value::String("x".into()))
            .unwrap();
        assert_eq!(tx.ids(PERSON).unwrap(), created);
    }

    #[test]
    fn stale_after_commit() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        tx.commit().unwrap();
        assert!(matches!(tx.exists(ObjId::random(PERSON).unwrap()), Err(DbError::StaleTransaction)));
        assert!(matches!(tx.commit(), Err(DbError::StaleTransaction)));
    }

    #[test]
    fn read_only_rejects_mutation() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        tx.set_read_only();
        assert!(matches!(
            tx.create_of_type(PERSON),
            Err(DbError::ReadOnlyTransaction)
        ));
    }

    #[test]
    fn rollback_only_commit_discards_writes() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        tx.create_of_type(PERSON).unwrap();
        tx.set_rollback_only();
        assert!(matches!(
            tx.commit(),
            Err(DbError::RollbackOnlyTransaction)
        ));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn get_field_key_rejects_sub_fields() {
        let schema = {
            let v1 = SchemaVersionBuilder::new(1)
                .obj_type(ObjTypeBuilder::new(PERSON, "person").set_field(
                    10,
                    "tags",
                    crate::schema::sub_field(11, "tag", ValueType::String, false),
                ))
                .build()
                .unwrap();
            Arc::new(SchemaBuilder::new().version(v1).build().unwrap())
        };
        let store = MemoryKvStore::new();
        let mut tx = Transaction::open(&store, schema, 1).unwrap();
        let id = tx.create_of_type(PERSON).unwrap();
        assert!(tx.get_field_key(id, 10).is_ok());
        assert!(matches!(
            tx.get_field_key(id, 11),
            Err(DbError::UnknownField { storage_id: 11, .. })
        ));
    }

    struct CountingCallback {
        before_commit: AtomicUsize,
        after_completion: AtomicUsize,
        committed: AtomicUsize,
    }

    impl CountingCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                before_commit: AtomicUsize::new(0),
                after_completion: AtomicUsize::new(0),
                committed: AtomicUsize::new(0),
            })
        }
    }

    impl Callback for CountingCallback {
        fn before_commit(&self, _read_only: bool) -> DbResult<()> {
            self.before_commit.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn after_completion(&self, committed: bool) -> DbResult<()> {
            self.after_completion.fetch_add(1, Ordering::SeqCst);
            if committed {
                self.committed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn callbacks_fire_in_order_and_deduplicate() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        let cb = CountingCallback::new();
        tx.add_callback(cb.clone());
        tx.add_callback(cb.clone()); // ignored
        tx.commit().unwrap();
        assert_eq!(cb.before_commit.load(Ordering::SeqCst), 1);
        assert_eq!(cb.after_completion.load(Ordering::SeqCst), 1);
        assert_eq!(cb.committed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rollback_runs_after_completion_without_commit() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        let cb = CountingCallback::new();
        tx.add_callback(cb.clone());
        tx.rollback().unwrap();
        assert_eq!(cb.before_commit.load(Ordering::SeqCst), 0);
        assert_eq!(cb.after_completion.load(Ordering::SeqCst), 1);
        assert_eq!(cb.committed.load(Ordering::SeqCst), 0);
    }

    struct FailingCallback;

    impl Callback for FailingCallback {
        fn before_commit(&self, _read_only: bool) -> DbResult<()> {
            Err(DbError::callback("refused"))
        }
    }

    #[test]
    fn failed_before_commit_rolls_back() {
        let store = MemoryKvStore::new();
        let mut tx = open(&store);
        tx.create_of_type(PERSON).unwrap();
        tx.add_callback(Arc::new(FailingCallback));
        assert!(matches!(tx.commit(), Err(DbError::Callback { .. })));
        assert_eq!(store.len(), 0);
    }
}
