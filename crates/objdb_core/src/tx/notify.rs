//! Field-change notification and reference back-tracking.
//!
//! Mutations queue their change records into a pending buffer owned by the
//! outermost mutation on the call stack; only that outermost mutation drains
//! the buffer and invokes listeners. A listener mutating further fields
//! therefore never re-enters dispatch: its changes land in the same buffer
//! and are delivered in a later round of the same drain loop.

use crate::error::DbResult;
use crate::keys::{index_entry_id, index_value_prefix};
use crate::listener::{FieldChange, FieldChangeListener};
use crate::objinfo::ObjInfo;
use crate::tx::Transaction;
use objdb_encoding::{ObjId, Value};
use objdb_kv::key_after_prefix;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A registered field monitor.
#[derive(Clone)]
pub(crate) struct FieldMonitor {
    /// Storage ID of the monitored field.
    pub(crate) storage_id: u32,
    /// Reference path walked backward from the changed object.
    pub(crate) path: Vec<u32>,
    pub(crate) listener: Arc<dyn FieldChangeListener>,
}

/// One queued change awaiting dispatch.
pub(crate) struct PendingChange {
    pub(crate) id: ObjId,
    pub(crate) storage_id: u32,
    pub(crate) change: FieldChange,
}

impl Transaction {
    /// Runs `mutation` against an existing object, delivering any queued
    /// change notifications afterward if this is the outermost mutation.
    pub(crate) fn mutate_and_notify<R>(
        &mut self,
        id: ObjId,
        mutation: impl FnOnce(&mut Self) -> DbResult<R>,
    ) -> DbResult<R> {
        self.check_open()?;
        self.check_writable()?;
        self.obj_info(id)?;
        self.with_notification_scope(mutation)
    }

    /// Runs `work` inside a notification scope: if no scope is active, one
    /// is installed and drained when `work` succeeds. Nested calls just run
    /// their work; the outermost scope delivers everything.
    pub(crate) fn with_notification_scope<R>(
        &mut self,
        work: impl FnOnce(&mut Self) -> DbResult<R>,
    ) -> DbResult<R> {
        if self.pending.is_some() {
            return work(self);
        }
        self.pending = Some(Vec::new());
        match work(self) {
            Ok(value) => {
                self.drain_pending()?;
                Ok(value)
            }
            Err(err) => {
                self.pending = None;
                Err(err)
            }
        }
    }

    /// Queues one change for dispatch at the outermost notification scope.
    pub(crate) fn queue_change(&mut self, id: ObjId, storage_id: u32, change: FieldChange) {
        debug_assert!(self.pending.is_some(), "queue_change outside mutation");
        if let Some(pending) = self.pending.as_mut() {
            pending.push(PendingChange {
                id,
                storage_id,
                change,
            });
        }
    }

    fn drain_pending(&mut self) -> DbResult<()> {
        let result = self.drain_rounds();
        self.pending = None;
        result
    }

    fn drain_rounds(&mut self) -> DbResult<()> {
        loop {
            let batch = match self.pending.as_mut() {
                Some(pending) if !pending.is_empty() => std::mem::take(pending),
                _ => return Ok(()),
            };
            for change in batch {
                let monitors: Vec<FieldMonitor> = self
                    .monitors
                    .iter()
                    .filter(|m| m.storage_id == change.storage_id)
                    .cloned()
                    .collect();
                if monitors.is_empty() {
                    continue;
                }
                let frontier = BTreeSet::from([change.id]);
                self.notify_step(&change, frontier, monitors, 0)?;
            }
        }
    }

    /// Delivers one change to every monitor whose path has been fully
    /// walked, then groups the rest by their next backward hop so each
    /// reverse index scan happens once per (hop, frontier) pair.
    fn notify_step(
        &mut self,
        change: &PendingChange,
        frontier: BTreeSet<ObjId>,
        monitors: Vec<FieldMonitor>,
        step: usize,
    ) -> DbResult<()> {
        let mut by_hop: BTreeMap<u32, Vec<FieldMonitor>> = BTreeMap::new();
        for monitor in monitors {
            if monitor.path.len() == step {
                monitor.listener.on_field_change(
                    self,
                    change.id,
                    change.storage_id,
                    &monitor.path,
                    &frontier,
                    &change.change,
                )?;
            } else {
                let hop = monitor.path[monitor.path.len() - 1 - step];
                by_hop.entry(hop).or_default().push(monitor);
            }
        }
        for (hop, group) in by_hop {
            let referrers = self.find_referrers(&frontier, hop)?;
            if referrers.is_empty() {
                continue;
            }
            self.notify_step(change, referrers, group, step + 1)?;
        }
        Ok(())
    }

    /// Finds every existing object holding a reference to any of `targets`
    /// through the reference field with the given storage ID, using that
    /// field's reverse index. List positions and map keys trailing the ID in
    /// index entries are ignored; the result is a deduplicated set.
    pub(crate) fn find_referrers(
        &self,
        targets: &BTreeSet<ObjId>,
        ref_storage_id: u32,
    ) -> DbResult<BTreeSet<ObjId>> {
        let mut referrers = BTreeSet::new();
        for &target in targets {
            let value_bytes = Value::Reference(Some(target)).encoded()?;
            let prefix = index_value_prefix(ref_storage_id, &value_bytes);
            let end = key_after_prefix(&prefix);
            let mut lower = prefix.clone();
            while let Some((key, _)) = self.kv.next_entry(&lower, end.as_deref())? {
                if let Some(referrer) = index_entry_id(&key, prefix.len()) {
                    referrers.insert(referrer);
                }
                lower = key;
                lower.push(0x00);
            }
        }
        Ok(referrers)
    }

    /// Walks a reference path backward: starting from `targets`, each hop
    /// (taken last-to-first) replaces the working set with the objects
    /// referring into it. Returns the set of objects from which `targets`
    /// are reachable by walking the path forward.
    pub fn invert_reference_path(
        &self,
        path: &[u32],
        targets: impl IntoIterator<Item = ObjId>,
    ) -> DbResult<BTreeSet<ObjId>> {
        self.check_open()?;
        let mut current: BTreeSet<ObjId> = targets.into_iter().collect();
        for &hop in path.iter().rev() {
            if current.is_empty() {
                break;
            }
            current = self.find_referrers(&current, hop)?;
        }
        Ok(current)
    }

    /// Follows a reference field of one object forward, collecting the
    /// distinct objects it refers to that still exist.
    pub fn follow_reference_path(
        &self,
        start: impl IntoIterator<Item = ObjId>,
        path: &[u32],
    ) -> DbResult<BTreeSet<ObjId>> {
        self.check_open()?;
        let mut current: BTreeSet<ObjId> = start.into_iter().collect();
        for &hop in path {
            let mut next = BTreeSet::new();
            for &id in &current {
                for target in self.reference_targets(id, hop)? {
                    if ObjInfo::read(self.kv(), target)?.is_some() {
                        next.insert(target);
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::schema::{
        sub_field, DeleteAction, ObjTypeBuilder, Schema, SchemaBuilder, SchemaVersionBuilder,
    };
    use objdb_encoding::ValueType;
    use objdb_kv::MemoryKvStore;
    use parking_lot::Mutex;

    const NODE: u32 = 100;
    const LABEL: u32 = 2;
    const PARENT: u32 = 3;
    const LINKS: u32 = 10;
    const LINK: u32 = 11;

    fn schema() -> Arc<Schema> {
        let v1 = SchemaVersionBuilder::new(1)
            .obj_type(
                ObjTypeBuilder::new(NODE, "node")
                    .simple_field(LABEL, "label", ValueType::String, true)
                    .reference_field(PARENT, "parent", DeleteAction::Nothing)
                    .set_field(
                        LINKS,
                        "links",
                        sub_field(LINK, "link", ValueType::Reference, true),
                    ),
            )
            .build()
            .unwrap();
        Arc::new(SchemaBuilder::new().version(v1).build().unwrap())
    }

    fn open() -> Transaction {
        let store = MemoryKvStore::new();
        Transaction::open(&store, schema(), 1).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ObjId, u32, Vec<u32>, BTreeSet<ObjId>)>>,
    }

    impl FieldChangeListener for Recorder {
        fn on_field_change(
            &self,
            _tx: &mut Transaction,
            id: ObjId,
            storage_id: u32,
            path: &[u32],
            referrers: &BTreeSet<ObjId>,
            _change: &FieldChange,
        ) -> DbResult<()> {
            self.events
                .lock()
                .push((id, storage_id, path.to_vec(), referrers.clone()));
            Ok(())
        }
    }

    #[test]
    fn direct_monitor_sees_changed_object() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        tx.add_field_change_listener(LABEL, vec![], recorder.clone());
        let id = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(id, LABEL, Value::String("a".into()))
            .unwrap();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        let (changed, storage_id, path, referrers) = &events[0];
        assert_eq!(*changed, id);
        assert_eq!(*storage_id, LABEL);
        assert!(path.is_empty());
        assert_eq!(referrers, &BTreeSet::from([id]));
    }

    #[test]
    fn unmonitored_field_stays_silent() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        tx.add_field_change_listener(LABEL, vec![], recorder.clone());
        let id = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(id, PARENT, Value::Reference(None))
            .unwrap(); // null is already the default: no change at all
        tx.set_add(id, LINKS, Value::Reference(Some(id))).unwrap();
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn one_hop_back_tracking() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        // Monitor LABEL through one backward PARENT hop: fires for the
        // objects whose `parent` references the changed object.
        tx.add_field_change_listener(LABEL, vec![PARENT], recorder.clone());

        let target = tx.create_of_type(NODE).unwrap();
        let child_a = tx.create_of_type(NODE).unwrap();
        let child_b = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(child_a, PARENT, Value::Reference(Some(target)))
            .unwrap();
        tx.write_simple_field(child_b, PARENT, Value::Reference(Some(target)))
            .unwrap();
        tx.write_simple_field(target, LABEL, Value::String("t".into()))
            .unwrap();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].3, BTreeSet::from([child_a, child_b]));
    }

    #[test]
    fn two_hop_back_tracking_deduplicates() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        tx.add_field_change_listener(LABEL, vec![PARENT, PARENT], recorder.clone());

        // grandparent <- parent_a/parent_b <- leaf; both middle nodes refer
        // to the same grandparent, so the leaf's set must come through once.
        let leaf = tx.create_of_type(NODE).unwrap();
        let mid_a = tx.create_of_type(NODE).unwrap();
        let mid_b = tx.create_of_type(NODE).unwrap();
        let top_a = tx.create_of_type(NODE).unwrap();
        let top_b = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(mid_a, PARENT, Value::Reference(Some(leaf)))
            .unwrap();
        tx.write_simple_field(mid_b, PARENT, Value::Reference(Some(leaf)))
            .unwrap();
        tx.write_simple_field(top_a, PARENT, Value::Reference(Some(mid_a)))
            .unwrap();
        tx.write_simple_field(top_b, PARENT, Value::Reference(Some(mid_b)))
            .unwrap();
        tx.write_simple_field(leaf, LABEL, Value::String("x".into()))
            .unwrap();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].3, BTreeSet::from([top_a, top_b]));
    }

    #[test]
    fn no_referrers_means_no_delivery() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        tx.add_field_change_listener(LABEL, vec![PARENT], recorder.clone());
        let lonely = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(lonely, LABEL, Value::String("x".into()))
            .unwrap();
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn set_reference_back_tracking() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        tx.add_field_change_listener(LABEL, vec![LINK], recorder.clone());

        let target = tx.create_of_type(NODE).unwrap();
        let holder = tx.create_of_type(NODE).unwrap();
        tx.set_add(holder, LINKS, Value::Reference(Some(target)))
            .unwrap();
        tx.write_simple_field(target, LABEL, Value::String("t".into()))
            .unwrap();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].3, BTreeSet::from([holder]));
    }

    struct Chainer {
        next_field: u32,
    }

    impl FieldChangeListener for Chainer {
        fn on_field_change(
            &self,
            tx: &mut Transaction,
            id: ObjId,
            _storage_id: u32,
            _path: &[u32],
            _referrers: &BTreeSet<ObjId>,
            change: &FieldChange,
        ) -> DbResult<()> {
            // React only to the first write so the chain terminates.
            if let FieldChange::Simple {
                old: Value::String(old),
                ..
            } = change
            {
                if old.is_empty() {
                    tx.write_simple_field(id, self.next_field, Value::Reference(Some(id)))?;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn listener_mutations_are_delivered_in_later_rounds() {
        let mut tx = open();
        let recorder = Arc::new(Recorder::default());
        tx.add_field_change_listener(LABEL, vec![], Arc::new(Chainer { next_field: PARENT }));
        tx.add_field_change_listener(PARENT, vec![], recorder.clone());

        let id = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(id, LABEL, Value::String("x".into()))
            .unwrap();

        // The chained PARENT write happened inside the LABEL dispatch and
        // was delivered in a later round of the same drain.
        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, PARENT);
    }

    struct Rejector;

    impl FieldChangeListener for Rejector {
        fn on_field_change(
            &self,
            _tx: &mut Transaction,
            _id: ObjId,
            _storage_id: u32,
            _path: &[u32],
            _referrers: &BTreeSet<ObjId>,
            _change: &FieldChange,
        ) -> DbResult<()> {
            Err(DbError::callback("no"))
        }
    }

    #[test]
    fn listener_error_propagates_to_mutator() {
        let mut tx = open();
        tx.add_field_change_listener(LABEL, vec![], Arc::new(Rejector));
        let id = tx.create_of_type(NODE).unwrap();
        assert!(matches!(
            tx.write_simple_field(id, LABEL, Value::String("x".into())),
            Err(DbError::Callback { .. })
        ));
        // The pending buffer is cleared; later mutations work normally.
        tx.monitors.clear();
        tx.write_simple_field(id, LABEL, Value::String("y".into()))
            .unwrap();
    }

    #[test]
    fn invert_reference_path_walks_backward() {
        let mut tx = open();
        let leaf = tx.create_of_type(NODE).unwrap();
        let mid = tx.create_of_type(NODE).unwrap();
        let top = tx.create_of_type(NODE).unwrap();
        tx.write_simple_field(mid, PARENT, Value::Reference(Some(leaf)))
            .unwrap();
        tx.write_simple_field(top, PARENT, Value::Reference(Some(mid)))
            .unwrap();

        assert_eq!(
            tx.invert_reference_path(&[PARENT], [leaf]).unwrap(),
            BTreeSet::from([mid])
        );
        assert_eq!(
            tx.invert_reference_path(&[PARENT, PARENT], [leaf]).unwrap(),
            BTreeSet::from([top])
        );
        assert!(tx
            .invert_reference_path(&[PARENT, PARENT, PARENT], [leaf])
            .unwrap()
            .is_empty());
        assert_eq!(
            tx.invert_reference_path(&[], [leaf]).unwrap(),
            BTreeSet::from([leaf])
        );
    }
}
