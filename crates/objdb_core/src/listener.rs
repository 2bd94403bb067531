//! Listener and callback contracts.
//!
//! Listeners are registered on a [`Transaction`] and invoked synchronously,
//! in registration order, at defined points. A listener receives the
//! transaction mutably and may itself read and mutate objects; re-entrant
//! mutation is supported (see the transaction's pending-notification
//! buffer). Listener errors propagate to the caller of the operation that
//! triggered the notification.

use crate::error::DbResult;
use crate::tx::Transaction;
use objdb_encoding::{ObjId, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of a field's pre-migration state, keyed by field storage ID and
/// passed to [`VersionChangeListener`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OldFieldValue {
    /// A simple field's decoded value (or its type default if unstored).
    Simple(Value),
    /// A counter field's value.
    Counter(i64),
    /// A set field's elements.
    Set(Vec<Value>),
    /// A list field's elements in order.
    List(Vec<Value>),
    /// A map field's entries in key order.
    Map(Vec<(Value, Value)>),
}

/// Map of old field values captured before a schema migration.
pub type OldFieldValues = BTreeMap<u32, OldFieldValue>;

/// Notified when an object is created.
pub trait CreateListener: Send + Sync {
    /// Called synchronously after the object's meta-data and default index
    /// entries are written.
    fn on_create(&self, tx: &mut Transaction, id: ObjId) -> DbResult<()>;
}

/// Notified when an object is about to be deleted.
pub trait DeleteListener: Send + Sync {
    /// Called before the object's data is removed, at most once per delete
    /// even when the listener itself re-deletes or resurrects the object.
    fn on_delete(&self, tx: &mut Transaction, id: ObjId) -> DbResult<()>;
}

/// Notified when an object migrates between schema versions.
pub trait VersionChangeListener: Send + Sync {
    /// Called after the meta-data version is rewritten. `old_values` holds
    /// the pre-migration snapshot of every field that existed in the old
    /// type, even where the stored bytes have already been rewritten.
    fn on_version_change(
        &self,
        tx: &mut Transaction,
        id: ObjId,
        old_version: u32,
        new_version: u32,
        old_values: &OldFieldValues,
    ) -> DbResult<()>;
}

/// One observed change to a field's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    /// A simple field was overwritten.
    Simple {
        /// Previous decoded value.
        old: Value,
        /// New decoded value.
        new: Value,
    },
    /// An element was added to a set.
    SetAdd {
        /// The added element.
        element: Value,
    },
    /// An element was removed from a set.
    SetRemove {
        /// The removed element.
        element: Value,
    },
    /// A set was cleared.
    SetClear,
    /// An element was appended to a list.
    ListPush {
        /// Position of the new element.
        index: u64,
        /// The appended element.
        element: Value,
    },
    /// A list element was replaced in place.
    ListReplace {
        /// Position of the replaced element.
        index: u64,
        /// Previous element.
        old: Value,
        /// New element.
        new: Value,
    },
    /// A list element was removed (later elements shift down).
    ListRemove {
        /// Position the element was removed from.
        index: u64,
        /// The removed element.
        element: Value,
    },
    /// A list was cleared.
    ListClear,
    /// A map entry was inserted or overwritten.
    MapPut {
        /// Entry key.
        key: Value,
        /// Previous value, if the key was present.
        old: Option<Value>,
        /// New value.
        new: Value,
    },
    /// A map entry was removed.
    MapRemove {
        /// Entry key.
        key: Value,
        /// The removed value.
        value: Value,
    },
    /// A map was cleared.
    MapClear,
}

/// Notified when a monitored field changes.
///
/// A monitor is registered with a *reference path* of storage IDs. A path of
/// length N means: deliver the change to this listener once per mutation,
/// with `referrers` holding every object reachable by walking the path
/// backward (N reverse reference hops) from the changed object. An empty
/// path observes the changed object directly.
pub trait FieldChangeListener: Send + Sync {
    /// Called once per monitored mutation at the outermost mutation
    /// boundary.
    #[allow(clippy::too_many_arguments)]
    fn on_field_change(
        &self,
        tx: &mut Transaction,
        id: ObjId,
        storage_id: u32,
        path: &[u32],
        referrers: &BTreeSet<ObjId>,
        change: &FieldChange,
    ) -> DbResult<()>;
}

/// Transaction-completion hooks, mirroring standard transactional-resource
/// synchronization callbacks.
///
/// Invocation order is FIFO by registration; registering the same callback
/// instance twice is a no-op.
pub trait Callback: Send + Sync {
    /// Called before the underlying store commit. An error here aborts the
    /// commit: the transaction rolls back and the error propagates.
    fn before_commit(&self, read_only: bool) -> DbResult<()> {
        let _ = read_only;
        Ok(())
    }

    /// Called immediately before completion (commit path only). Errors are
    /// logged and suppressed so other callbacks still run.
    fn before_completion(&self) -> DbResult<()> {
        Ok(())
    }

    /// Called after a successful store commit. Errors propagate.
    fn after_commit(&self) -> DbResult<()> {
        Ok(())
    }

    /// Called after completion on both the commit and rollback paths.
    /// Errors are logged and suppressed.
    fn after_completion(&self, committed: bool) -> DbResult<()> {
        let _ = committed;
        Ok(())
    }
}
