//! Schema metadata: the per-version catalog of object types and fields.
//!
//! A [`Schema`] aggregates every [`SchemaVersion`] known to the database.
//! Everything here is immutable after construction; one `Arc<ObjType>` is
//! shared by all transactions reading that version. The builder API stands
//! in for the external schema-definition subsystem: it assigns nothing, it
//! only validates what the caller declares.

mod field;

pub use field::{
    CounterField, DeleteAction, Field, ListField, MapField, RefContainer, RefFieldLoc, SetField,
    SimpleField,
};

use crate::error::{DbError, DbResult};
use objdb_encoding::{ObjId, ValueType};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A schema-defined record type.
#[derive(Debug, Clone)]
pub struct ObjType {
    /// Storage ID, unique within a schema version.
    pub storage_id: u32,
    /// Type name.
    pub name: String,
    /// Fields keyed by storage ID.
    pub fields: BTreeMap<u32, Field>,
}

impl ObjType {
    fn unknown_field(&self, storage_id: u32, reason: &'static str) -> DbError {
        DbError::UnknownField {
            storage_id,
            type_name: self.name.clone(),
            reason,
        }
    }

    /// Looks up a field by storage ID.
    pub fn field(&self, storage_id: u32) -> DbResult<&Field> {
        self.fields
            .get(&storage_id)
            .ok_or_else(|| self.unknown_field(storage_id, "no such field"))
    }

    /// Looks up a simple field by storage ID.
    pub fn simple_field(&self, storage_id: u32) -> DbResult<&SimpleField> {
        match self.field(storage_id)? {
            Field::Simple(f) => Ok(f),
            _ => Err(self.unknown_field(storage_id, "not a simple field")),
        }
    }

    /// Looks up a counter field by storage ID.
    pub fn counter_field(&self, storage_id: u32) -> DbResult<&CounterField> {
        match self.field(storage_id)? {
            Field::Counter(f) => Ok(f),
            _ => Err(self.unknown_field(storage_id, "not a counter field")),
        }
    }

    /// Looks up a set field by storage ID.
    pub fn set_field(&self, storage_id: u32) -> DbResult<&SetField> {
        match self.field(storage_id)? {
            Field::Set(f) => Ok(f),
            _ => Err(self.unknown_field(storage_id, "not a set field")),
        }
    }

    /// Looks up a list field by storage ID.
    pub fn list_field(&self, storage_id: u32) -> DbResult<&ListField> {
        match self.field(storage_id)? {
            Field::List(f) => Ok(f),
            _ => Err(self.unknown_field(storage_id, "not a list field")),
        }
    }

    /// Looks up a map field by storage ID.
    pub fn map_field(&self, storage_id: u32) -> DbResult<&MapField> {
        match self.field(storage_id)? {
            Field::Map(f) => Ok(f),
            _ => Err(self.unknown_field(storage_id, "not a map field")),
        }
    }

    /// Iterates over the simple fields (top-level only).
    pub fn simple_fields(&self) -> impl Iterator<Item = &SimpleField> {
        self.fields.values().filter_map(|f| match f {
            Field::Simple(s) => Some(s),
            _ => None,
        })
    }

    /// Iterates over the counter fields.
    pub fn counter_fields(&self) -> impl Iterator<Item = &CounterField> {
        self.fields.values().filter_map(|f| match f {
            Field::Counter(c) => Some(c),
            _ => None,
        })
    }

    /// Iterates over the complex fields.
    pub fn complex_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.is_complex())
    }

    /// Returns every reference-typed simple field in this type, top-level
    /// and sub-fields alike, with its container location.
    #[must_use]
    pub fn reference_fields(&self) -> Vec<RefFieldLoc> {
        let mut refs = Vec::new();
        for field in self.fields.values() {
            match field {
                Field::Simple(f) if f.is_reference() => refs.push(RefFieldLoc {
                    field: f.clone(),
                    container: RefContainer::Top,
                }),
                Field::Simple(_) | Field::Counter(_) => {}
                Field::Set(set) => {
                    if set.element.is_reference() {
                        refs.push(RefFieldLoc {
                            field: set.element.clone(),
                            container: RefContainer::SetElement(set.storage_id),
                        });
                    }
                }
                Field::List(list) => {
                    if list.element.is_reference() {
                        refs.push(RefFieldLoc {
                            field: list.element.clone(),
                            container: RefContainer::ListElement(list.storage_id),
                        });
                    }
                }
                Field::Map(map) => {
                    if map.key.is_reference() {
                        refs.push(RefFieldLoc {
                            field: map.key.clone(),
                            container: RefContainer::MapKey(map.storage_id),
                        });
                    }
                    if map.value.is_reference() {
                        refs.push(RefFieldLoc {
                            field: map.value.clone(),
                            container: RefContainer::MapValue(map.storage_id),
                        });
                    }
                }
            }
        }
        refs
    }

    /// Locates a simple field (top-level or sub-field) by storage ID, along
    /// with its container.
    #[must_use]
    pub fn locate_simple(&self, storage_id: u32) -> Option<(&SimpleField, RefContainer)> {
        for field in self.fields.values() {
            match field {
                Field::Simple(f) if f.storage_id == storage_id => {
                    return Some((f, RefContainer::Top));
                }
                Field::Set(set) if set.element.storage_id == storage_id => {
                    return Some((&set.element, RefContainer::SetElement(set.storage_id)));
                }
                Field::List(list) if list.element.storage_id == storage_id => {
                    return Some((&list.element, RefContainer::ListElement(list.storage_id)));
                }
                Field::Map(map) if map.key.storage_id == storage_id => {
                    return Some((&map.key, RefContainer::MapKey(map.storage_id)));
                }
                Field::Map(map) if map.value.storage_id == storage_id => {
                    return Some((&map.value, RefContainer::MapValue(map.storage_id)));
                }
                _ => {}
            }
        }
        None
    }

    /// Finds an indexed simple field (top-level or sub-field) by storage ID,
    /// along with its container.
    pub fn indexed_field(&self, storage_id: u32) -> DbResult<(&SimpleField, RefContainer)> {
        match self.locate_simple(storage_id) {
            Some((field, container)) if field.indexed => Ok((field, container)),
            Some(_) => Err(self.unknown_field(storage_id, "field is not indexed")),
            None => Err(self.unknown_field(storage_id, "no such field")),
        }
    }
}

/// The catalog of object types for one schema version number.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    /// Version number.
    pub version: u32,
    /// Types keyed by storage ID.
    pub types: BTreeMap<u32, Arc<ObjType>>,
}

impl SchemaVersion {
    /// Looks up an object type by storage ID.
    pub fn obj_type(&self, storage_id: u32) -> DbResult<&Arc<ObjType>> {
        self.types.get(&storage_id).ok_or(DbError::UnknownType {
            storage_id,
            version: self.version,
        })
    }

    /// Looks up the object type of an ID.
    pub fn obj_type_of(&self, id: ObjId) -> DbResult<&Arc<ObjType>> {
        self.obj_type(id.storage_id()?)
    }
}

/// The transaction-wide view of all schema versions known to the database.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    versions: BTreeMap<u32, Arc<SchemaVersion>>,
}

impl Schema {
    /// Looks up a schema version by number.
    pub fn version(&self, version: u32) -> DbResult<&Arc<SchemaVersion>> {
        self.versions
            .get(&version)
            .ok_or(DbError::UnknownVersion { version })
    }

    /// Iterates over all versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = &Arc<SchemaVersion>> {
        self.versions.values()
    }
}

/// Builder for a single object type.
#[derive(Debug)]
pub struct ObjTypeBuilder {
    storage_id: u32,
    name: String,
    fields: Vec<Field>,
}

impl ObjTypeBuilder {
    /// Starts a new type definition.
    #[must_use]
    pub fn new(storage_id: u32, name: impl Into<String>) -> Self {
        Self {
            storage_id,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a non-reference simple field.
    #[must_use]
    pub fn simple_field(
        mut self,
        storage_id: u32,
        name: impl Into<String>,
        value_type: ValueType,
        indexed: bool,
    ) -> Self {
        self.fields.push(Field::Simple(SimpleField {
            storage_id,
            name: name.into(),
            value_type,
            indexed,
            on_delete: DeleteAction::default(),
        }));
        self
    }

    /// Adds a reference field with an on-delete policy. Reference fields are
    /// always indexed.
    #[must_use]
    pub fn reference_field(
        mut self,
        storage_id: u32,
        name: impl Into<String>,
        on_delete: DeleteAction,
    ) -> Self {
        self.fields.push(Field::Simple(SimpleField {
            storage_id,
            name: name.into(),
            value_type: ValueType::Reference,
            indexed: true,
            on_delete,
        }));
        self
    }

    /// Adds a counter field.
    #[must_use]
    pub fn counter_field(mut self, storage_id: u32, name: impl Into<String>) -> Self {
        self.fields.push(Field::Counter(CounterField {
            storage_id,
            name: name.into(),
        }));
        self
    }

    /// Adds a set field with the given element sub-field.
    #[must_use]
    pub fn set_field(mut self, storage_id: u32, name: impl Into<String>, element: SimpleField) -> Self {
        self.fields.push(Field::Set(SetField {
            storage_id,
            name: name.into(),
            element,
        }));
        self
    }

    /// Adds a list field with the given element sub-field.
    #[must_use]
    pub fn list_field(
        mut self,
        storage_id: u32,
        name: impl Into<String>,
        element: SimpleField,
    ) -> Self {
        self.fields.push(Field::List(ListField {
            storage_id,
            name: name.into(),
            element,
        }));
        self
    }

    /// Adds a map field with the given key and value sub-fields.
    #[must_use]
    pub fn map_field(
        mut self,
        storage_id: u32,
        name: impl Into<String>,
        key: SimpleField,
        value: SimpleField,
    ) -> Self {
        self.fields.push(Field::Map(MapField {
            storage_id,
            name: name.into(),
            key,
            value,
        }));
        self
    }
}

/// Constructs a sub-field for use in collection fields.
#[must_use]
pub fn sub_field(storage_id: u32, name: impl Into<String>, value_type: ValueType, indexed: bool) -> SimpleField {
    let is_reference = value_type == ValueType::Reference;
    SimpleField {
        storage_id,
        name: name.into(),
        value_type,
        // Reference sub-fields are always indexed.
        indexed: indexed || is_reference,
        on_delete: DeleteAction::default(),
    }
}

/// Constructs a reference sub-field with an on-delete policy.
#[must_use]
pub fn reference_sub_field(
    storage_id: u32,
    name: impl Into<String>,
    on_delete: DeleteAction,
) -> SimpleField {
    SimpleField {
        storage_id,
        name: name.into(),
        value_type: ValueType::Reference,
        indexed: true,
        on_delete,
    }
}

/// Builder for one schema version.
#[derive(Debug)]
pub struct SchemaVersionBuilder {
    version: u32,
    types: Vec<ObjTypeBuilder>,
}

impl SchemaVersionBuilder {
    /// Starts a new version definition.
    #[must_use]
    pub fn new(version: u32) -> Self {
        Self {
            version,
            types: Vec::new(),
        }
    }

    /// Adds an object type.
    #[must_use]
    pub fn obj_type(mut self, builder: ObjTypeBuilder) -> Self {
        self.types.push(builder);
        self
    }

    /// Validates and builds the version catalog.
    ///
    /// Storage IDs must be positive and globally unique across types,
    /// fields, and sub-fields: the object and index keyspaces stay disjoint
    /// only under that rule.
    pub fn build(self) -> DbResult<SchemaVersion> {
        let mut seen: BTreeSet<u32> = BTreeSet::new();
        let mut claim = |storage_id: u32, what: &str, name: &str| -> DbResult<()> {
            if storage_id == 0 {
                return Err(DbError::invalid_schema(format!(
                    "{what} \"{name}\" has storage ID 0"
                )));
            }
            if !seen.insert(storage_id) {
                return Err(DbError::invalid_schema(format!(
                    "duplicate storage ID {storage_id} ({what} \"{name}\")"
                )));
            }
            Ok(())
        };

        let mut types = BTreeMap::new();
        for tb in self.types {
            claim(tb.storage_id, "type", &tb.name)?;
            let mut fields = BTreeMap::new();
            for field in tb.fields {
                claim(field.storage_id(), "field", field.name())?;
                for sub in field.sub_fields() {
                    claim(sub.storage_id, "sub-field", &sub.name)?;
                    if sub.is_reference() && !sub.indexed {
                        return Err(DbError::invalid_schema(format!(
                            "reference sub-field \"{}\" must be indexed",
                            sub.name
                        )));
                    }
                }
                if let Field::Simple(f) = &field {
                    if f.is_reference() && !f.indexed {
                        return Err(DbError::invalid_schema(format!(
                            "reference field \"{}\" must be indexed",
                            f.name
                        )));
                    }
                    if !f.is_reference() && f.on_delete != DeleteAction::Exception {
                        return Err(DbError::invalid_schema(format!(
                            "non-reference field \"{}\" has an on-delete policy",
                            f.name
                        )));
                    }
                }
                if fields.insert(field.storage_id(), field).is_some() {
                    unreachable!("duplicate already caught by claim()");
                }
            }
            let obj_type = ObjType {
                storage_id: tb.storage_id,
                name: tb.name,
                fields,
            };
            types.insert(obj_type.storage_id, Arc::new(obj_type));
        }
        Ok(SchemaVersion {
            version: self.version,
            types,
        })
    }
}

/// Builder for the whole schema catalog.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    versions: Vec<SchemaVersion>,
}

impl SchemaBuilder {
    /// Starts an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a built schema version.
    #[must_use]
    pub fn version(mut self, version: SchemaVersion) -> Self {
        self.versions.push(version);
        self
    }

    /// Builds the catalog.
    ///
    /// Version numbers must be unique, and every storage ID must keep a
    /// single role across all versions: an ID used for a type in one
    /// version may not reappear as a field or sub-field in another. Object
    /// keys start with an encoded type ID and index keys with an encoded
    /// field ID, so reusing an ID across roles would collide the keyspaces.
    pub fn build(self) -> DbResult<Schema> {
        let mut type_ids: BTreeSet<u32> = BTreeSet::new();
        let mut field_ids: BTreeSet<u32> = BTreeSet::new();
        for v in &self.versions {
            for obj_type in v.types.values() {
                type_ids.insert(obj_type.storage_id);
                for field in obj_type.fields.values() {
                    field_ids.insert(field.storage_id());
                    for sub in field.sub_fields() {
                        field_ids.insert(sub.storage_id);
                    }
                }
            }
        }
        if let Some(storage_id) = type_ids.intersection(&field_ids).next() {
            return Err(DbError::invalid_schema(format!(
                "storage ID {storage_id} is used as both a type and a field across versions"
            )));
        }

        let mut versions = BTreeMap::new();
        for v in self.versions {
            let number = v.version;
            if versions.insert(number, Arc::new(v)).is_some() {
                return Err(DbError::invalid_schema(format!(
                    "duplicate schema version {number}"
                )));
            }
        }
        Ok(Schema { versions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_type() -> ObjTypeBuilder {
        ObjTypeBuilder::new(100, "person")
            .simple_field(2, "name", ValueType::String, true)
            .counter_field(3, "visits")
            .reference_field(5, "friend", DeleteAction::Unreference)
            .set_field(10, "tags", sub_field(11, "tag", ValueType::String, true))
    }

    #[test]
    fn build_and_resolve() {
        let version = SchemaVersionBuilder::new(1).obj_type(person_type()).build().unwrap();
        let schema = SchemaBuilder::new().version(version).build().unwrap();

        let v1 = schema.version(1).unwrap();
        let person = v1.obj_type(100).unwrap();
        assert_eq!(person.name, "person");
        assert_eq!(person.simple_field(2).unwrap().value_type, ValueType::String);
        assert!(person.counter_field(3).is_ok());
        assert!(person.set_field(10).is_ok());
        assert!(matches!(
            schema.version(2),
            Err(DbError::UnknownVersion { version: 2 })
        ));
        assert!(matches!(
            v1.obj_type(999),
            Err(DbError::UnknownType {
                storage_id: 999,
                version: 1
            })
        ));
    }

    #[test]
    fn wrong_field_kind_is_unknown_field() {
        let version = SchemaVersionBuilder::new(1).obj_type(person_type()).build().unwrap();
        let person = version.obj_type(100).unwrap();
        assert!(matches!(
            person.simple_field(3),
            Err(DbError::UnknownField { storage_id: 3, .. })
        ));
        assert!(matches!(
            person.list_field(10),
            Err(DbError::UnknownField { storage_id: 10, .. })
        ));
    }

    #[test]
    fn duplicate_storage_ids_rejected() {
        let result = SchemaVersionBuilder::new(1)
            .obj_type(
                ObjTypeBuilder::new(100, "a").simple_field(100, "shadow", ValueType::Int, false),
            )
            .build();
        assert!(matches!(result, Err(DbError::InvalidSchema { .. })));
    }

    #[test]
    fn zero_storage_id_rejected() {
        let result = SchemaVersionBuilder::new(1)
            .obj_type(ObjTypeBuilder::new(0, "zero"))
            .build();
        assert!(matches!(result, Err(DbError::InvalidSchema { .. })));
    }

    #[test]
    fn reference_fields_collects_sub_fields() {
        let version = SchemaVersionBuilder::new(1)
            .obj_type(
                ObjTypeBuilder::new(100, "node")
                    .reference_field(2, "parent", DeleteAction::Delete)
                    .list_field(
                        3,
                        "children",
                        reference_sub_field(4, "child", DeleteAction::Nothing),
                    ),
            )
            .build()
            .unwrap();
        let node = version.obj_type(100).unwrap();
        let refs = node.reference_fields();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].field.storage_id, 2);
        assert!(matches!(refs[0].container, RefContainer::Top));
        assert_eq!(refs[1].field.storage_id, 4);
        assert!(matches!(refs[1].container, RefContainer::ListElement(3)));
    }

    #[test]
    fn indexed_field_lookup() {
        let version = SchemaVersionBuilder::new(1).obj_type(person_type()).build().unwrap();
        let person = version.obj_type(100).unwrap();
        // Top-level indexed simple field.
        assert!(person.indexed_field(2).is_ok());
        // Set element sub-field.
        let (f, container) = person.indexed_field(11).unwrap();
        assert_eq!(f.value_type, ValueType::String);
        assert!(matches!(container, RefContainer::SetElement(10)));
        // Counter fields are never indexed.
        assert!(person.indexed_field(3).is_err());
    }

    #[test]
    fn storage_id_role_conflict_across_versions_rejected() {
        // ID 100 is a type in v1; v2 reuses it as a field of another type.
        let v1 = SchemaVersionBuilder::new(1)
            .obj_type(ObjTypeBuilder::new(100, "person").simple_field(2, "name", ValueType::String, true))
            .build()
            .unwrap();
        let v2 = SchemaVersionBuilder::new(2)
            .obj_type(ObjTypeBuilder::new(50, "company").simple_field(100, "name", ValueType::String, true))
            .build()
            .unwrap();
        let result = SchemaBuilder::new().version(v1).version(v2).build();
        assert!(matches!(result, Err(DbError::InvalidSchema { .. })));

        // Reuse as a sub-field is caught too.
        let v1 = SchemaVersionBuilder::new(1)
            .obj_type(ObjTypeBuilder::new(100, "person"))
            .build()
            .unwrap();
        let v2 = SchemaVersionBuilder::new(2)
            .obj_type(
                ObjTypeBuilder::new(50, "company")
                    .set_field(51, "tags", sub_field(100, "tag", ValueType::String, false)),
            )
            .build()
            .unwrap();
        let result = SchemaBuilder::new().version(v1).version(v2).build();
        assert!(matches!(result, Err(DbError::InvalidSchema { .. })));
    }

    #[test]
    fn duplicate_versions_rejected() {
        let v1 = SchemaVersionBuilder::new(1).build().unwrap();
        let v1_again = SchemaVersionBuilder::new(1).build().unwrap();
        let result = SchemaBuilder::new().version(v1).version(v1_again).build();
        assert!(matches!(result, Err(DbError::InvalidSchema { .. })));
    }
}
