//! Field metadata.
//!
//! Fields come in five kinds, modeled as the closed [`Field`] enum so every
//! dispatch over field kinds is an exhaustive match. Reference-typed simple
//! fields are always indexed: both delete-policy resolution and reference
//! back-tracking depend on the reverse index existing.

use objdb_encoding::ValueType;

/// What happens to objects referring to a deleted object through a
/// reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteAction {
    /// Leave the referrer untouched; the reference dangles.
    Nothing,
    /// Reject the delete with a referenced-object error.
    #[default]
    Exception,
    /// Null out (or remove, for collection elements) the reference.
    Unreference,
    /// Delete the referrer as well, cascading.
    Delete,
}

/// A single scalar field with a byte encoding and optional secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleField {
    /// Storage ID, unique within a schema version.
    pub storage_id: u32,
    /// Field name.
    pub name: String,
    /// Encoding family.
    pub value_type: ValueType,
    /// Whether a secondary index is maintained for this field.
    pub indexed: bool,
    /// On-delete policy; meaningful only for reference fields.
    pub on_delete: DeleteAction,
}

impl SimpleField {
    /// Whether this field holds object references.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.value_type == ValueType::Reference
    }

    /// Whether a stored value of `old` carries over when an object migrates
    /// to a schema version where this definition applies.
    #[must_use]
    pub fn is_compatible_with(&self, old: &SimpleField) -> bool {
        self.value_type.is_compatible(old.value_type)
    }
}

/// A counter field, stored in the KV store's counter encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterField {
    /// Storage ID, unique within a schema version.
    pub storage_id: u32,
    /// Field name.
    pub name: String,
}

/// A set field: an ordered set of simple elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetField {
    /// Storage ID, unique within a schema version.
    pub storage_id: u32,
    /// Field name.
    pub name: String,
    /// Element sub-field.
    pub element: SimpleField,
}

/// A list field: a position-indexed sequence of simple elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListField {
    /// Storage ID, unique within a schema version.
    pub storage_id: u32,
    /// Field name.
    pub name: String,
    /// Element sub-field.
    pub element: SimpleField,
}

/// A map field: ordered keys, each with one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapField {
    /// Storage ID, unique within a schema version.
    pub storage_id: u32,
    /// Field name.
    pub name: String,
    /// Key sub-field.
    pub key: SimpleField,
    /// Value sub-field.
    pub value: SimpleField,
}

/// A field of an object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Scalar field.
    Simple(SimpleField),
    /// Counter field.
    Counter(CounterField),
    /// Set collection field.
    Set(SetField),
    /// List collection field.
    List(ListField),
    /// Map collection field.
    Map(MapField),
}

impl Field {
    /// Returns the field's storage ID.
    #[must_use]
    pub fn storage_id(&self) -> u32 {
        match self {
            Self::Simple(f) => f.storage_id,
            Self::Counter(f) => f.storage_id,
            Self::Set(f) => f.storage_id,
            Self::List(f) => f.storage_id,
            Self::Map(f) => f.storage_id,
        }
    }

    /// Returns the field's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(f) => &f.name,
            Self::Counter(f) => &f.name,
            Self::Set(f) => &f.name,
            Self::List(f) => &f.name,
            Self::Map(f) => &f.name,
        }
    }

    /// Returns the simple sub-fields of a complex field, empty otherwise.
    #[must_use]
    pub fn sub_fields(&self) -> Vec<&SimpleField> {
        match self {
            Self::Simple(_) | Self::Counter(_) => Vec::new(),
            Self::Set(f) => vec![&f.element],
            Self::List(f) => vec![&f.element],
            Self::Map(f) => vec![&f.key, &f.value],
        }
    }

    /// Whether this is a complex (collection) field.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Set(_) | Self::List(_) | Self::Map(_))
    }

    /// Whether two definitions of the same storage ID across schema versions
    /// are compatible, meaning stored content is preserved in place during
    /// migration.
    #[must_use]
    pub fn is_compatible_with(&self, old: &Field) -> bool {
        match (self, old) {
            (Self::Simple(new), Self::Simple(old)) => new.is_compatible_with(old),
            (Self::Counter(_), Self::Counter(_)) => true,
            (Self::Set(new), Self::Set(old)) => new.element.is_compatible_with(&old.element),
            (Self::List(new), Self::List(old)) => new.element.is_compatible_with(&old.element),
            (Self::Map(new), Self::Map(old)) => {
                new.key.is_compatible_with(&old.key) && new.value.is_compatible_with(&old.value)
            }
            _ => false,
        }
    }
}

/// Where a reference-typed simple field sits within its object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefContainer {
    /// A top-level simple field.
    Top,
    /// The element sub-field of the set with this storage ID.
    SetElement(u32),
    /// The element sub-field of the list with this storage ID.
    ListElement(u32),
    /// The key sub-field of the map with this storage ID.
    MapKey(u32),
    /// The value sub-field of the map with this storage ID.
    MapValue(u32),
}

/// A reference field located within an object type.
#[derive(Debug, Clone)]
pub struct RefFieldLoc {
    /// The reference-typed simple field (possibly a sub-field).
    pub field: SimpleField,
    /// Its position in the type.
    pub container: RefContainer,
}
