//! Structural metadata for domain entities.
//!
//! An [`EntityDescriptor`] is the single source of truth from which the
//! GraphQL object type, the Create/Update inputs, the filter input and the
//! CRUD operations of an entity are derived. Descriptors are immutable after
//! registry load and live for the process lifetime behind an `Arc`.

use std::fmt;
use std::sync::Arc;

use async_graphql::indexmap::IndexMap;
use async_graphql::{Name, Value};

use super::pluralize::pluralize;

/// Audit column stamped when a record is created.
pub const CREATED_AT_FIELD: &str = "creado_en";
/// Audit column stamped on every update.
pub const UPDATED_AT_FIELD: &str = "actualizado_en";
/// Soft-delete timestamp; present on entities using the audit template.
pub const SOFT_DELETE_FIELD: &str = "eliminado_en";
/// Identifier of the actor that soft-deleted the record.
pub const SOFT_DELETE_ACTOR_FIELD: &str = "eliminado_por";

/// A materialized record: ordered column name → GraphQL value.
///
/// Rows flow from the store executor into resolvers as the parent value of
/// generated object types, and back out of mutations as the returned record.
#[derive(Debug, Clone, Default)]
pub struct EntityRow {
    values: IndexMap<Name, Value>,
}

impl EntityRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(Name::new(name), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The value of a column as a string, when it is one.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

/// Computation backing a non-stored attribute, resolved against the loaded
/// row. Pure with respect to its input.
pub type ComputedFn = Arc<dyn Fn(&EntityRow) -> Value + Send + Sync>;

/// Semantic kind of a field; drives scalar mapping, SQL column type, filter
/// operator sets and input coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Opaque identifier (UUID stored as TEXT, exposed as GraphQL ID).
    Id,
    Text,
    Integer,
    Float,
    /// Exposed as Float on the wire; kept distinct for storage hints.
    Decimal,
    Boolean,
    /// ISO-8601 string, no timezone conversion.
    Timestamp,
    /// Closed set of literal values, exposed as String and validated on input.
    Enum { values: Vec<String> },
    /// Excluded from all generated types (geospatial blobs and the like).
    Opaque,
}

impl FieldKind {
    /// Whether the kind supports ordered comparisons (`gt`, `lte`, ...).
    /// Text-backed kinds compare under SQLite collation order, enums
    /// included (they share the string operator set on the wire).
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            FieldKind::Integer
                | FieldKind::Float
                | FieldKind::Decimal
                | FieldKind::Timestamp
                | FieldKind::Text
                | FieldKind::Enum { .. }
        )
    }

    /// SQLite column type for stored fields of this kind.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Id | FieldKind::Text | FieldKind::Timestamp | FieldKind::Enum { .. } => "TEXT",
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Float | FieldKind::Decimal => "REAL",
            FieldKind::Opaque => "BLOB",
        }
    }
}

/// Default applied when a stored field is absent from a create input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    /// Current UTC time as an ISO-8601 string.
    Now,
}

/// Whether a field is backed by a column or computed at resolution time.
#[derive(Clone)]
pub enum FieldSource {
    Stored { default: Option<FieldDefault> },
    Computed(ComputedFn),
}

impl fmt::Debug for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Stored { default } => f.debug_struct("Stored").field("default", default).finish(),
            FieldSource::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// One field of an entity.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Uniqueness hint; enforced by the store schema, informational here.
    pub unique: bool,
    /// Index hint; informational only.
    pub indexed: bool,
    pub source: FieldSource,
}

impl FieldDescriptor {
    /// A stored, non-nullable field with no default.
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: false,
            unique: false,
            indexed: false,
            source: FieldSource::Stored { default: None },
        }
    }

    /// A computed attribute: present in the object type only.
    pub fn computed(name: &str, kind: FieldKind, resolve: ComputedFn) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: true,
            unique: false,
            indexed: false,
            source: FieldSource::Computed(resolve),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn default_now(mut self) -> Self {
        if let FieldSource::Stored { default } = &mut self.source {
            *default = Some(FieldDefault::Now);
        }
        self
    }

    pub fn is_stored(&self) -> bool {
        matches!(self.source, FieldSource::Stored { .. })
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.source, FieldSource::Computed(_))
    }

    pub fn has_default(&self) -> bool {
        matches!(self.source, FieldSource::Stored { default: Some(_) })
    }

    /// Stored, non-opaque fields participate in filtering.
    pub fn is_filterable(&self) -> bool {
        self.is_stored() && self.kind != FieldKind::Opaque
    }
}

/// Relation cardinality plus the foreign key that realizes it.
#[derive(Debug, Clone)]
pub enum Cardinality {
    /// FK lives on this entity and points at the target's primary key.
    ToOne { fk_field: String, optional: bool },
    /// FK lives on the target and points back at this entity.
    ToMany { fk_on_target: String },
}

/// A named relation to another entity. Relations may form cycles; they are
/// bound by target name, never by a reference to the built type.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub back_reference: Option<String>,
}

impl RelationDescriptor {
    pub fn to_one(name: &str, target: &str, fk_field: &str, optional: bool) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::ToOne {
                fk_field: fk_field.to_string(),
                optional,
            },
            back_reference: None,
        }
    }

    pub fn to_many(name: &str, target: &str, fk_on_target: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::ToMany {
                fk_on_target: fk_on_target.to_string(),
            },
            back_reference: None,
        }
    }

    pub fn back(mut self, name: &str) -> Self {
        self.back_reference = Some(name.to_string());
        self
    }
}

/// Structural metadata for one domain entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// Singular PascalCase name; also the GraphQL type name.
    pub name: String,
    /// Plural display name. `None` means derive via the Spanish pluralizer.
    pub plural: Option<String>,
    pub table: String,
    pub primary_key: String,
    /// Column used to order list results. `None` means store-natural order.
    pub default_sort: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    pub relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    /// Plural name: declared override, or the pluralized entity name.
    pub fn plural(&self) -> String {
        match &self.plural {
            Some(p) => p.clone(),
            None => pluralize(&self.name),
        }
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation_named(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Fields backed by a column, in declaration order.
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_stored())
    }

    /// Column names for SELECT lists, in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.stored_fields().map(|f| f.name.as_str()).collect()
    }

    /// Whether the entity carries the soft-delete timestamp column.
    pub fn soft_delete(&self) -> bool {
        self.field_named(SOFT_DELETE_FIELD).is_some_and(|f| f.is_stored())
    }

    /// Structural validation; the registry drops entities failing this with
    /// a diagnostic instead of aborting the whole schema build.
    pub fn validate(&self) -> Result<(), String> {
        let Some(pk) = self.field_named(&self.primary_key) else {
            return Err(format!(
                "entity {}: primary key column {} is not declared",
                self.name, self.primary_key
            ));
        };
        if !pk.is_stored() {
            return Err(format!(
                "entity {}: primary key {} must be a stored field",
                self.name, self.primary_key
            ));
        }
        if pk.kind == FieldKind::Opaque {
            return Err(format!(
                "entity {}: primary key {} has an unmappable kind",
                self.name, self.primary_key
            ));
        }
        if let Some(sort) = &self.default_sort {
            if self.field_named(sort).is_none_or(|f| !f.is_stored()) {
                return Err(format!(
                    "entity {}: default sort column {sort} is not a stored field",
                    self.name
                ));
            }
        }
        for rel in &self.relations {
            if let Cardinality::ToOne { fk_field, .. } = &rel.cardinality {
                if self.field_named(fk_field).is_none() {
                    return Err(format!(
                        "entity {}: relation {} references undeclared FK column {fk_field}",
                        self.name, rel.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Field-group template: primary key identification.
pub fn ident_fields() -> Vec<FieldDescriptor> {
    vec![FieldDescriptor::new("id", FieldKind::Id).unique().indexed()]
}

/// Field-group template: audit timestamps plus soft-delete columns.
pub fn audit_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new(CREATED_AT_FIELD, FieldKind::Timestamp).default_now(),
        FieldDescriptor::new(UPDATED_AT_FIELD, FieldKind::Timestamp).default_now(),
        FieldDescriptor::new(SOFT_DELETE_FIELD, FieldKind::Timestamp).nullable(),
        FieldDescriptor::new(SOFT_DELETE_ACTOR_FIELD, FieldKind::Id).nullable(),
    ]
}

/// Field-group template: postal address components.
pub fn direccion_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("nombre_via", FieldKind::Text).nullable(),
        FieldDescriptor::new("numero", FieldKind::Text).nullable(),
        FieldDescriptor::new("codigo_postal", FieldKind::Text).nullable().indexed(),
        FieldDescriptor::new("latitud", FieldKind::Decimal).nullable(),
        FieldDescriptor::new("longitud", FieldKind::Decimal).nullable(),
    ]
}
