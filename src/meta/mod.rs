//! Entity metadata: descriptors, the registry, and naming helpers.

pub mod catalog;
pub mod descriptor;
pub mod pluralize;
pub mod registry;

pub use catalog::CatalogSource;
pub use descriptor::{
    Cardinality, ComputedFn, EntityDescriptor, EntityRow, FieldDefault, FieldDescriptor, FieldKind,
    FieldSource, RelationDescriptor, CREATED_AT_FIELD, SOFT_DELETE_ACTOR_FIELD, SOFT_DELETE_FIELD,
    UPDATED_AT_FIELD,
};
pub use pluralize::pluralize;
pub use registry::{MetaRegistry, ModelSource};
