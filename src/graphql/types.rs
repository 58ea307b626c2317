//! Type mapping: entity descriptors into GraphQL object and input types.
//!
//! Objects resolve their scalar fields from the [`EntityRow`] parent value,
//! computed fields through the descriptor's resolver, and relation fields
//! with a store round-trip scoped by the foreign key. Create/Update inputs
//! mirror the stored fields: the create input omits the primary key and
//! makes a field optional when it is nullable or carries a default, the
//! update input requires the primary key and makes everything else optional.

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputObject, InputValue, Object, TypeRef};
use async_graphql::{ErrorExtensions, Value};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::executor::{self, Predicate, ROOT_ALIAS, SqlValue};
use crate::meta::{
    Cardinality, EntityDescriptor, EntityRow, FieldDescriptor, FieldKind, FieldSource,
    MetaRegistry, SOFT_DELETE_FIELD,
};

use super::errors::ApiError;

/// GraphQL scalar name for a field kind; `None` for kinds excluded from the
/// generated types.
pub fn scalar_name(kind: &FieldKind) -> Option<&'static str> {
    match kind {
        FieldKind::Id => Some(TypeRef::ID),
        FieldKind::Text | FieldKind::Timestamp | FieldKind::Enum { .. } => Some(TypeRef::STRING),
        FieldKind::Integer => Some(TypeRef::INT),
        FieldKind::Float | FieldKind::Decimal => Some(TypeRef::FLOAT),
        FieldKind::Boolean => Some(TypeRef::BOOLEAN),
        FieldKind::Opaque => None,
    }
}

pub fn create_input_name(entity_name: &str) -> String {
    format!("{entity_name}CreateInput")
}

pub fn update_input_name(entity_name: &str) -> String {
    format!("{entity_name}UpdateInput")
}

fn scalar_field(field: &FieldDescriptor) -> Option<Field> {
    let scalar = scalar_name(&field.kind)?;
    let ty = if field.nullable {
        TypeRef::named(scalar)
    } else {
        TypeRef::named_nn(scalar)
    };

    let name = field.name.clone();
    Some(Field::new(field.name.clone(), ty, move |ctx| {
        let name = name.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
            match row.get(&name) {
                Some(Value::Null) | None => Ok(None),
                Some(value) => Ok(Some(FieldValue::value(value.clone()))),
            }
        })
    }))
}

fn computed_field(field: &FieldDescriptor) -> Option<Field> {
    let scalar = scalar_name(&field.kind)?;
    let FieldSource::Computed(resolve) = &field.source else {
        return None;
    };

    let resolve = resolve.clone();
    Some(Field::new(
        field.name.clone(),
        TypeRef::named(scalar),
        move |ctx| {
            let resolve = resolve.clone();
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
                match resolve(row) {
                    Value::Null => Ok(None),
                    value => Ok(Some(FieldValue::value(value))),
                }
            })
        },
    ))
}

fn to_one_field(
    entity: &EntityDescriptor,
    rel_name: &str,
    fk_field: &str,
    optional: bool,
    target: std::sync::Arc<EntityDescriptor>,
    pool: SqlitePool,
) -> Field {
    let ty = if optional {
        TypeRef::named(target.name.clone())
    } else {
        TypeRef::named_nn(target.name.clone())
    };

    let entity_name = entity.name.clone();
    let fk_field = fk_field.to_string();
    let rel_name_owned = rel_name.to_string();
    Field::new(rel_name, ty, move |ctx| {
        let target = target.clone();
        let pool = pool.clone();
        let fk_field = fk_field.clone();
        let entity_name = entity_name.clone();
        let rel_name = rel_name_owned.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
            let Some(fk) = row.get_str(&fk_field) else {
                return Ok(None);
            };
            let related = executor::select_by_pk(&pool, &target, fk)
                .await
                .map_err(|e| ApiError::Store(e).extend())?;
            match related {
                Some(row) => Ok(Some(FieldValue::owned_any(row))),
                // A dangling FK on a required relation is a data fault.
                None => Err(ApiError::NotFound(format!(
                    "{entity_name}.{rel_name}: related {} {fk} not found",
                    target.name
                ))
                .extend()),
            }
        })
    })
}

fn to_many_field(
    entity: &EntityDescriptor,
    rel_name: &str,
    fk_on_target: &str,
    target: std::sync::Arc<EntityDescriptor>,
    pool: SqlitePool,
    config: &Config,
) -> Field {
    let ty = TypeRef::named_nn_list_nn(target.name.clone());

    let pk = entity.primary_key.clone();
    let fk_on_target = fk_on_target.to_string();
    let exclude_deleted = config.exclude_deleted;
    Field::new(rel_name, ty, move |ctx| {
        let target = target.clone();
        let pool = pool.clone();
        let pk = pk.clone();
        let fk_on_target = fk_on_target.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
            let Some(parent_id) = row.get_str(&pk) else {
                return Ok(Some(FieldValue::list(Vec::<FieldValue>::new())));
            };

            let mut sql = format!("{ROOT_ALIAS}.{fk_on_target} = ?");
            if exclude_deleted && target.soft_delete() {
                sql.push_str(&format!(" AND {ROOT_ALIAS}.{SOFT_DELETE_FIELD} IS NULL"));
            }
            let predicate = Predicate {
                sql,
                binds: vec![SqlValue::Text(parent_id.to_string())],
            };

            let rows = executor::select_rows(
                &pool,
                &target,
                Some(&predicate),
                target.default_sort.as_deref(),
                None,
                0,
            )
            .await
            .map_err(|e| ApiError::Store(e).extend())?;

            Ok(Some(FieldValue::list(
                rows.into_iter().map(FieldValue::owned_any),
            )))
        })
    })
}

/// Build the object type for one entity. Relations whose target is not in
/// the registry are omitted, matching the filter synthesizer.
pub fn object(
    entity: &EntityDescriptor,
    registry: &MetaRegistry,
    pool: &SqlitePool,
    config: &Config,
) -> Object {
    let mut object = Object::new(entity.name.clone());

    for field in &entity.fields {
        let built = match &field.source {
            FieldSource::Stored { .. } => scalar_field(field),
            FieldSource::Computed(_) => computed_field(field),
        };
        if let Some(built) = built {
            object = object.field(built);
        }
    }

    for rel in &entity.relations {
        let Some(target) = registry.get(&rel.target) else {
            continue;
        };
        let built = match &rel.cardinality {
            Cardinality::ToOne { fk_field, optional } => to_one_field(
                entity,
                &rel.name,
                fk_field,
                *optional,
                target.clone(),
                pool.clone(),
            ),
            Cardinality::ToMany { fk_on_target } => to_many_field(
                entity,
                &rel.name,
                fk_on_target,
                target.clone(),
                pool.clone(),
                config,
            ),
        };
        object = object.field(built);
    }

    object
}

/// Stored fields accepted by the create input, in declaration order.
pub fn create_input_fields(entity: &EntityDescriptor) -> impl Iterator<Item = &FieldDescriptor> {
    entity
        .stored_fields()
        .filter(move |f| f.name != entity.primary_key && f.kind != FieldKind::Opaque)
}

/// `<Name>CreateInput`: every insertable column, required unless nullable
/// or defaulted.
pub fn create_input(entity: &EntityDescriptor) -> InputObject {
    let mut input = InputObject::new(create_input_name(&entity.name));

    for field in create_input_fields(entity) {
        let Some(scalar) = scalar_name(&field.kind) else {
            continue;
        };
        let ty = if field.nullable || field.has_default() {
            TypeRef::named(scalar)
        } else {
            TypeRef::named_nn(scalar)
        };
        input = input.field(InputValue::new(field.name.clone(), ty));
    }

    input
}

/// `<Name>UpdateInput`: the primary key plus any subset of columns. A key
/// absent from the submitted object leaves its column untouched; an explicit
/// null clears a nullable column.
pub fn update_input(entity: &EntityDescriptor) -> InputObject {
    let mut input = InputObject::new(update_input_name(&entity.name));
    input = input.field(InputValue::new(
        entity.primary_key.clone(),
        TypeRef::named_nn(TypeRef::ID),
    ));

    for field in create_input_fields(entity) {
        if let Some(scalar) = scalar_name(&field.kind) {
            input = input.field(InputValue::new(field.name.clone(), TypeRef::named(scalar)));
        }
    }

    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{CatalogSource, MetaRegistry};

    #[test]
    fn scalar_mapping_is_total_over_mapped_kinds() {
        assert_eq!(scalar_name(&FieldKind::Id), Some(TypeRef::ID));
        assert_eq!(scalar_name(&FieldKind::Timestamp), Some(TypeRef::STRING));
        assert_eq!(
            scalar_name(&FieldKind::Enum { values: vec![] }),
            Some(TypeRef::STRING)
        );
        assert_eq!(scalar_name(&FieldKind::Decimal), Some(TypeRef::FLOAT));
        assert_eq!(scalar_name(&FieldKind::Opaque), None);
    }

    #[test]
    fn create_input_omits_primary_key_and_opaque_fields() {
        let registry = MetaRegistry::load(&CatalogSource).unwrap();
        let inmueble = registry.get("Inmueble").unwrap();
        let names: Vec<&str> = create_input_fields(inmueble).map(|f| f.name.as_str()).collect();

        assert!(!names.contains(&"id"));
        assert!(!names.contains(&"geom"));
        assert!(!names.contains(&"direccion_completa"));
        assert!(names.contains(&"referencia_catastral"));
        assert!(names.contains(&"creado_en"));
    }
}
