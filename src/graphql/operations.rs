//! Operation generation: per-entity CRUD fields for the root types.
//!
//! Each entity contributes `get<Name>` and `list<Plural>` to Query, and
//! `create<Name>`, `update<Name>`, `delete<Name>` and a bulk delete to
//! Mutation. Entities carrying the soft-delete column additionally get
//! `markDeleted<Name>` and `restore<Name>`. Every mutation returns the full
//! affected record (the pre-deletion image for deletes).
//!
//! Resolver failures leave through [`ErrorExtensions::extend`] so the `code`
//! extension reaches the client; async-graphql's blanket Display conversion
//! would drop it.

use std::sync::Arc;

use async_graphql::ErrorExtensions;
use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputValue, TypeRef};
use async_graphql::indexmap::IndexMap;
use async_graphql::{Name, Value};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::db::executor::{self, Predicate, ROOT_ALIAS, SqlValue};
use crate::meta::{
    EntityDescriptor, FieldDescriptor, FieldKind, MetaRegistry, SOFT_DELETE_ACTOR_FIELD,
    SOFT_DELETE_FIELD, UPDATED_AT_FIELD,
};

use super::compile::{CompileOptions, compile_filter};
use super::errors::ApiError;
use super::filters::filter_input_name;
use super::types::{self, create_input_name, update_input_name};

/// Shared state captured by every generated resolver.
#[derive(Clone)]
struct OpContext {
    entity: Arc<EntityDescriptor>,
    registry: Arc<MetaRegistry>,
    pool: SqlitePool,
    config: Config,
}

impl OpContext {
    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            max_depth: self.config.max_filter_depth,
        }
    }

    async fn fetch_existing(&self, id: &str) -> Result<crate::meta::EntityRow, ApiError> {
        executor::select_by_pk(&self.pool, &self.entity, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("{} {id}", self.entity.name)))
    }
}

/// Name of the bulk delete mutation. Invariant plurals would collide with
/// the single-record delete, so they take a `deleteMany` prefix instead.
pub fn bulk_delete_name(entity: &EntityDescriptor) -> String {
    let plural = entity.plural();
    if plural == entity.name {
        format!("deleteMany{plural}")
    } else {
        format!("delete{plural}")
    }
}

/// Every root field name one entity contributes; the assembler checks these
/// for cross-entity collisions before registration.
pub fn operation_names(entity: &EntityDescriptor) -> Vec<String> {
    let mut names = vec![
        format!("get{}", entity.name),
        format!("list{}", entity.plural()),
        format!("create{}", entity.name),
        format!("update{}", entity.name),
        format!("delete{}", entity.name),
        bulk_delete_name(entity),
    ];
    if entity.soft_delete() {
        names.push(format!("markDeleted{}", entity.name));
        names.push(format!("restore{}", entity.name));
    }
    names
}

/// Query fields for one entity.
pub fn query_fields(
    entity: &Arc<EntityDescriptor>,
    registry: &Arc<MetaRegistry>,
    pool: &SqlitePool,
    config: &Config,
) -> Vec<Field> {
    let op = OpContext {
        entity: entity.clone(),
        registry: registry.clone(),
        pool: pool.clone(),
        config: config.clone(),
    };

    vec![get_field(op.clone()), list_field(op)]
}

/// Mutation fields for one entity.
pub fn mutation_fields(
    entity: &Arc<EntityDescriptor>,
    registry: &Arc<MetaRegistry>,
    pool: &SqlitePool,
    config: &Config,
) -> Vec<Field> {
    let op = OpContext {
        entity: entity.clone(),
        registry: registry.clone(),
        pool: pool.clone(),
        config: config.clone(),
    };

    let mut fields = vec![
        create_field(op.clone()),
        update_field(op.clone()),
        delete_field(op.clone()),
        delete_many_field(op.clone()),
    ];
    if entity.soft_delete() {
        fields.push(mark_deleted_field(op.clone()));
        fields.push(restore_field(op));
    }
    fields
}

fn get_field(op: OpContext) -> Field {
    let name = format!("get{}", op.entity.name);
    let ty = TypeRef::named_nn(op.entity.name.clone());

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let id = required_id(args, &op.entity.primary_key)?;
                let row = op.fetch_existing(&id).await?;
                Ok(Some(FieldValue::owned_any(row)))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID)))
}

fn list_field(op: OpContext) -> Field {
    let name = format!("list{}", op.entity.plural());
    let ty = TypeRef::named_nn_list_nn(op.entity.name.clone());
    let filter_ty = filter_input_name(&op.entity.name);

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let (limit, offset) = page_args(args, &op.config)?;

                let mut predicate = match args.get("filter") {
                    Some(filter) if !matches!(filter, Value::Null) => Some(compile_filter(
                        filter,
                        &op.entity,
                        &op.registry,
                        op.compile_options(),
                    )?),
                    _ => None,
                };
                if op.config.exclude_deleted && op.entity.soft_delete() {
                    predicate = Some(with_not_deleted(predicate));
                }

                let rows = executor::select_rows(
                    &op.pool,
                    &op.entity,
                    predicate.as_ref(),
                    op.entity.default_sort.as_deref(),
                    Some(limit),
                    offset,
                )
                .await?;

                Ok(Some(FieldValue::list(
                    rows.into_iter().map(FieldValue::owned_any),
                )))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("filter", TypeRef::named(filter_ty)))
    .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
}

fn create_field(op: OpContext) -> Field {
    let name = format!("create{}", op.entity.name);
    let ty = TypeRef::named_nn(op.entity.name.clone());
    let data_ty = create_input_name(&op.entity.name);

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let data = required_object(args, "data")?;

                let id = Uuid::new_v4().to_string();
                let mut values = vec![(op.entity.primary_key.clone(), SqlValue::Text(id.clone()))];

                for field in types::create_input_fields(&op.entity) {
                    match data.get(field.name.as_str()) {
                        Some(Value::Null) | None => {
                            if field.has_default() {
                                values.push((
                                    field.name.clone(),
                                    SqlValue::Text(executor::now_iso8601()),
                                ));
                            } else if !field.nullable {
                                return Err(ApiError::Validation(format!(
                                    "{}.{} is required",
                                    op.entity.name, field.name
                                )));
                            }
                        }
                        Some(value) => {
                            values.push((field.name.clone(), coerce_write(field, value)?));
                        }
                    }
                }

                executor::insert_row(&op.pool, &op.entity, &values)
                    .await
                    .map_err(|e| ApiError::from_write(e, &op.entity.name))?;

                info!(entity = %op.entity.name, %id, "Record created");
                let row = op.fetch_existing(&id).await?;
                Ok(Some(FieldValue::owned_any(row)))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("data", TypeRef::named_nn(data_ty)))
}

fn update_field(op: OpContext) -> Field {
    let name = format!("update{}", op.entity.name);
    let ty = TypeRef::named_nn(op.entity.name.clone());
    let data_ty = update_input_name(&op.entity.name);

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let data = required_object(args, "data")?;

                let Some(Value::String(id)) = data.get(op.entity.primary_key.as_str()) else {
                    return Err(ApiError::Validation(format!(
                        "{}.{} is required",
                        op.entity.name, op.entity.primary_key
                    )));
                };
                let id = id.clone();

                // A key absent from the input leaves its column untouched;
                // an explicit null clears a nullable column.
                let mut sets: Vec<(String, SqlValue)> = Vec::new();
                for (key, value) in data {
                    if key.as_str() == op.entity.primary_key {
                        continue;
                    }
                    let Some(field) = op
                        .entity
                        .field_named(key)
                        .filter(|f| f.is_stored() && f.kind != FieldKind::Opaque)
                    else {
                        return Err(ApiError::Validation(format!(
                            "{}.{key} is not an updatable column",
                            op.entity.name
                        )));
                    };

                    match value {
                        Value::Null => {
                            if !field.nullable {
                                return Err(ApiError::Validation(format!(
                                    "{}.{key} cannot be cleared",
                                    op.entity.name
                                )));
                            }
                            sets.push((field.name.clone(), SqlValue::Null));
                        }
                        value => sets.push((field.name.clone(), coerce_write(field, value)?)),
                    }
                }

                if op.entity.field_named(UPDATED_AT_FIELD).is_some()
                    && !sets.iter().any(|(c, _)| c == UPDATED_AT_FIELD)
                {
                    sets.push((
                        UPDATED_AT_FIELD.to_string(),
                        SqlValue::Text(executor::now_iso8601()),
                    ));
                }

                if !sets.is_empty() {
                    let affected = executor::update_by_pk(&op.pool, &op.entity, &id, &sets)
                        .await
                        .map_err(|e| ApiError::from_write(e, &op.entity.name))?;
                    if affected == 0 {
                        return Err(ApiError::NotFound(format!("{} {id}", op.entity.name)));
                    }
                }

                let row = op.fetch_existing(&id).await?;
                Ok(Some(FieldValue::owned_any(row)))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("data", TypeRef::named_nn(data_ty)))
}

fn delete_field(op: OpContext) -> Field {
    let name = format!("delete{}", op.entity.name);
    let ty = TypeRef::named_nn(op.entity.name.clone());

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let id = required_id(args, &op.entity.primary_key)?;

                let row = op.fetch_existing(&id).await?;
                executor::delete_by_pk(&op.pool, &op.entity, &id)
                    .await
                    .map_err(|e| ApiError::from_write(e, &op.entity.name))?;

                info!(entity = %op.entity.name, %id, "Record deleted");
                Ok(Some(FieldValue::owned_any(row)))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID)))
}

fn delete_many_field(op: OpContext) -> Field {
    let name = bulk_delete_name(&op.entity);
    let ty = TypeRef::named_nn_list_nn(op.entity.name.clone());
    let filter_ty = filter_input_name(&op.entity.name);

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let Some(filter) = args.get("filter") else {
                    return Err(ApiError::Validation(
                        "filter is required for bulk delete".to_string(),
                    ));
                };

                let predicate =
                    compile_filter(filter, &op.entity, &op.registry, op.compile_options())?;
                let rows = executor::delete_where(&op.pool, &op.entity, &predicate)
                    .await
                    .map_err(|e| ApiError::from_write(e, &op.entity.name))?;

                info!(entity = %op.entity.name, count = rows.len(), "Bulk delete");
                Ok(Some(FieldValue::list(
                    rows.into_iter().map(FieldValue::owned_any),
                )))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("filter", TypeRef::named_nn(filter_ty)))
}

fn mark_deleted_field(op: OpContext) -> Field {
    let name = format!("markDeleted{}", op.entity.name);
    let ty = TypeRef::named_nn(op.entity.name.clone());

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let id = required_id(args, &op.entity.primary_key)?;
                let actor = match args.get("actorId") {
                    Some(Value::String(s)) => Some(s.clone()),
                    _ => None,
                };

                let now = executor::now_iso8601();
                let mut sets = vec![(SOFT_DELETE_FIELD.to_string(), SqlValue::Text(now.clone()))];
                if op.entity.field_named(SOFT_DELETE_ACTOR_FIELD).is_some() {
                    sets.push((
                        SOFT_DELETE_ACTOR_FIELD.to_string(),
                        actor.map(SqlValue::Text).unwrap_or(SqlValue::Null),
                    ));
                }
                if op.entity.field_named(UPDATED_AT_FIELD).is_some() {
                    sets.push((UPDATED_AT_FIELD.to_string(), SqlValue::Text(now)));
                }

                let affected = executor::update_by_pk(&op.pool, &op.entity, &id, &sets).await?;
                if affected == 0 {
                    return Err(ApiError::NotFound(format!("{} {id}", op.entity.name)));
                }

                info!(entity = %op.entity.name, %id, "Record marked deleted");
                let row = op.fetch_existing(&id).await?;
                Ok(Some(FieldValue::owned_any(row)))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID)))
    .argument(InputValue::new("actorId", TypeRef::named(TypeRef::ID)))
}

fn restore_field(op: OpContext) -> Field {
    let name = format!("restore{}", op.entity.name);
    let ty = TypeRef::named_nn(op.entity.name.clone());

    Field::new(name, ty, move |ctx| {
        let op = op.clone();
        FieldFuture::new(async move {
            let args = ctx.args.as_index_map();
            let result = async {
                let id = required_id(args, &op.entity.primary_key)?;

                let mut sets = vec![(SOFT_DELETE_FIELD.to_string(), SqlValue::Null)];
                if op.entity.field_named(SOFT_DELETE_ACTOR_FIELD).is_some() {
                    sets.push((SOFT_DELETE_ACTOR_FIELD.to_string(), SqlValue::Null));
                }
                if op.entity.field_named(UPDATED_AT_FIELD).is_some() {
                    sets.push((
                        UPDATED_AT_FIELD.to_string(),
                        SqlValue::Text(executor::now_iso8601()),
                    ));
                }

                let affected = executor::update_by_pk(&op.pool, &op.entity, &id, &sets).await?;
                if affected == 0 {
                    return Err(ApiError::NotFound(format!("{} {id}", op.entity.name)));
                }

                info!(entity = %op.entity.name, %id, "Record restored");
                let row = op.fetch_existing(&id).await?;
                Ok(Some(FieldValue::owned_any(row)))
            }
            .await;
            result.map_err(|e: ApiError| e.extend())
        })
    })
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID)))
}

/// Validate and default the list paging arguments.
fn page_args(args: &IndexMap<Name, Value>, config: &Config) -> Result<(i64, i64), ApiError> {
    let limit = match args.get("limit") {
        Some(Value::Number(n)) => {
            let limit = n
                .as_i64()
                .ok_or_else(|| ApiError::InvalidArgument("limit must be an integer".to_string()))?;
            if limit < 0 {
                return Err(ApiError::InvalidArgument(format!(
                    "limit must not be negative, got {limit}"
                )));
            }
            if limit > config.max_limit {
                return Err(ApiError::InvalidArgument(format!(
                    "limit {limit} exceeds the maximum of {}",
                    config.max_limit
                )));
            }
            limit
        }
        Some(Value::Null) | None => config.default_limit,
        Some(_) => return Err(ApiError::InvalidArgument("limit must be an integer".to_string())),
    };

    let offset = match args.get("offset") {
        Some(Value::Number(n)) => {
            let offset = n
                .as_i64()
                .ok_or_else(|| ApiError::InvalidArgument("offset must be an integer".to_string()))?;
            if offset < 0 {
                return Err(ApiError::InvalidArgument(format!(
                    "offset must not be negative, got {offset}"
                )));
            }
            offset
        }
        Some(Value::Null) | None => 0,
        Some(_) => {
            return Err(ApiError::InvalidArgument("offset must be an integer".to_string()));
        }
    };

    Ok((limit, offset))
}

/// Conjoin an optional compiled filter with the soft-delete exclusion.
fn with_not_deleted(predicate: Option<Predicate>) -> Predicate {
    let base = predicate.unwrap_or_else(Predicate::always_true);
    Predicate {
        sql: format!("({}) AND {ROOT_ALIAS}.{SOFT_DELETE_FIELD} IS NULL", base.sql),
        binds: base.binds,
    }
}

fn required_id(args: &IndexMap<Name, Value>, pk: &str) -> Result<String, ApiError> {
    match args.get("id") {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(ApiError::Validation(format!("{pk} is required"))),
    }
}

fn required_object<'a>(
    args: &'a IndexMap<Name, Value>,
    name: &str,
) -> Result<&'a IndexMap<Name, Value>, ApiError> {
    match args.get(name) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::Validation(format!("{name} must be an object"))),
    }
}

/// Coerce an input value for a write, enforcing the field's kind and enum
/// literal set.
fn coerce_write(field: &FieldDescriptor, value: &Value) -> Result<SqlValue, ApiError> {
    match (&field.kind, value) {
        (FieldKind::Enum { values }, Value::String(s)) => {
            if values.iter().any(|v| v == s) {
                Ok(SqlValue::Text(s.clone()))
            } else {
                Err(ApiError::Validation(format!(
                    "{}: {s} is not one of [{}]",
                    field.name,
                    values.join(", ")
                )))
            }
        }
        (FieldKind::Id | FieldKind::Text | FieldKind::Timestamp, Value::String(s)) => {
            Ok(SqlValue::Text(s.clone()))
        }
        (FieldKind::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Int).ok_or_else(|| {
            ApiError::Validation(format!("{}: expected an integer", field.name))
        }),
        (FieldKind::Float | FieldKind::Decimal, Value::Number(n)) => {
            n.as_f64().map(SqlValue::Float).ok_or_else(|| {
                ApiError::Validation(format!("{}: expected a number", field.name))
            })
        }
        (FieldKind::Boolean, Value::Boolean(b)) => Ok(SqlValue::Bool(*b)),
        _ => Err(ApiError::Validation(format!(
            "{}: value does not match the column type",
            field.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{CatalogSource, MetaRegistry};
    use assert_matches::assert_matches;

    fn args(json: serde_json::Value) -> IndexMap<Name, Value> {
        match Value::from_json(json).unwrap() {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn page_args_default_and_validate() {
        let config = Config::default();

        assert_eq!(page_args(&args(serde_json::json!({})), &config).unwrap(), (25, 0));
        assert_eq!(
            page_args(&args(serde_json::json!({"limit": 10, "offset": 30})), &config).unwrap(),
            (10, 30)
        );

        let err = page_args(&args(serde_json::json!({"limit": 101})), &config).unwrap_err();
        assert_matches!(err, ApiError::InvalidArgument(_));

        let err = page_args(&args(serde_json::json!({"offset": -1})), &config).unwrap_err();
        assert_matches!(err, ApiError::InvalidArgument(_));
    }

    #[test]
    fn enum_literals_are_validated_on_write() {
        let field = FieldDescriptor::new(
            "nivel",
            FieldKind::Enum {
                values: vec!["estatal".to_string(), "local".to_string()],
            },
        );

        assert_eq!(
            coerce_write(&field, &Value::String("local".to_string())).unwrap(),
            SqlValue::Text("local".to_string())
        );
        let err = coerce_write(&field, &Value::String("galactico".to_string())).unwrap_err();
        assert_matches!(err, ApiError::Validation(_));
    }

    #[test]
    fn soft_delete_exclusion_wraps_the_filter() {
        let base = Predicate {
            sql: "t0.nombre = ?".to_string(),
            binds: vec![SqlValue::Text("x".to_string())],
        };
        let combined = with_not_deleted(Some(base));
        assert_eq!(combined.sql, "(t0.nombre = ?) AND t0.eliminado_en IS NULL");
        assert_eq!(combined.binds.len(), 1);

        assert_eq!(
            with_not_deleted(None).sql,
            "(1=1) AND t0.eliminado_en IS NULL"
        );
    }

    #[test]
    fn invariant_plural_bulk_delete_gets_its_own_name() {
        let registry = MetaRegistry::load(&CatalogSource).unwrap();

        // Diocesis pluralizes to itself; the plain form would shadow
        // deleteDiocesis.
        let diocesis = registry.get("Diocesis").unwrap();
        assert_eq!(bulk_delete_name(diocesis), "deleteManyDiocesis");

        let provincia = registry.get("Provincia").unwrap();
        assert_eq!(bulk_delete_name(provincia), "deleteProvincias");
    }

    #[test]
    fn operation_names_are_distinct_per_entity() {
        let registry = MetaRegistry::load(&CatalogSource).unwrap();
        for entity in registry.iter() {
            let names = operation_names(entity);
            let mut deduped = names.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(names.len(), deduped.len(), "{} repeats a name", entity.name);
        }
    }
}
