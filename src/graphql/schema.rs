//! Schema assembly.
//!
//! Folds every registered entity's types, filter inputs and operations into
//! one executable schema, together with the shared operator inputs and the
//! `apiStats` summary query. Assembly happens once per process through
//! [`SchemaLoader`]; concurrent callers share the same instance.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, Object, Schema, TypeRef};
use once_cell::sync::OnceCell;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::meta::MetaRegistry;

use super::errors::ApiError;
use super::{filters, operations, types};

/// Shape summary of a built schema, served by the `apiStats` query.
#[derive(Debug, Clone, Copy)]
pub struct ApiStats {
    pub entities: usize,
    pub types: usize,
    pub query_fields: usize,
    pub mutation_fields: usize,
}

fn stats_object() -> Object {
    fn count_field(name: &str, pick: fn(&ApiStats) -> usize) -> Field {
        Field::new(name, TypeRef::named_nn(TypeRef::INT), move |ctx| {
            FieldFuture::new(async move {
                let stats = ctx.parent_value.try_downcast_ref::<ApiStats>()?;
                Ok(Some(FieldValue::value(pick(stats) as i64)))
            })
        })
    }

    Object::new("ApiStats")
        .field(count_field("entityCount", |s| s.entities))
        .field(count_field("typeCount", |s| s.types))
        .field(count_field("queryCount", |s| s.query_fields))
        .field(count_field("mutationCount", |s| s.mutation_fields))
}

/// Assemble the executable schema from the registry. Every registration
/// problem surfaces here as a build error; nothing is deferred to request
/// time.
pub fn build_schema(
    registry: Arc<MetaRegistry>,
    pool: &SqlitePool,
    config: &Config,
) -> Result<Schema, ApiError> {
    if registry.is_empty() {
        return Err(ApiError::SchemaBuild("no entities registered".to_string()));
    }

    // Registering a duplicate root field panics inside async-graphql, so
    // cross-entity name collisions are rejected up front.
    let mut seen: HashSet<String> = HashSet::new();
    for entity in registry.iter() {
        for name in operations::operation_names(entity) {
            if !seen.insert(name.clone()) {
                return Err(ApiError::SchemaBuild(format!(
                    "operation name {name} is generated by more than one entity"
                )));
            }
        }
    }

    let mut builder = Schema::build("Query", Some("Mutation"), None);
    let mut query = Object::new("Query");
    let mut mutation = Object::new("Mutation");
    let mut stats = ApiStats {
        entities: 0,
        types: 0,
        query_fields: 0,
        mutation_fields: 0,
    };

    for input in filters::operator_inputs() {
        builder = builder.register(input);
        stats.types += 1;
    }

    for entity in registry.iter() {
        builder = builder
            .register(types::object(entity, &registry, pool, config))
            .register(types::create_input(entity))
            .register(types::update_input(entity))
            .register(filters::filter_input(entity, &registry));

        for field in operations::query_fields(entity, &registry, pool, config) {
            query = query.field(field);
            stats.query_fields += 1;
        }
        for field in operations::mutation_fields(entity, &registry, pool, config) {
            mutation = mutation.field(field);
            stats.mutation_fields += 1;
        }
        stats.entities += 1;
        // Object + create/update/filter inputs.
        stats.types += 4;
    }

    stats.query_fields += 1;
    query = query.field(Field::new(
        "apiStats",
        TypeRef::named_nn("ApiStats"),
        move |_ctx| FieldFuture::new(async move { Ok(Some(FieldValue::owned_any(stats))) }),
    ));

    let schema = builder
        .register(stats_object())
        .register(query)
        .register(mutation)
        .finish()
        .map_err(|e| ApiError::SchemaBuild(e.to_string()))?;

    info!(
        entities = stats.entities,
        types = stats.types,
        queries = stats.query_fields,
        mutations = stats.mutation_fields,
        "Schema assembled"
    );
    Ok(schema)
}

static SCHEMA: OnceCell<Schema> = OnceCell::new();
static BUILD_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Process-wide schema instance. The first caller builds; everyone after
/// that, including concurrent first requests, gets the same schema.
pub struct SchemaLoader;

impl SchemaLoader {
    pub fn get_or_build(
        registry: Arc<MetaRegistry>,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<&'static Schema, ApiError> {
        SCHEMA.get_or_try_init(|| {
            BUILD_COUNT.fetch_add(1, Ordering::SeqCst);
            build_schema(registry, pool, config)
        })
    }

    /// How many times the schema has actually been assembled.
    pub fn build_count() -> usize {
        BUILD_COUNT.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::meta::CatalogSource;

    async fn catalog_schema() -> Schema {
        let registry = Arc::new(MetaRegistry::load(&CatalogSource).unwrap());
        let db = Database::connect_memory().await.unwrap();
        db.sync_schema(&registry).await.unwrap();
        build_schema(registry, db.pool(), &Config::default()).unwrap()
    }

    #[tokio::test]
    async fn sdl_carries_pluralized_operations() {
        let schema = catalog_schema().await;
        let sdl = schema.sdl();

        assert!(sdl.contains("getInmueble"));
        assert!(sdl.contains("listInmuebles"));
        assert!(sdl.contains("listComunidadesAutonomas"));
        // Invariant Spanish plural.
        assert!(sdl.contains("listDiocesis"));
        assert!(sdl.contains("listAdministraciones"));
        assert!(sdl.contains("deleteInmuebles"));
        // The invariant plural's bulk delete must not shadow deleteDiocesis.
        assert!(sdl.contains("deleteDiocesis"));
        assert!(sdl.contains("deleteManyDiocesis"));
        assert!(sdl.contains("markDeletedInmueble"));
        assert!(sdl.contains("InmuebleFilterInput"));
        assert!(sdl.contains("StringFilterOps"));
    }

    #[tokio::test]
    async fn opaque_fields_stay_out_of_the_sdl() {
        let schema = catalog_schema().await;
        assert!(!schema.sdl().contains("geom"));
    }

    #[tokio::test]
    async fn api_stats_reports_shape() {
        let schema = catalog_schema().await;
        let response = schema
            .execute("{ apiStats { entityCount typeCount queryCount mutationCount } }")
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let data = response.data.into_json().unwrap();
        assert_eq!(data["apiStats"]["entityCount"], 6);
        // Six shared operator inputs plus four generated types per entity.
        assert_eq!(data["apiStats"]["typeCount"], 30);
        // Two queries per entity plus apiStats itself.
        assert_eq!(data["apiStats"]["queryCount"], 13);
        // Four base mutations per entity, six for soft-delete entities.
        assert_eq!(data["apiStats"]["mutationCount"], 36);
    }

    #[tokio::test]
    async fn colliding_operation_names_fail_the_build() {
        use crate::meta::descriptor::{EntityDescriptor, ident_fields};

        struct Colliding;
        impl crate::meta::ModelSource for Colliding {
            fn load(&self) -> anyhow::Result<Vec<EntityDescriptor>> {
                let entity = |name: &str, plural: Option<&str>, table: &str| EntityDescriptor {
                    name: name.to_string(),
                    plural: plural.map(str::to_string),
                    table: table.to_string(),
                    primary_key: "id".to_string(),
                    default_sort: None,
                    fields: ident_fields(),
                    relations: vec![],
                };
                // Both pluralize to Series, so listSeries is generated twice.
                Ok(vec![
                    entity("Serie", Some("Series"), "series_a"),
                    entity("Series", None, "series_b"),
                ])
            }
        }

        let registry = Arc::new(MetaRegistry::load(&Colliding).unwrap());
        let db = Database::connect_memory().await.unwrap();
        let err = build_schema(registry, db.pool(), &Config::default()).unwrap_err();
        assert!(matches!(err, ApiError::SchemaBuild(_)), "{err}");
    }

    #[tokio::test]
    async fn empty_registry_fails_the_build() {
        struct Empty;
        impl crate::meta::ModelSource for Empty {
            fn load(&self) -> anyhow::Result<Vec<crate::meta::EntityDescriptor>> {
                Ok(vec![])
            }
        }

        let registry = Arc::new(MetaRegistry::load(&Empty).unwrap());
        let db = Database::connect_memory().await.unwrap();
        let err = build_schema(registry, db.pool(), &Config::default()).unwrap_err();
        assert!(matches!(err, ApiError::SchemaBuild(_)));
    }
}
