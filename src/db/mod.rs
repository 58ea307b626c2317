//! Database connection and schema synchronization.
//!
//! The schema is created directly from the entity descriptors: one table per
//! registered entity, with foreign keys derived from its to-one relations.
//! Column renames and type changes are not handled (requires a DB wipe).

pub mod executor;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

use crate::meta::{Cardinality, EntityDescriptor, MetaRegistry};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str) -> Result<Self> {
        let options = url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create an in-memory database on a single connection (each SQLite
    /// in-memory connection is its own database, so the pool must not grow).
    pub async fn connect_memory() -> Result<Self> {
        let options = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create missing tables and columns for every registered entity.
    pub async fn sync_schema(&self, registry: &MetaRegistry) -> Result<SchemaSyncResult> {
        let mut result = SchemaSyncResult::default();

        for entity in registry.iter() {
            if table_exists(&self.pool, &entity.table).await? {
                let existing = table_columns(&self.pool, &entity.table).await?;
                for field in entity.stored_fields() {
                    if existing.iter().any(|c| c == &field.name) {
                        continue;
                    }
                    let sql = format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        entity.table,
                        column_def(entity, &field.name)
                    );
                    debug!(sql = %sql, "Adding missing column");
                    sqlx::query(&sql).execute(&self.pool).await?;
                    result.columns_added.push((entity.table.clone(), field.name.clone()));
                }
            } else {
                let sql = create_table_sql(entity, registry);
                debug!(sql = %sql, "Creating table");
                sqlx::query(&sql).execute(&self.pool).await?;
                result.tables_created.push(entity.table.clone());
            }

            for index_sql in create_index_sql(entity) {
                sqlx::query(&index_sql).execute(&self.pool).await?;
            }
        }

        if !result.tables_created.is_empty() || !result.columns_added.is_empty() {
            info!(
                tables = result.tables_created.len(),
                columns = result.columns_added.len(),
                "Schema sync complete"
            );
        }

        Ok(result)
    }
}

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<(String, String)>,
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as(&format!("PRAGMA table_info({table})"))
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

fn column_def(entity: &EntityDescriptor, name: &str) -> String {
    let field = entity
        .field_named(name)
        .expect("column_def called with undeclared field");

    let mut sql = format!("{} {}", field.name, field.kind.sql_type());
    if field.name == entity.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else {
        if !field.nullable {
            sql.push_str(" NOT NULL");
        }
        if field.unique {
            sql.push_str(" UNIQUE");
        }
    }
    sql
}

/// CREATE TABLE statement for one entity, with foreign keys for its to-one
/// relations (skipped when the target entity is not registered).
fn create_table_sql(entity: &EntityDescriptor, registry: &MetaRegistry) -> String {
    let mut defs: Vec<String> = entity
        .stored_fields()
        .map(|f| column_def(entity, &f.name))
        .collect();

    for rel in &entity.relations {
        if let Cardinality::ToOne { fk_field, .. } = &rel.cardinality {
            if let Some(target) = registry.get(&rel.target) {
                defs.push(format!(
                    "FOREIGN KEY ({fk_field}) REFERENCES {} ({})",
                    target.table, target.primary_key
                ));
            }
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        entity.table,
        defs.join(",\n  ")
    )
}

fn create_index_sql(entity: &EntityDescriptor) -> Vec<String> {
    entity
        .stored_fields()
        .filter(|f| f.indexed && f.name != entity.primary_key)
        .map(|f| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                entity.table, f.name, entity.table, f.name
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::CatalogSource;

    #[test]
    fn create_table_sql_includes_foreign_keys() {
        let registry = MetaRegistry::load(&CatalogSource).unwrap();
        let provincia = registry.get("Provincia").unwrap();
        let sql = create_table_sql(provincia, &registry);

        assert!(sql.contains("id TEXT PRIMARY KEY"));
        assert!(sql.contains("nombre TEXT NOT NULL"));
        assert!(sql.contains(
            "FOREIGN KEY (comunidad_autonoma_id) REFERENCES comunidades_autonomas (id)"
        ));
    }

    #[tokio::test]
    async fn sync_schema_creates_all_catalog_tables() {
        let registry = MetaRegistry::load(&CatalogSource).unwrap();
        let db = Database::connect_memory().await.unwrap();

        let result = db.sync_schema(&registry).await.unwrap();
        assert_eq!(result.tables_created.len(), registry.len());

        // Second sync is a no-op.
        let again = db.sync_schema(&registry).await.unwrap();
        assert!(again.tables_created.is_empty());
        assert!(again.columns_added.is_empty());
    }
}
