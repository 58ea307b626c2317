//! Store execution: parameterized SQL against SQLite.
//!
//! Accepts a compiled [`Predicate`] plus an operation kind and entity
//! identity, and returns decoded rows. Every statement is parameterized;
//! filter values never reach the SQL text.

use async_graphql::Value;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::meta::{EntityDescriptor, EntityRow, FieldKind};

/// Alias of the outermost table in compiled predicates and list queries.
pub const ROOT_ALIAS: &str = "t0";

/// A value bound to a parameterized query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl SqlValue {
    /// Bind this value to a sqlx query builder
    pub fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Null => query.bind(None::<String>),
        }
    }
}

/// A store-executable boolean condition over an aliased table, compiled from
/// a filter expression.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

impl Predicate {
    /// The neutral predicate (matches every row).
    pub fn always_true() -> Self {
        Self {
            sql: "1=1".to_string(),
            binds: Vec::new(),
        }
    }

    /// The empty predicate (matches no row).
    pub fn always_false() -> Self {
        Self {
            sql: "1=0".to_string(),
            binds: Vec::new(),
        }
    }
}

/// Current UTC time as an ISO-8601 string, the storage format for all
/// timestamp columns.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Columns exposed through the API: stored fields minus opaque ones.
pub fn select_columns(entity: &EntityDescriptor) -> Vec<&str> {
    entity
        .stored_fields()
        .filter(|f| f.kind != FieldKind::Opaque)
        .map(|f| f.name.as_str())
        .collect()
}

fn select_sql(entity: &EntityDescriptor) -> String {
    let columns: Vec<String> = select_columns(entity)
        .iter()
        .map(|c| format!("{ROOT_ALIAS}.{c}"))
        .collect();
    format!(
        "SELECT {} FROM {} AS {ROOT_ALIAS}",
        columns.join(", "),
        entity.table
    )
}

/// Decode a SQLite row into an [`EntityRow`] using the descriptor's kinds.
pub fn decode_row(entity: &EntityDescriptor, row: &SqliteRow) -> Result<EntityRow, sqlx::Error> {
    let mut out = EntityRow::new();

    for field in entity.stored_fields() {
        let name = field.name.as_str();
        let value = match &field.kind {
            FieldKind::Opaque => continue,
            FieldKind::Id | FieldKind::Text | FieldKind::Timestamp | FieldKind::Enum { .. } => row
                .try_get::<Option<String>, _>(name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            FieldKind::Integer => row
                .try_get::<Option<i64>, _>(name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            FieldKind::Boolean => row
                .try_get::<Option<i64>, _>(name)?
                .map(|v| Value::Boolean(v != 0))
                .unwrap_or(Value::Null),
            FieldKind::Float | FieldKind::Decimal => row
                .try_get::<Option<f64>, _>(name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        out.insert(name, value);
    }

    Ok(out)
}

/// Select rows matching a predicate, with optional ordering and paging.
pub async fn select_rows(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
    predicate: Option<&Predicate>,
    order_by: Option<&str>,
    limit: Option<i64>,
    offset: i64,
) -> Result<Vec<EntityRow>, sqlx::Error> {
    let mut sql = select_sql(entity);
    let empty: Vec<SqlValue> = Vec::new();
    let binds = match predicate {
        Some(p) => {
            sql.push_str(" WHERE ");
            sql.push_str(&p.sql);
            &p.binds
        }
        None => &empty,
    };

    if let Some(column) = order_by {
        sql.push_str(&format!(" ORDER BY {ROOT_ALIAS}.{column} ASC"));
    }
    match (limit, offset) {
        (Some(l), 0) => sql.push_str(&format!(" LIMIT {l}")),
        (Some(l), o) => sql.push_str(&format!(" LIMIT {l} OFFSET {o}")),
        // SQLite requires a LIMIT clause before OFFSET; -1 means unbounded.
        (None, o) if o > 0 => sql.push_str(&format!(" LIMIT -1 OFFSET {o}")),
        (None, _) => {}
    }

    debug!(sql = %sql, "Executing select");
    let mut query = sqlx::query(&sql);
    for value in binds {
        query = value.bind_to_query(query);
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(|r| decode_row(entity, r)).collect()
}

/// Point lookup by primary key.
pub async fn select_by_pk(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
    id: &str,
) -> Result<Option<EntityRow>, sqlx::Error> {
    let sql = format!(
        "{} WHERE {ROOT_ALIAS}.{} = ?",
        select_sql(entity),
        entity.primary_key
    );

    match sqlx::query(&sql).bind(id).fetch_optional(pool).await? {
        Some(row) => Ok(Some(decode_row(entity, &row)?)),
        None => Ok(None),
    }
}

/// Insert one row from (column, value) pairs.
pub async fn insert_row(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
    values: &[(String, SqlValue)],
) -> Result<(), sqlx::Error> {
    let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        entity.table,
        columns.join(", ")
    );

    debug!(sql = %sql, "Executing insert");
    let mut query = sqlx::query(&sql);
    for (_, value) in values {
        query = value.bind_to_query(query);
    }
    query.execute(pool).await?;
    Ok(())
}

/// Apply (column, value) assignments to the row with the given primary key.
/// Returns the number of affected rows.
pub async fn update_by_pk(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
    id: &str,
    sets: &[(String, SqlValue)],
) -> Result<u64, sqlx::Error> {
    if sets.is_empty() {
        return Ok(0);
    }

    let assignments: Vec<String> = sets.iter().map(|(c, _)| format!("{c} = ?")).collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        entity.table,
        assignments.join(", "),
        entity.primary_key
    );

    debug!(sql = %sql, "Executing update");
    let mut query = sqlx::query(&sql);
    for (_, value) in sets {
        query = value.bind_to_query(query);
    }
    let result = query.bind(id).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Delete the row with the given primary key. Returns affected row count.
pub async fn delete_by_pk(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
    id: &str,
) -> Result<u64, sqlx::Error> {
    let sql = format!("DELETE FROM {} WHERE {} = ?", entity.table, entity.primary_key);
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Delete every row matching the predicate inside one transaction, returning
/// the pre-deletion rows. Either the full matched set is deleted or nothing.
pub async fn delete_where(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
    predicate: &Predicate,
) -> Result<Vec<EntityRow>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let select = format!("{} WHERE {}", select_sql(entity), predicate.sql);
    let mut query = sqlx::query(&select);
    for value in &predicate.binds {
        query = value.bind_to_query(query);
    }
    let rows = query.fetch_all(&mut *tx).await?;
    let decoded: Vec<EntityRow> = rows
        .iter()
        .map(|r| decode_row(entity, r))
        .collect::<Result<_, _>>()?;

    // SQLite DELETE does not accept a table alias, so scope the predicate
    // through a subquery on the primary key.
    let delete = format!(
        "DELETE FROM {table} WHERE {pk} IN (SELECT {ROOT_ALIAS}.{pk} FROM {table} AS {ROOT_ALIAS} WHERE {pred})",
        table = entity.table,
        pk = entity.primary_key,
        pred = predicate.sql
    );
    debug!(sql = %delete, "Executing bulk delete");
    let mut query = sqlx::query(&delete);
    for value in &predicate.binds {
        query = value.bind_to_query(query);
    }
    query.execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(decoded)
}
