//! Filter compilation: a filter expression value into a SQL [`Predicate`].
//!
//! Depth-first walk over the filter object. Leaf keys translate operator
//! sets into parameterized comparisons on the aliased column; `_and` / `_or`
//! recurse and conjoin/disjoin; relation keys compile to an EXISTS semi-join
//! scoped by the foreign key, reusing the same algorithm with the related
//! entity's descriptor. Unknown operator keys are rejected, never ignored.

use async_graphql::Value;

use crate::db::executor::{Predicate, ROOT_ALIAS, SqlValue};
use crate::meta::{Cardinality, EntityDescriptor, FieldDescriptor, FieldKind, MetaRegistry};

use super::errors::ApiError;
use super::filters::{AND_KEY, OR_KEY, allowed_ops};

/// Compiler limits; nesting depth counts combinators and relation hops.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_depth: 10 }
    }
}

/// Compile a filter expression against an entity descriptor.
///
/// The produced predicate references the outer table as `t0`; compiling the
/// same expression twice yields the same SQL and binds.
pub fn compile_filter(
    filter: &Value,
    entity: &EntityDescriptor,
    registry: &MetaRegistry,
    opts: CompileOptions,
) -> Result<Predicate, ApiError> {
    let mut compiler = Compiler {
        registry,
        opts,
        next_alias: 1,
    };
    compiler.compile(filter, entity, ROOT_ALIAS, 0)
}

struct Compiler<'a> {
    registry: &'a MetaRegistry,
    opts: CompileOptions,
    next_alias: usize,
}

impl Compiler<'_> {
    fn compile(
        &mut self,
        filter: &Value,
        entity: &EntityDescriptor,
        alias: &str,
        depth: usize,
    ) -> Result<Predicate, ApiError> {
        if depth > self.opts.max_depth {
            return Err(ApiError::InvalidArgument(format!(
                "filter nesting exceeds the maximum depth of {}",
                self.opts.max_depth
            )));
        }

        let Value::Object(map) = filter else {
            return Err(ApiError::InvalidFilter(format!(
                "filter for {} must be an object",
                entity.name
            )));
        };

        let mut parts: Vec<String> = Vec::new();
        let mut binds: Vec<SqlValue> = Vec::new();

        for (key, value) in map {
            if matches!(value, Value::Null) {
                continue;
            }

            if key == AND_KEY || key == OR_KEY {
                let (sql, sub_binds) =
                    self.combinator(key.as_str(), value, entity, alias, depth)?;
                parts.push(sql);
                binds.extend(sub_binds);
            } else if let Some(field) = entity.field_named(key).filter(|f| f.is_filterable()) {
                let (sql, field_binds) = field_conditions(field, value, alias)?;
                parts.push(sql);
                binds.extend(field_binds);
            } else if let Some(rel) = entity.relation_named(key) {
                let rel = rel.clone();
                let (sql, rel_binds) = self.relation_exists(entity, &rel, value, alias, depth)?;
                parts.push(sql);
                binds.extend(rel_binds);
            } else {
                return Err(ApiError::InvalidFilter(format!(
                    "{}: unknown filter key {key}",
                    entity.name
                )));
            }
        }

        if parts.is_empty() {
            return Ok(Predicate::always_true());
        }

        Ok(Predicate {
            sql: parts.join(" AND "),
            binds,
        })
    }

    /// `_and` conjoins its children (empty list is the neutral predicate);
    /// `_or` disjoins (empty list matches nothing).
    fn combinator(
        &mut self,
        key: &str,
        value: &Value,
        entity: &EntityDescriptor,
        alias: &str,
        depth: usize,
    ) -> Result<(String, Vec<SqlValue>), ApiError> {
        let Value::List(children) = value else {
            return Err(ApiError::InvalidFilter(format!("{key} must be a list")));
        };

        if children.is_empty() {
            let neutral = if key == AND_KEY {
                Predicate::always_true()
            } else {
                Predicate::always_false()
            };
            return Ok((neutral.sql, neutral.binds));
        }

        let mut parts: Vec<String> = Vec::new();
        let mut binds: Vec<SqlValue> = Vec::new();
        for child in children {
            let sub = self.compile(child, entity, alias, depth + 1)?;
            parts.push(format!("({})", sub.sql));
            binds.extend(sub.binds);
        }

        let joiner = if key == AND_KEY { " AND " } else { " OR " };
        Ok((format!("({})", parts.join(joiner)), binds))
    }

    /// Relation-nested filter: EXISTS over the target table scoped by the
    /// foreign-key relationship, compiled with the target's descriptor.
    fn relation_exists(
        &mut self,
        entity: &EntityDescriptor,
        rel: &crate::meta::RelationDescriptor,
        value: &Value,
        alias: &str,
        depth: usize,
    ) -> Result<(String, Vec<SqlValue>), ApiError> {
        let Some(target) = self.registry.get(&rel.target) else {
            return Err(ApiError::InvalidFilter(format!(
                "{}: relation {} targets an unavailable entity",
                entity.name, rel.name
            )));
        };
        let target = target.clone();

        let sub_alias = format!("t{}", self.next_alias);
        self.next_alias += 1;

        let sub = self.compile(value, &target, &sub_alias, depth + 1)?;
        let join = match &rel.cardinality {
            Cardinality::ToOne { fk_field, .. } => format!(
                "{sub_alias}.{} = {alias}.{fk_field}",
                target.primary_key
            ),
            Cardinality::ToMany { fk_on_target } => format!(
                "{sub_alias}.{fk_on_target} = {alias}.{}",
                entity.primary_key
            ),
        };

        let sql = format!(
            "EXISTS (SELECT 1 FROM {} AS {sub_alias} WHERE {join} AND ({}))",
            target.table, sub.sql
        );
        Ok((sql, sub.binds))
    }
}

/// Translate one field's operator-set object into SQL conditions.
fn field_conditions(
    field: &FieldDescriptor,
    value: &Value,
    alias: &str,
) -> Result<(String, Vec<SqlValue>), ApiError> {
    let Value::Object(ops) = value else {
        return Err(ApiError::InvalidFilter(format!(
            "{}: expected an operator object",
            field.name
        )));
    };

    let allowed = allowed_ops(&field.kind);
    let column = format!("{alias}.{}", field.name);
    let mut parts: Vec<String> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();

    for (op, v) in ops {
        if matches!(v, Value::Null) {
            continue;
        }
        if !allowed.contains(&op.as_str()) {
            return Err(ApiError::InvalidFilter(format!(
                "unknown operator {op} for field {}",
                field.name
            )));
        }

        match op.as_str() {
            "eq" => {
                parts.push(format!("{column} = ?"));
                binds.push(bind_scalar(field, v)?);
            }
            "ne" => {
                parts.push(format!("{column} <> ?"));
                binds.push(bind_scalar(field, v)?);
            }
            "gt" | "gte" | "lt" | "lte" => {
                let cmp = match op.as_str() {
                    "gt" => ">",
                    "gte" => ">=",
                    "lt" => "<",
                    _ => "<=",
                };
                parts.push(format!("{column} {cmp} ?"));
                binds.push(bind_scalar(field, v)?);
            }
            "in" | "notIn" => {
                let Value::List(items) = v else {
                    return Err(ApiError::InvalidFilter(format!(
                        "{}.{op} must be a list",
                        field.name
                    )));
                };
                if items.is_empty() {
                    // IN over nothing matches no row; NOT IN matches all.
                    parts.push(if op == "in" { "1=0" } else { "1=1" }.to_string());
                    continue;
                }
                let placeholders = vec!["?"; items.len()].join(", ");
                let keyword = if op == "in" { "IN" } else { "NOT IN" };
                parts.push(format!("{column} {keyword} ({placeholders})"));
                for item in items {
                    binds.push(bind_scalar(field, item)?);
                }
            }
            "isNull" => {
                let Value::Boolean(b) = v else {
                    return Err(ApiError::InvalidFilter(format!(
                        "{}.isNull must be a boolean",
                        field.name
                    )));
                };
                parts.push(if *b {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} IS NOT NULL")
                });
            }
            "like" => {
                parts.push(format!("{column} LIKE ?"));
                binds.push(bind_scalar(field, v)?);
            }
            "ilike" => {
                parts.push(format!("lower({column}) LIKE lower(?)"));
                binds.push(bind_scalar(field, v)?);
            }
            "contains" => {
                parts.push(format!("{column} LIKE '%' || ? || '%'"));
                binds.push(bind_scalar(field, v)?);
            }
            "startsWith" => {
                parts.push(format!("{column} LIKE ? || '%'"));
                binds.push(bind_scalar(field, v)?);
            }
            "endsWith" => {
                parts.push(format!("{column} LIKE '%' || ?"));
                binds.push(bind_scalar(field, v)?);
            }
            _ => unreachable!("operator {op} passed the allow-list"),
        }
    }

    if parts.is_empty() {
        let neutral = Predicate::always_true();
        return Ok((neutral.sql, neutral.binds));
    }

    Ok((parts.join(" AND "), binds))
}

/// Coerce a filter value into a bind for the field's kind.
pub(crate) fn bind_scalar(field: &FieldDescriptor, value: &Value) -> Result<SqlValue, ApiError> {
    match (&field.kind, value) {
        (
            FieldKind::Id | FieldKind::Text | FieldKind::Timestamp | FieldKind::Enum { .. },
            Value::String(s),
        ) => Ok(SqlValue::Text(s.clone())),
        (FieldKind::Integer, Value::Number(n)) => n
            .as_i64()
            .map(SqlValue::Int)
            .ok_or_else(|| ApiError::InvalidFilter(format!("{}: expected an integer", field.name))),
        (FieldKind::Float | FieldKind::Decimal, Value::Number(n)) => n
            .as_f64()
            .map(SqlValue::Float)
            .ok_or_else(|| ApiError::InvalidFilter(format!("{}: expected a number", field.name))),
        (FieldKind::Boolean, Value::Boolean(b)) => Ok(SqlValue::Bool(*b)),
        _ => Err(ApiError::InvalidFilter(format!(
            "{}: value does not match the field kind",
            field.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{CatalogSource, MetaRegistry};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> MetaRegistry {
        MetaRegistry::load(&CatalogSource).unwrap()
    }

    fn filter(json: serde_json::Value) -> Value {
        Value::from_json(json).unwrap()
    }

    fn compile(registry: &MetaRegistry, entity: &str, json: serde_json::Value) -> Result<Predicate, ApiError> {
        let entity = registry.get(entity).unwrap().clone();
        compile_filter(&filter(json), &entity, registry, CompileOptions::default())
    }

    #[test]
    fn leaf_operators_translate_to_comparisons() {
        let registry = registry();
        let p = compile(
            &registry,
            "Inmueble",
            json!({"nombre": {"eq": "Catedral"}, "anio_construccion": {"gte": 1200}}),
        )
        .unwrap();

        assert!(p.sql.contains("t0.nombre = ?"));
        assert!(p.sql.contains("t0.anio_construccion >= ?"));
        // Key order is not part of the contract; the binds just have to
        // pair up with their placeholders.
        assert_eq!(p.binds.len(), 2);
        assert!(p.binds.contains(&SqlValue::Text("Catedral".to_string())));
        assert!(p.binds.contains(&SqlValue::Int(1200)));
    }

    #[test]
    fn enum_fields_take_ordered_comparisons() {
        let registry = registry();
        let p = compile(
            &registry,
            "Inmueble",
            json!({"estado_conservacion": {"gt": "bueno"}}),
        )
        .unwrap();

        assert_eq!(p.sql, "t0.estado_conservacion > ?");
        assert_eq!(p.binds, vec![SqlValue::Text("bueno".to_string())]);
    }

    #[test]
    fn boolean_fields_take_set_membership() {
        let registry = registry();
        let p = compile(&registry, "Inmueble", json!({"protegido": {"in": [true]}})).unwrap();

        assert_eq!(p.sql, "t0.protegido IN (?)");
        assert_eq!(p.binds, vec![SqlValue::Bool(true)]);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let registry = registry();
        let err = compile(&registry, "Inmueble", json!({"nombre": {"regexx": "x"}})).unwrap_err();
        assert_matches!(err, ApiError::InvalidFilter(_));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let registry = registry();
        let err = compile(&registry, "Inmueble", json!({"no_such": {"eq": 1}})).unwrap_err();
        assert_matches!(err, ApiError::InvalidFilter(_));
    }

    #[test]
    fn computed_fields_are_not_filterable() {
        let registry = registry();
        let err = compile(
            &registry,
            "Inmueble",
            json!({"direccion_completa": {"eq": "x"}}),
        )
        .unwrap_err();
        assert_matches!(err, ApiError::InvalidFilter(_));
    }

    #[test]
    fn empty_combinators_compile_to_neutral_predicates() {
        let registry = registry();
        let p = compile(&registry, "Provincia", json!({"_and": []})).unwrap();
        assert_eq!(p.sql, "1=1");

        let p = compile(&registry, "Provincia", json!({"_or": []})).unwrap();
        assert_eq!(p.sql, "1=0");
    }

    #[test]
    fn combinators_nest() {
        let registry = registry();
        let p = compile(
            &registry,
            "Provincia",
            json!({"_or": [{"nombre": {"eq": "Burgos"}}, {"nombre": {"eq": "Soria"}}]}),
        )
        .unwrap();

        assert_eq!(p.sql, "((t0.nombre = ?) OR (t0.nombre = ?))");
        assert_eq!(p.binds.len(), 2);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let registry = registry();
        let p = compile(&registry, "Provincia", json!({"nombre": {"in": []}})).unwrap();
        assert_eq!(p.sql, "1=0");
    }

    #[test]
    fn relation_filter_compiles_to_exists() {
        let registry = registry();
        let p = compile(
            &registry,
            "Localidad",
            json!({"provincia": {"nombre": {"eq": "Burgos"}}}),
        )
        .unwrap();

        assert_eq!(
            p.sql,
            "EXISTS (SELECT 1 FROM provincias AS t1 WHERE t1.id = t0.provincia_id AND (t1.nombre = ?))"
        );
    }

    #[test]
    fn to_many_relation_joins_on_target_fk() {
        let registry = registry();
        let p = compile(
            &registry,
            "Provincia",
            json!({"localidades": {"nombre": {"like": "%burgo%"}}}),
        )
        .unwrap();

        assert!(p.sql.contains("FROM localidades AS t1"));
        assert!(p.sql.contains("t1.provincia_id = t0.id"));
    }

    #[test]
    fn nesting_beyond_limit_is_rejected() {
        let registry = registry();
        let mut nested = json!({"nombre": {"eq": "x"}});
        for _ in 0..12 {
            nested = json!({ "_and": [nested] });
        }
        let err = compile(&registry, "Provincia", nested).unwrap_err();
        assert_matches!(err, ApiError::InvalidArgument(_));
    }

    #[test]
    fn malformed_leaf_shape_is_rejected() {
        let registry = registry();
        let err = compile(&registry, "Provincia", json!({"nombre": "Burgos"})).unwrap_err();
        assert_matches!(err, ApiError::InvalidFilter(_));
    }

    #[test]
    fn compilation_is_deterministic() {
        let registry = registry();
        let shape = json!({"_and": [{"nombre": {"ilike": "%real%"}}, {"protegido": {"eq": true}}]});
        let a = compile(&registry, "Inmueble", shape.clone()).unwrap();
        let b = compile(&registry, "Inmueble", shape).unwrap();
        assert_eq!(a.sql, b.sql);
        assert_eq!(a.binds, b.binds);
    }
}
