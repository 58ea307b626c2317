//! Filter input synthesis.
//!
//! Every entity gets a `<Name>FilterInput` with one operator-set sub-input
//! per filterable field, a nested filter per relation, and self-referential
//! `_and` / `_or` combinators. The operator-set inputs are shared across
//! entities and registered once per schema build.
//!
//! The operator tables here are the single source of truth: the filter
//! compiler validates incoming operator keys against the same lists the
//! synthesizer exposes, so the two cannot drift apart.

use async_graphql::dynamic::{InputObject, InputValue, TypeRef};

use crate::meta::{EntityDescriptor, FieldKind, MetaRegistry};

/// Combinator keys on every filter input.
pub const AND_KEY: &str = "_and";
pub const OR_KEY: &str = "_or";

/// Operators available on every filterable scalar kind.
const OPS_BASE: &[&str] = &["eq", "ne", "in", "notIn", "isNull"];
/// Additional operators for ordered scalars.
const OPS_ORDERED: &[&str] = &["gt", "gte", "lt", "lte"];
/// Additional operators for string-valued fields.
const OPS_STRING: &[&str] = &["like", "ilike", "contains", "startsWith", "endsWith"];

/// GraphQL name of an entity's filter input type.
pub fn filter_input_name(entity_name: &str) -> String {
    format!("{entity_name}FilterInput")
}

/// Name of the shared operator-set input for a field kind; `None` for kinds
/// excluded from filtering.
pub fn ops_input_name(kind: &FieldKind) -> Option<&'static str> {
    match kind {
        FieldKind::Id => Some("IdFilterOps"),
        FieldKind::Text | FieldKind::Enum { .. } => Some("StringFilterOps"),
        FieldKind::Integer => Some("IntFilterOps"),
        FieldKind::Float | FieldKind::Decimal => Some("FloatFilterOps"),
        FieldKind::Boolean => Some("BooleanFilterOps"),
        FieldKind::Timestamp => Some("DateFilterOps"),
        FieldKind::Opaque => None,
    }
}

/// Operator keys accepted for a field kind, matching the synthesized input.
pub fn allowed_ops(kind: &FieldKind) -> Vec<&'static str> {
    let mut ops = OPS_BASE.to_vec();
    if kind.is_ordered() {
        ops.extend_from_slice(OPS_ORDERED);
    }
    if matches!(kind, FieldKind::Text | FieldKind::Enum { .. }) {
        ops.extend_from_slice(OPS_STRING);
    }
    ops
}

fn ops_input(name: &'static str, scalar: &str, ordered: bool, string_ops: bool) -> InputObject {
    let mut input = InputObject::new(name)
        .field(InputValue::new("eq", TypeRef::named(scalar)))
        .field(InputValue::new("ne", TypeRef::named(scalar)))
        .field(InputValue::new("in", TypeRef::named_nn_list(scalar)))
        .field(InputValue::new("notIn", TypeRef::named_nn_list(scalar)))
        .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)));

    if ordered {
        for op in OPS_ORDERED {
            input = input.field(InputValue::new(*op, TypeRef::named(scalar)));
        }
    }
    if string_ops {
        for op in OPS_STRING {
            input = input.field(InputValue::new(*op, TypeRef::named(TypeRef::STRING)));
        }
    }
    input
}

/// The shared operator-set inputs, one per scalar family.
pub fn operator_inputs() -> Vec<InputObject> {
    vec![
        ops_input("IdFilterOps", TypeRef::ID, false, false),
        ops_input("StringFilterOps", TypeRef::STRING, true, true),
        ops_input("IntFilterOps", TypeRef::INT, true, false),
        ops_input("FloatFilterOps", TypeRef::FLOAT, true, false),
        ops_input("DateFilterOps", TypeRef::STRING, true, false),
        ops_input("BooleanFilterOps", TypeRef::BOOLEAN, false, false),
    ]
}

/// Synthesize the filter input for one entity. Relations whose target is not
/// registered are left out (the target was skipped during schema build).
pub fn filter_input(entity: &EntityDescriptor, registry: &MetaRegistry) -> InputObject {
    let name = filter_input_name(&entity.name);
    let mut input = InputObject::new(name.clone());

    for field in entity.fields.iter().filter(|f| f.is_filterable()) {
        if let Some(ops) = ops_input_name(&field.kind) {
            input = input.field(InputValue::new(field.name.as_str(), TypeRef::named(ops)));
        }
    }

    for rel in &entity.relations {
        if registry.get(&rel.target).is_some() {
            input = input.field(InputValue::new(
                rel.name.as_str(),
                TypeRef::named(filter_input_name(&rel.target)),
            ));
        }
    }

    input
        .field(InputValue::new(AND_KEY, TypeRef::named_nn_list(name.clone())))
        .field(InputValue::new(OR_KEY, TypeRef::named_nn_list(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_operators_on_every_kind() {
        for kind in [
            FieldKind::Id,
            FieldKind::Boolean,
            FieldKind::Integer,
            FieldKind::Text,
            FieldKind::Timestamp,
        ] {
            let ops = allowed_ops(&kind);
            for op in OPS_BASE {
                assert!(ops.contains(op), "{kind:?} missing {op}");
            }
        }
    }

    #[test]
    fn ordered_operators_only_on_ordered_kinds() {
        assert!(allowed_ops(&FieldKind::Integer).contains(&"gt"));
        assert!(allowed_ops(&FieldKind::Timestamp).contains(&"lte"));
        assert!(!allowed_ops(&FieldKind::Boolean).contains(&"gt"));
        assert!(!allowed_ops(&FieldKind::Id).contains(&"lt"));
    }

    /// Every operator the synthesized ops inputs declare must be accepted
    /// by the compiler's allow-list, enum fields included.
    #[test]
    fn enum_fields_accept_the_full_string_operator_set() {
        let ops = allowed_ops(&FieldKind::Enum { values: vec![] });
        for op in ["eq", "ne", "in", "notIn", "isNull", "gt", "gte", "lt", "lte", "like", "ilike"]
        {
            assert!(ops.contains(&op), "enum missing {op}");
        }
    }

    #[test]
    fn string_operators_on_text_and_enum() {
        assert!(allowed_ops(&FieldKind::Text).contains(&"ilike"));
        assert!(
            allowed_ops(&FieldKind::Enum { values: vec![] }).contains(&"like")
        );
        assert!(!allowed_ops(&FieldKind::Integer).contains(&"like"));
    }

    #[test]
    fn opaque_fields_have_no_ops_input() {
        assert!(ops_input_name(&FieldKind::Opaque).is_none());
    }
}
