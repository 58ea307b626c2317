//! Built-in entity catalog for the heritage domain.
//!
//! Each descriptor is the flattened union of the field-group templates it
//! uses (identification, audit, dirección) plus its own fields. Relations
//! are declared in both directions and form cycles on purpose; the type
//! mapper binds them by name.

use std::sync::Arc;

use anyhow::Result;
use async_graphql::Value;

use super::descriptor::{
    EntityDescriptor, EntityRow, FieldDescriptor, FieldKind, RelationDescriptor, audit_fields,
    direccion_fields, ident_fields,
};
use super::registry::ModelSource;

/// Model source backed by the compiled-in catalog.
pub struct CatalogSource;

impl ModelSource for CatalogSource {
    fn load(&self) -> Result<Vec<EntityDescriptor>> {
        Ok(entities())
    }
}

/// All catalog descriptors, one per domain entity.
pub fn entities() -> Vec<EntityDescriptor> {
    vec![
        comunidad_autonoma(),
        provincia(),
        localidad(),
        diocesis(),
        administracion(),
        inmueble(),
    ]
}

fn comunidad_autonoma() -> EntityDescriptor {
    EntityDescriptor {
        name: "ComunidadAutonoma".to_string(),
        plural: Some("ComunidadesAutonomas".to_string()),
        table: "comunidades_autonomas".to_string(),
        primary_key: "id".to_string(),
        default_sort: Some("nombre".to_string()),
        fields: [
            ident_fields(),
            vec![FieldDescriptor::new("nombre", FieldKind::Text).unique().indexed()],
            audit_fields(),
        ]
        .concat(),
        relations: vec![
            RelationDescriptor::to_many("provincias", "Provincia", "comunidad_autonoma_id")
                .back("comunidad_autonoma"),
            RelationDescriptor::to_many("administraciones", "Administracion", "comunidad_autonoma_id")
                .back("comunidad_autonoma"),
        ],
    }
}

fn provincia() -> EntityDescriptor {
    EntityDescriptor {
        name: "Provincia".to_string(),
        plural: None,
        table: "provincias".to_string(),
        primary_key: "id".to_string(),
        default_sort: Some("nombre".to_string()),
        fields: [
            ident_fields(),
            vec![
                FieldDescriptor::new("nombre", FieldKind::Text).indexed(),
                FieldDescriptor::new("comunidad_autonoma_id", FieldKind::Id).indexed(),
            ],
            audit_fields(),
        ]
        .concat(),
        relations: vec![
            RelationDescriptor::to_one("comunidad_autonoma", "ComunidadAutonoma", "comunidad_autonoma_id", false)
                .back("provincias"),
            RelationDescriptor::to_many("localidades", "Localidad", "provincia_id").back("provincia"),
        ],
    }
}

fn localidad() -> EntityDescriptor {
    EntityDescriptor {
        name: "Localidad".to_string(),
        plural: None,
        table: "localidades".to_string(),
        primary_key: "id".to_string(),
        default_sort: Some("nombre".to_string()),
        fields: [
            ident_fields(),
            vec![
                FieldDescriptor::new("nombre", FieldKind::Text).indexed(),
                FieldDescriptor::new("provincia_id", FieldKind::Id).indexed(),
            ],
            audit_fields(),
        ]
        .concat(),
        relations: vec![
            RelationDescriptor::to_one("provincia", "Provincia", "provincia_id", false).back("localidades"),
            RelationDescriptor::to_many("inmuebles", "Inmueble", "localidad_id").back("localidad"),
            RelationDescriptor::to_many("administraciones", "Administracion", "localidad_id").back("localidad"),
        ],
    }
}

fn diocesis() -> EntityDescriptor {
    EntityDescriptor {
        // Invariant plural: listDiocesis, not listDiocesises.
        name: "Diocesis".to_string(),
        plural: None,
        table: "diocesis".to_string(),
        primary_key: "id".to_string(),
        default_sort: Some("nombre".to_string()),
        fields: [
            ident_fields(),
            vec![FieldDescriptor::new("nombre", FieldKind::Text).unique().indexed()],
            audit_fields(),
        ]
        .concat(),
        relations: vec![
            RelationDescriptor::to_many("inmuebles", "Inmueble", "diocesis_id").back("diocesis"),
        ],
    }
}

fn administracion() -> EntityDescriptor {
    EntityDescriptor {
        name: "Administracion".to_string(),
        plural: None,
        table: "administraciones".to_string(),
        primary_key: "id".to_string(),
        default_sort: Some("nombre".to_string()),
        fields: [
            ident_fields(),
            vec![
                FieldDescriptor::new("nombre", FieldKind::Text).indexed(),
                FieldDescriptor::new(
                    "nivel",
                    FieldKind::Enum {
                        values: vec![
                            "estatal".to_string(),
                            "autonomica".to_string(),
                            "local".to_string(),
                        ],
                    },
                ),
                FieldDescriptor::new("comunidad_autonoma_id", FieldKind::Id).nullable().indexed(),
                FieldDescriptor::new("localidad_id", FieldKind::Id).nullable().indexed(),
            ],
            audit_fields(),
        ]
        .concat(),
        relations: vec![
            RelationDescriptor::to_one("comunidad_autonoma", "ComunidadAutonoma", "comunidad_autonoma_id", true)
                .back("administraciones"),
            RelationDescriptor::to_one("localidad", "Localidad", "localidad_id", true)
                .back("administraciones"),
        ],
    }
}

fn inmueble() -> EntityDescriptor {
    EntityDescriptor {
        name: "Inmueble".to_string(),
        plural: None,
        table: "inmuebles".to_string(),
        primary_key: "id".to_string(),
        default_sort: Some("nombre".to_string()),
        fields: [
            ident_fields(),
            vec![
                FieldDescriptor::new("nombre", FieldKind::Text).indexed(),
                FieldDescriptor::new("referencia_catastral", FieldKind::Text).unique().indexed(),
                FieldDescriptor::new("superficie_m2", FieldKind::Decimal).nullable(),
                FieldDescriptor::new("anio_construccion", FieldKind::Integer).nullable(),
                FieldDescriptor::new("protegido", FieldKind::Boolean),
                FieldDescriptor::new(
                    "estado_conservacion",
                    FieldKind::Enum {
                        values: vec![
                            "ruina".to_string(),
                            "deficiente".to_string(),
                            "bueno".to_string(),
                            "excelente".to_string(),
                        ],
                    },
                )
                .nullable(),
                FieldDescriptor::new("localidad_id", FieldKind::Id).indexed(),
                FieldDescriptor::new("diocesis_id", FieldKind::Id).nullable().indexed(),
            ],
            direccion_fields(),
            // Geometry blob: stored, but excluded from the generated API.
            vec![FieldDescriptor::new("geom", FieldKind::Opaque).nullable()],
            vec![FieldDescriptor::computed(
                "direccion_completa",
                FieldKind::Text,
                Arc::new(direccion_completa),
            )],
            audit_fields(),
        ]
        .concat(),
        relations: vec![
            RelationDescriptor::to_one("localidad", "Localidad", "localidad_id", false).back("inmuebles"),
            RelationDescriptor::to_one("diocesis", "Diocesis", "diocesis_id", true).back("inmuebles"),
        ],
    }
}

/// Formatted address from the dirección template columns.
fn direccion_completa(row: &EntityRow) -> Value {
    let mut partes: Vec<String> = Vec::new();

    if let Some(via) = row.get_str("nombre_via") {
        match row.get_str("numero") {
            Some(numero) => partes.push(format!("{via} {numero}")),
            None => partes.push(via.to_string()),
        }
    }
    if let Some(cp) = row.get_str("codigo_postal") {
        partes.push(cp.to_string());
    }

    if partes.is_empty() {
        Value::Null
    } else {
        Value::String(partes.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Value;

    #[test]
    fn catalog_descriptors_are_valid() {
        for entity in entities() {
            assert!(entity.validate().is_ok(), "{} failed validation", entity.name);
        }
    }

    #[test]
    fn relation_targets_resolve_within_catalog() {
        let all = entities();
        for entity in &all {
            for rel in &entity.relations {
                assert!(
                    all.iter().any(|e| e.name == rel.target),
                    "{}.{} points at unknown entity {}",
                    entity.name,
                    rel.name,
                    rel.target
                );
            }
        }
    }

    #[test]
    fn direccion_completa_formats_available_parts() {
        let mut row = EntityRow::new();
        row.insert("nombre_via", Value::String("Calle Mayor".to_string()));
        row.insert("numero", Value::String("12".to_string()));
        row.insert("codigo_postal", Value::String("28013".to_string()));

        assert_eq!(
            direccion_completa(&row),
            Value::String("Calle Mayor 12, 28013".to_string())
        );

        let empty = EntityRow::new();
        assert_eq!(direccion_completa(&empty), Value::Null);
    }
}
