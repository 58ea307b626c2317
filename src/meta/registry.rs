//! Entity metadata registry.
//!
//! Loads entity descriptors from a [`ModelSource`] once at startup and
//! exposes a stable, deduplicated name → descriptor table consulted by the
//! type mapper, filter compiler and operation generator.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use super::descriptor::EntityDescriptor;

/// Supplier of entity descriptors. The registry only consumes read access;
/// it never mutates model definitions.
pub trait ModelSource: Send + Sync {
    fn load(&self) -> Result<Vec<EntityDescriptor>>;
}

/// Immutable name → descriptor table, populated once per process.
///
/// Discovery order from the source is not significant; lookups are by name
/// only, and iteration is name-sorted for deterministic diagnostics.
pub struct MetaRegistry {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl MetaRegistry {
    /// Load all descriptors from the source. Duplicate entity names are
    /// dropped with a warning, invalid descriptors are dropped with a
    /// diagnostic; only a failing source is fatal.
    pub fn load(source: &dyn ModelSource) -> Result<Self> {
        let descriptors = source.load()?;
        let mut entities: BTreeMap<String, Arc<EntityDescriptor>> = BTreeMap::new();

        for entity in descriptors {
            if entities.contains_key(&entity.name) {
                warn!(entity = %entity.name, "duplicate entity descriptor dropped");
                continue;
            }
            if let Err(reason) = entity.validate() {
                warn!(entity = %entity.name, %reason, "unmappable entity descriptor skipped");
                continue;
            }
            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        Ok(Self { entities })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::descriptor::{FieldDescriptor, FieldKind, ident_fields};

    struct VecSource(Vec<EntityDescriptor>);

    impl ModelSource for VecSource {
        fn load(&self) -> Result<Vec<EntityDescriptor>> {
            Ok(self.0.clone())
        }
    }

    fn entity(name: &str) -> EntityDescriptor {
        EntityDescriptor {
            name: name.to_string(),
            plural: None,
            table: name.to_lowercase(),
            primary_key: "id".to_string(),
            default_sort: None,
            fields: ident_fields(),
            relations: vec![],
        }
    }

    #[test]
    fn later_duplicates_are_dropped() {
        let mut second = entity("Provincia");
        second.table = "provincias_bis".to_string();
        let source = VecSource(vec![entity("Provincia"), second]);

        let registry = MetaRegistry::load(&source).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Provincia").unwrap().table, "provincia");
    }

    #[test]
    fn invalid_entities_are_skipped_not_fatal() {
        let mut broken = entity("Rota");
        broken.fields = vec![FieldDescriptor::new("nombre", FieldKind::Text)];
        let source = VecSource(vec![broken, entity("Sana")]);

        let registry = MetaRegistry::load(&source).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("Sana").is_some());
        assert!(registry.get("Rota").is_none());
    }

    #[test]
    fn lookup_is_by_name_only() {
        let source = VecSource(vec![entity("Diocesis"), entity("Localidad")]);
        let registry = MetaRegistry::load(&source).unwrap();
        assert!(registry.get("Localidad").is_some());
        assert!(registry.get("localidad").is_none());
    }
}
