//! Audited-entity schema registry.
//!
//! Criteria and reconstruction are validated against these descriptors
//! instead of inspecting live mapped types at runtime: attribute and
//! association names a criterion references must be declared here, and
//! lookups fail with a compilation error before any storage is touched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AnnalError, AnnalResult};

/// Which end of a many-to-many association this collection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionSide {
    /// The side whose changes produce membership events. Events are stored
    /// with this entity as the owner.
    Owning,
    /// The referencing side. Membership is reconstructed from the owning
    /// side's events, read from this entity's perspective.
    Inverse,
}

/// One collection-valued association declared on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Association name on this entity, e.g. `references`.
    pub name: String,
    /// Entity type the collection contains.
    pub element_type: String,
    /// Owning or inverse end.
    pub side: CollectionSide,
}

/// Audited attributes and associations of one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity type name, e.g. `Order`.
    pub name: String,
    /// Audited scalar attribute names.
    pub fields: Vec<String>,
    /// Audited collection-valued associations.
    pub collections: Vec<CollectionDescriptor>,
}

impl EntityDescriptor {
    /// Create a descriptor with no attributes or associations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Builder: declare an audited scalar attribute.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    /// Builder: declare the owning side of a many-to-many association.
    pub fn owned_collection(
        mut self,
        name: impl Into<String>,
        element_type: impl Into<String>,
    ) -> Self {
        self.collections.push(CollectionDescriptor {
            name: name.into(),
            element_type: element_type.into(),
            side: CollectionSide::Owning,
        });
        self
    }

    /// Builder: declare the inverse (referencing) side of a many-to-many
    /// association whose owning side lives on `element_type`.
    pub fn inverse_collection(
        mut self,
        name: impl Into<String>,
        element_type: impl Into<String>,
    ) -> Self {
        self.collections.push(CollectionDescriptor {
            name: name.into(),
            element_type: element_type.into(),
            side: CollectionSide::Inverse,
        });
        self
    }

    /// Whether the descriptor declares the given scalar attribute.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Look up a declared association by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// Registry of all audited entity types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSchema {
    entities: HashMap<String, EntityDescriptor>,
}

impl AuditSchema {
    /// Start building a schema.
    pub fn builder() -> AuditSchemaBuilder {
        AuditSchemaBuilder {
            entities: Vec::new(),
        }
    }

    /// Look up an entity descriptor, failing with a compilation error when
    /// the type is not registered.
    pub fn entity(&self, entity_type: &str) -> AnnalResult<&EntityDescriptor> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| AnnalError::unknown_entity(entity_type))
    }

}

/// Builder validating the schema as a whole once all entities are declared.
pub struct AuditSchemaBuilder {
    entities: Vec<EntityDescriptor>,
}

impl AuditSchemaBuilder {
    /// Register an entity descriptor.
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Validate and freeze the schema.
    ///
    /// Checks: entity names are unique; every association's element type is
    /// registered; every inverse collection has a matching owning collection
    /// on its element type. Failures are configuration errors - the schema
    /// itself is malformed, not a criterion against it.
    pub fn build(self) -> AnnalResult<AuditSchema> {
        let mut entities: HashMap<String, EntityDescriptor> = HashMap::new();
        for descriptor in self.entities {
            if entities.contains_key(&descriptor.name) {
                return Err(AnnalError::Configuration(format!(
                    "entity type '{}' registered twice",
                    descriptor.name
                )));
            }
            entities.insert(descriptor.name.clone(), descriptor);
        }

        for descriptor in entities.values() {
            for collection in &descriptor.collections {
                let element = entities.get(&collection.element_type).ok_or_else(|| {
                    AnnalError::Configuration(format!(
                        "association '{}.{}' references unregistered entity type '{}'",
                        descriptor.name, collection.name, collection.element_type
                    ))
                })?;

                if collection.side == CollectionSide::Inverse {
                    let has_owning = element.collections.iter().any(|c| {
                        c.side == CollectionSide::Owning && c.element_type == descriptor.name
                    });
                    if !has_owning {
                        return Err(AnnalError::Configuration(format!(
                            "inverse association '{}.{}' has no owning collection on '{}'",
                            descriptor.name, collection.name, collection.element_type
                        )));
                    }
                }
            }
        }

        Ok(AuditSchema { entities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> AuditSchema {
        AuditSchema::builder()
            .entity(
                EntityDescriptor::new("Owning")
                    .field("data")
                    .owned_collection("references", "Owned"),
            )
            .entity(
                EntityDescriptor::new("Owned")
                    .field("data")
                    .inverse_collection("referencing", "Owning"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_registered_entity() {
        let schema = sample_schema();
        let owning = schema.entity("Owning").unwrap();

        assert!(owning.has_field("data"));
        assert!(!owning.has_field("color"));
        assert_eq!(
            owning.collection("references").unwrap().element_type,
            "Owned"
        );
    }

    #[test]
    fn test_unknown_entity_is_compilation_error() {
        let schema = sample_schema();
        let err = schema.entity("Missing").unwrap_err();
        assert!(matches!(err, AnnalError::Compilation { .. }));
    }

    #[test]
    fn test_unregistered_element_type_rejected() {
        let err = AuditSchema::builder()
            .entity(EntityDescriptor::new("A").owned_collection("links", "Ghost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, AnnalError::Configuration(_)));
    }

    #[test]
    fn test_inverse_without_owning_rejected() {
        let err = AuditSchema::builder()
            .entity(EntityDescriptor::new("A"))
            .entity(EntityDescriptor::new("B").inverse_collection("backrefs", "A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, AnnalError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let err = AuditSchema::builder()
            .entity(EntityDescriptor::new("A"))
            .entity(EntityDescriptor::new("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, AnnalError::Configuration(_)));
    }
}
