//! Relationship Model - Runtime metadata storage and access

use dashmap::DashMap;
use std::sync::Arc;

use super::collection::DeclaredCollectionType;
use super::metadata::{EntityType, Navigation};
use crate::error::{ShapeError, ShapeResult};

/// Thread-safe registry of entity types and navigations
///
/// The model is populated once by the model-building layer and is read-only
/// to the compiler afterwards; clones share the same storage.
#[derive(Debug, Clone)]
pub struct RelationshipModel {
    /// Map of entity type name -> metadata
    entities: Arc<DashMap<String, EntityType>>,

    /// Auto-include index: entity type -> navigation names in declaration order
    auto_include_index: Arc<DashMap<String, Vec<String>>>,
}

impl Default for RelationshipModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationshipModel {
    /// Create a new empty model
    pub fn new() -> Self {
        Self {
            entities: Arc::new(DashMap::new()),
            auto_include_index: Arc::new(DashMap::new()),
        }
    }

    /// Register an entity type together with any navigations it already declares
    pub fn register_entity(&self, entity: EntityType) -> ShapeResult<()> {
        entity.validate()?;

        let navigations = entity.navigations.clone();
        let name = entity.name.clone();
        self.entities.insert(
            name.clone(),
            EntityType {
                navigations: Vec::new(),
                ..entity
            },
        );
        self.auto_include_index.remove(&name);

        for navigation in navigations {
            self.register_navigation(navigation)?;
        }

        Ok(())
    }

    /// Register a navigation on its declaring entity type
    pub fn register_navigation(&self, navigation: Navigation) -> ShapeResult<()> {
        navigation.validate()?;

        if !navigation.is_collection() && navigation.collection_type != DeclaredCollectionType::List
        {
            return Err(ShapeError::InvalidModel(format!(
                "Reference navigation '{}' cannot declare a collection type",
                navigation.display_name()
            )));
        }

        let mut entity = self
            .entities
            .get_mut(&navigation.declaring_type)
            .ok_or_else(|| {
                ShapeError::InvalidModel(format!(
                    "Navigation '{}' is declared on unknown entity type '{}'",
                    navigation.display_name(),
                    navigation.declaring_type
                ))
            })?;

        if entity.navigation(&navigation.name).is_some() {
            return Err(ShapeError::InvalidModel(format!(
                "Navigation '{}' is already registered",
                navigation.display_name()
            )));
        }

        if navigation.auto_include {
            self.auto_include_index
                .entry(navigation.declaring_type.clone())
                .or_default()
                .push(navigation.name.clone());
        }

        entity.navigations.push(navigation);
        Ok(())
    }

    /// Get entity type metadata by name
    pub fn entity(&self, name: &str) -> Option<EntityType> {
        self.entities.get(name).map(|entry| entry.clone())
    }

    /// Check if an entity type exists
    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Get navigation metadata by declaring type and navigation name
    pub fn navigation(&self, entity_type: &str, name: &str) -> Option<Navigation> {
        self.entities
            .get(entity_type)?
            .navigation(name)
            .cloned()
    }

    /// Resolve a navigation or fail with an include-path error
    pub fn find_navigation(
        &self,
        entity_type: &str,
        name: &str,
        path: &str,
    ) -> ShapeResult<Navigation> {
        if !self.has_entity(entity_type) {
            return Err(ShapeError::InvalidIncludePath {
                path: path.to_string(),
                reason: format!("unknown entity type '{}'", entity_type),
            });
        }

        self.navigation(entity_type, name)
            .ok_or_else(|| ShapeError::InvalidIncludePath {
                path: path.to_string(),
                reason: format!("'{}' has no navigation named '{}'", entity_type, name),
            })
    }

    /// Primary key fields of an entity type
    pub fn primary_key(&self, entity_type: &str) -> ShapeResult<Vec<String>> {
        self.entities
            .get(entity_type)
            .map(|entry| entry.primary_key.clone())
            .ok_or_else(|| {
                ShapeError::InvalidModel(format!("unknown entity type '{}'", entity_type))
            })
    }

    /// Inverse navigation of `navigation`, if one is configured
    pub fn inverse_of(&self, navigation: &Navigation) -> Option<Navigation> {
        let inverse = navigation.inverse.as_deref()?;
        self.navigation(&navigation.target_type, inverse)
    }

    /// Auto-include navigations of an entity type in declaration order
    pub fn auto_include_navigations(&self, entity_type: &str) -> Vec<Navigation> {
        let names = self
            .auto_include_index
            .get(entity_type)
            .map(|names| names.clone())
            .unwrap_or_default();

        names
            .iter()
            .filter_map(|name| self.navigation(entity_type, name))
            .collect()
    }

    /// Validate cross-entity consistency once every type is registered
    pub fn validate(&self) -> ShapeResult<()> {
        for entry in self.entities.iter() {
            for navigation in &entry.navigations {
                let target = self.entity(&navigation.target_type).ok_or_else(|| {
                    ShapeError::InvalidModel(format!(
                        "Navigation '{}' targets unknown entity type '{}'",
                        navigation.display_name(),
                        navigation.target_type
                    ))
                })?;

                if !navigation.is_skip_navigation() {
                    let principal = if navigation.relationship_type.is_dependent_side() {
                        &target
                    } else {
                        &*entry
                    };
                    if principal.primary_key.len() != navigation.foreign_key.columns.len() {
                        return Err(ShapeError::InvalidModel(format!(
                            "Foreign key ({}) of navigation '{}' does not match key ({}) of '{}'",
                            navigation.foreign_key.columns.join(", "),
                            navigation.display_name(),
                            principal.primary_key.join(", "),
                            principal.name
                        )));
                    }
                }

                if let Some(ref inverse_name) = navigation.inverse {
                    let inverse = target.navigation(inverse_name).ok_or_else(|| {
                        ShapeError::InvalidModel(format!(
                            "Inverse '{}.{}' of navigation '{}' does not exist",
                            target.name,
                            inverse_name,
                            navigation.display_name()
                        ))
                    })?;

                    if !inverse.is_inverse_of(navigation) {
                        return Err(ShapeError::InvalidModel(format!(
                            "Navigations '{}' and '{}' do not point at each other",
                            navigation.display_name(),
                            inverse.display_name()
                        )));
                    }

                    if navigation.is_skip_navigation() != inverse.is_skip_navigation() {
                        return Err(ShapeError::InvalidModel(format!(
                            "Skip navigation '{}' must be paired with a skip navigation",
                            navigation.display_name()
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::metadata::{ForeignKeyConfig, PivotConfig};

    fn blog_model() -> RelationshipModel {
        let model = RelationshipModel::new();
        model
            .register_entity(EntityType::new("Blog").with_fields(&["Name"]))
            .unwrap();
        model
            .register_entity(EntityType::new("Post").with_fields(&["BlogId", "Title"]))
            .unwrap();
        model
            .register_navigation(
                Navigation::has_many("Blog", "Posts", "Post", "BlogId")
                    .with_inverse("Blog")
                    .with_auto_include(true),
            )
            .unwrap();
        model
            .register_navigation(
                Navigation::belongs_to("Post", "Blog", "Blog", "BlogId").with_inverse("Posts"),
            )
            .unwrap();
        model
    }

    #[test]
    fn test_register_and_lookup() {
        let model = blog_model();

        assert!(model.has_entity("Blog"));
        assert!(!model.has_entity("Author"));

        let posts = model.navigation("Blog", "Posts").unwrap();
        assert_eq!(posts.target_type, "Post");

        let inverse = model.inverse_of(&posts).unwrap();
        assert_eq!(inverse.display_name(), "Post.Blog");
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_auto_include_index() {
        let model = blog_model();

        let auto = model.auto_include_navigations("Blog");
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].name, "Posts");
        assert!(model.auto_include_navigations("Post").is_empty());
    }

    #[test]
    fn test_find_navigation_unknown() {
        let model = blog_model();
        let error = model.find_navigation("Blog", "Authors", "Authors").unwrap_err();
        assert!(matches!(error, ShapeError::InvalidIncludePath { .. }));
    }

    #[test]
    fn test_duplicate_and_orphan_navigations_rejected() {
        let model = blog_model();

        assert!(model
            .register_navigation(Navigation::has_many("Blog", "Posts", "Post", "BlogId"))
            .is_err());
        assert!(model
            .register_navigation(Navigation::has_many("Author", "Posts", "Post", "AuthorId"))
            .is_err());
    }

    #[test]
    fn test_validate_detects_mismatched_inverse() {
        let model = blog_model();
        model
            .register_entity(EntityType::new("Tag").with_fields(&["Label"]))
            .unwrap();
        model
            .register_navigation(
                Navigation::many_to_many(
                    "Tag",
                    "Posts",
                    "Post",
                    PivotConfig::new("PostTag".into(), "TagId".into(), "PostId".into()),
                )
                .with_inverse("Blog"),
            )
            .unwrap();

        assert!(model.validate().is_err());
    }

    #[test]
    fn test_validate_checks_foreign_key_arity() {
        let line_model = |line: Navigation| {
            let model = RelationshipModel::new();
            model
                .register_entity(
                    EntityType::new("OrderLine")
                        .with_key(&["OrderId", "LineNo"])
                        .with_fields(&["Quantity"]),
                )
                .unwrap();
            model
                .register_entity(EntityType::new("Shipment").with_fields(&["OrderId", "LineNo"]))
                .unwrap();
            model.register_navigation(line).unwrap();
            model
        };

        let simple = line_model(Navigation::belongs_to("Shipment", "Line", "OrderLine", "OrderId"));
        let error = simple.validate().unwrap_err();
        assert!(error.to_string().contains("Shipment.Line"));

        let composite_fk = ForeignKeyConfig::composite(
            vec!["OrderId".to_string(), "LineNo".to_string()],
            "Shipment".to_string(),
        );
        let composite = line_model(
            Navigation::belongs_to("Shipment", "Line", "OrderLine", "OrderId")
                .with_foreign_key(composite_fk),
        );
        assert!(composite.validate().is_ok());
    }

    #[test]
    fn test_validate_detects_unknown_target() {
        let model = RelationshipModel::new();
        model.register_entity(EntityType::new("Blog")).unwrap();
        model
            .register_navigation(Navigation::has_many("Blog", "Posts", "Post", "BlogId"))
            .unwrap();

        assert!(model.validate().is_err());
    }
}
