//! Relationship Metadata System - entity types and their navigations

use serde::{Deserialize, Serialize};

use super::collection::DeclaredCollectionType;
use crate::error::{ShapeError, ShapeResult};

/// Defines the type of relationship a navigation represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// One-to-one from the principal side (foreign key on the target)
    HasOne,
    /// One-to-many from the principal side (foreign key on the target)
    HasMany,
    /// Reference from the dependent side (foreign key on the declaring type)
    BelongsTo,
    /// Many-to-many skip navigation through a pivot table
    ManyToMany,
}

impl RelationshipType {
    /// Returns true if this relationship returns a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }

    /// Returns true if this relationship requires a pivot table
    pub fn requires_pivot(self) -> bool {
        matches!(self, Self::ManyToMany)
    }

    /// Returns true if the foreign key lives on the declaring entity
    pub fn is_dependent_side(self) -> bool {
        matches!(self, Self::BelongsTo)
    }
}

/// Foreign key configuration for relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    /// The foreign key column name(s)
    pub columns: Vec<String>,

    /// Whether this is a composite foreign key
    pub is_composite: bool,

    /// The entity type where the foreign key is located
    pub table: String,
}

impl ForeignKeyConfig {
    /// Create a simple foreign key configuration
    pub fn simple(column: String, table: String) -> Self {
        Self {
            columns: vec![column],
            is_composite: false,
            table,
        }
    }

    /// Create a composite foreign key configuration
    pub fn composite(columns: Vec<String>, table: String) -> Self {
        Self {
            columns,
            is_composite: true,
            table,
        }
    }

    /// Validate the foreign key configuration
    pub fn validate(&self) -> ShapeResult<()> {
        if self.columns.is_empty() {
            return Err(ShapeError::InvalidModel(
                "Foreign key configuration must have at least one column".to_string(),
            ));
        }

        if self.is_composite && self.columns.len() < 2 {
            return Err(ShapeError::InvalidModel(
                "Composite foreign key must have at least 2 columns".to_string(),
            ));
        }

        if self.table.is_empty() {
            return Err(ShapeError::InvalidModel(
                "Foreign key configuration must specify a table".to_string(),
            ));
        }

        Ok(())
    }
}

/// Pivot table configuration for many-to-many navigations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotConfig {
    /// The pivot table name
    pub table: String,

    /// Pivot column referencing the declaring entity's key
    pub local_key: String,

    /// Pivot column referencing the target entity's key
    pub foreign_key: String,
}

impl PivotConfig {
    /// Create a new pivot configuration
    pub fn new(table: String, local_key: String, foreign_key: String) -> Self {
        Self {
            table,
            local_key,
            foreign_key,
        }
    }

    /// The same pivot seen from the other side of the relationship
    pub fn reversed(&self) -> Self {
        Self {
            table: self.table.clone(),
            local_key: self.foreign_key.clone(),
            foreign_key: self.local_key.clone(),
        }
    }

    /// Validate the pivot configuration
    pub fn validate(&self) -> ShapeResult<()> {
        if self.table.is_empty() {
            return Err(ShapeError::InvalidModel(
                "Pivot table name cannot be empty".to_string(),
            ));
        }

        if self.local_key.is_empty() || self.foreign_key.is_empty() {
            return Err(ShapeError::InvalidModel(
                "Pivot keys cannot be empty".to_string(),
            ));
        }

        if self.local_key == self.foreign_key {
            return Err(ShapeError::InvalidModel(
                "Pivot local key and foreign key must be different".to_string(),
            ));
        }

        Ok(())
    }
}

/// Metadata for one navigation property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    /// Navigation (property) name
    pub name: String,

    /// Entity type declaring the navigation
    pub declaring_type: String,

    /// Entity type the navigation points at
    pub target_type: String,

    /// The type of relationship
    pub relationship_type: RelationshipType,

    /// Foreign key configuration
    pub foreign_key: ForeignKeyConfig,

    /// Pivot configuration for many-to-many navigations
    pub pivot: Option<PivotConfig>,

    /// Name of the inverse navigation on the target type
    pub inverse: Option<String>,

    /// Whether a reference navigation is required
    pub required: bool,

    /// Whether this navigation is eagerly loaded automatically
    pub auto_include: bool,

    /// Declared collection type for collection navigations
    pub collection_type: DeclaredCollectionType,
}

impl Navigation {
    fn new(
        relationship_type: RelationshipType,
        declaring_type: &str,
        name: &str,
        target_type: &str,
        foreign_key: ForeignKeyConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            declaring_type: declaring_type.to_string(),
            target_type: target_type.to_string(),
            relationship_type,
            foreign_key,
            pivot: None,
            inverse: None,
            required: false,
            auto_include: false,
            collection_type: DeclaredCollectionType::List,
        }
    }

    /// Principal-side reference; `fk_column` lives on the target
    pub fn has_one(declaring_type: &str, name: &str, target_type: &str, fk_column: &str) -> Self {
        let fk = ForeignKeyConfig::simple(fk_column.to_string(), target_type.to_string());
        Self::new(RelationshipType::HasOne, declaring_type, name, target_type, fk)
    }

    /// Principal-side collection; `fk_column` lives on the target
    pub fn has_many(declaring_type: &str, name: &str, target_type: &str, fk_column: &str) -> Self {
        let fk = ForeignKeyConfig::simple(fk_column.to_string(), target_type.to_string());
        Self::new(RelationshipType::HasMany, declaring_type, name, target_type, fk)
    }

    /// Dependent-side reference; `fk_column` lives on the declaring type
    pub fn belongs_to(
        declaring_type: &str,
        name: &str,
        target_type: &str,
        fk_column: &str,
    ) -> Self {
        let fk = ForeignKeyConfig::simple(fk_column.to_string(), declaring_type.to_string());
        Self::new(RelationshipType::BelongsTo, declaring_type, name, target_type, fk)
    }

    /// Many-to-many skip navigation through a pivot table
    pub fn many_to_many(
        declaring_type: &str,
        name: &str,
        target_type: &str,
        pivot: PivotConfig,
    ) -> Self {
        let fk = ForeignKeyConfig::simple(pivot.local_key.clone(), pivot.table.clone());
        let mut navigation =
            Self::new(RelationshipType::ManyToMany, declaring_type, name, target_type, fk);
        navigation.pivot = Some(pivot);
        navigation
    }

    /// Replace the foreign key configuration (composite keys)
    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyConfig) -> Self {
        self.foreign_key = foreign_key;
        self
    }

    /// Set the inverse navigation name
    pub fn with_inverse(mut self, inverse: &str) -> Self {
        self.inverse = Some(inverse.to_string());
        self
    }

    /// Configure automatic eager loading
    pub fn with_auto_include(mut self, auto_include: bool) -> Self {
        self.auto_include = auto_include;
        self
    }

    /// Mark a reference navigation as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the declared collection type
    pub fn with_collection_type(mut self, collection_type: DeclaredCollectionType) -> Self {
        self.collection_type = collection_type;
        self
    }

    /// `Declaring.Name` display form used in diagnostics
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }

    pub fn is_collection(&self) -> bool {
        self.relationship_type.is_collection()
    }

    /// Skip navigations (many-to-many) have no foreign key of their own
    pub fn is_skip_navigation(&self) -> bool {
        self.relationship_type.requires_pivot()
    }

    /// Check whether `other` is the inverse of this navigation
    pub fn is_inverse_of(&self, other: &Navigation) -> bool {
        other.declaring_type == self.target_type
            && other.target_type == self.declaring_type
            && other.inverse.as_deref() == Some(self.name.as_str())
    }

    /// Validate the navigation metadata for consistency
    pub fn validate(&self) -> ShapeResult<()> {
        if self.name.is_empty() {
            return Err(ShapeError::InvalidModel(format!(
                "Navigation on '{}' must have a name",
                self.declaring_type
            )));
        }

        if self.relationship_type.requires_pivot() && self.pivot.is_none() {
            return Err(ShapeError::InvalidModel(format!(
                "Navigation '{}' of type {:?} requires pivot configuration",
                self.display_name(),
                self.relationship_type
            )));
        }

        if self.required && self.is_collection() {
            return Err(ShapeError::InvalidModel(format!(
                "Collection navigation '{}' cannot be required",
                self.display_name()
            )));
        }

        self.foreign_key.validate()?;

        if let Some(ref pivot) = self.pivot {
            pivot.validate()?;
        }

        Ok(())
    }
}

/// Metadata for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Entity type name
    pub name: String,

    /// Primary key field(s)
    pub primary_key: Vec<String>,

    /// Scalar fields, including key and foreign key fields
    pub fields: Vec<String>,

    /// Navigations in declaration order
    pub navigations: Vec<Navigation>,
}

impl EntityType {
    /// Create an entity type with a single `Id` key
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: vec!["Id".to_string()],
            fields: vec!["Id".to_string()],
            navigations: Vec::new(),
        }
    }

    /// Replace the primary key
    pub fn with_key(mut self, key: &[&str]) -> Self {
        self.primary_key = key.iter().map(|k| k.to_string()).collect();
        for field in key {
            if !self.fields.iter().any(|f| f == field) {
                self.fields.push(field.to_string());
            }
        }
        self.fields.retain(|f| f != "Id" || key.contains(&"Id"));
        self
    }

    /// Add scalar fields
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        for field in fields {
            if !self.fields.iter().any(|f| f == field) {
                self.fields.push(field.to_string());
            }
        }
        self
    }

    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.iter().find(|n| n.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Validate the entity type
    pub fn validate(&self) -> ShapeResult<()> {
        if self.primary_key.is_empty() {
            return Err(ShapeError::InvalidModel(format!(
                "Entity type '{}' must declare a primary key",
                self.name
            )));
        }

        for key in &self.primary_key {
            if !self.has_field(key) {
                return Err(ShapeError::InvalidModel(format!(
                    "Key field '{}' is not a field of '{}'",
                    key, self.name
                )));
            }
        }

        Ok(())
    }
}
