//! Projection shapes

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::expr::Filter;

/// How a collection projection is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionTerminal {
    /// The navigation itself, materialized with its declared collection type
    AsNavigation,
    ToList,
    /// First element or null
    First,
    Count,
}

/// Collection-valued sub-projection over a navigation of the enclosing element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionProjection {
    pub navigation: String,
    pub filter: Filter,
    pub element: Projection,
    pub terminal: CollectionTerminal,
}

/// Result shape of a query or of a nested element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// The element entity itself
    Entity,
    /// A scalar field of the element
    Field(String),
    Constant(JsonValue),
    /// Projection through a single-valued navigation
    Reference {
        navigation: String,
        projection: Box<Projection>,
    },
    Collection(Box<CollectionProjection>),
    Record {
        type_name: Option<String>,
        fields: Vec<(String, Projection)>,
    },
}

impl Projection {
    pub fn field(name: &str) -> Self {
        Self::Field(name.to_string())
    }

    pub fn constant(value: impl Into<JsonValue>) -> Self {
        Self::Constant(value.into())
    }

    pub fn reference(navigation: &str, projection: Projection) -> Self {
        Self::Reference {
            navigation: navigation.to_string(),
            projection: Box::new(projection),
        }
    }

    /// Collection projection `e.Navigation.<filter>.Select(element).<terminal>`
    pub fn collection(
        navigation: &str,
        filter: Filter,
        element: Projection,
        terminal: CollectionTerminal,
    ) -> Self {
        Self::Collection(Box::new(CollectionProjection {
            navigation: navigation.to_string(),
            filter,
            element,
            terminal,
        }))
    }

    /// `e.Navigation` materialized with its declared collection type
    pub fn navigation(navigation: &str) -> Self {
        Self::collection(
            navigation,
            Filter::default(),
            Projection::Entity,
            CollectionTerminal::AsNavigation,
        )
    }

    /// `e.Navigation.Count()`
    pub fn count(navigation: &str) -> Self {
        Self::collection(
            navigation,
            Filter::default(),
            Projection::Entity,
            CollectionTerminal::Count,
        )
    }

    /// Anonymous record
    pub fn record(fields: Vec<(&str, Projection)>) -> Self {
        Self::Record {
            type_name: None,
            fields: fields
                .into_iter()
                .map(|(name, projection)| (name.to_string(), projection))
                .collect(),
        }
    }

    /// Record of a named (nominal) type
    pub fn named(type_name: &str, fields: Vec<(&str, Projection)>) -> Self {
        match Self::record(fields) {
            Self::Record { fields, .. } => Self::Record {
                type_name: Some(type_name.to_string()),
                fields,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let projection = Projection::named(
            "CustomerView",
            vec![
                ("Name", Projection::field("Name")),
                ("Orders", Projection::navigation("Orders")),
            ],
        );

        match &projection {
            Projection::Record { type_name, fields } => {
                assert_eq!(type_name.as_deref(), Some("CustomerView"));
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected projection {:?}", other),
        }
    }
}
