//! Declared collection types and the runtime kinds they resolve to

use serde::{Deserialize, Serialize};

use crate::error::{ShapeError, ShapeResult};

/// How a custom collection type can be instantiated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionConstructor {
    /// Parameterless constructor
    Default,
    /// Constructor requiring arguments the materializer cannot supply
    Requires(Vec<String>),
}

/// Collection type declared on a collection navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclaredCollectionType {
    List,
    Set,
    /// Abstract collection interface, backed by a set
    Interface,
    Custom {
        type_name: String,
        constructor: CollectionConstructor,
        set_semantics: bool,
    },
}

impl Default for DeclaredCollectionType {
    fn default() -> Self {
        Self::List
    }
}

impl DeclaredCollectionType {
    /// Custom collection type with a parameterless constructor
    pub fn custom(type_name: &str, set_semantics: bool) -> Self {
        Self::Custom {
            type_name: type_name.to_string(),
            constructor: CollectionConstructor::Default,
            set_semantics,
        }
    }

    /// Custom collection type whose constructor needs the given arguments
    pub fn custom_requiring(type_name: &str, arguments: &[&str]) -> Self {
        Self::Custom {
            type_name: type_name.to_string(),
            constructor: CollectionConstructor::Requires(
                arguments.iter().map(|a| a.to_string()).collect(),
            ),
            set_semantics: false,
        }
    }

    /// Resolve the runtime collection kind for `navigation`
    pub fn resolve(&self, navigation: &str) -> ShapeResult<CollectionKind> {
        match self {
            Self::List => Ok(CollectionKind::List),
            Self::Set | Self::Interface => Ok(CollectionKind::Set),
            Self::Custom {
                type_name,
                constructor,
                set_semantics,
            } => match constructor {
                CollectionConstructor::Default => Ok(CollectionKind::Custom {
                    type_name: type_name.clone(),
                    set_semantics: *set_semantics,
                }),
                CollectionConstructor::Requires(arguments) => {
                    Err(ShapeError::CollectionTypeNotConstructible {
                        navigation: navigation.to_string(),
                        type_name: type_name.clone(),
                        reason: format!(
                            "no parameterless constructor, requires ({})",
                            arguments.join(", ")
                        ),
                    })
                }
            },
        }
    }
}

/// Runtime collection kind used by the materializer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    List,
    Set,
    Custom {
        type_name: String,
        set_semantics: bool,
    },
}

impl CollectionKind {
    /// Set-like kinds deduplicate non-entity members by value
    pub fn is_set(&self) -> bool {
        match self {
            Self::List => false,
            Self::Set => true,
            Self::Custom { set_semantics, .. } => *set_semantics,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::List => "List",
            Self::Set => "HashSet",
            Self::Custom { type_name, .. } => type_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_builtin_kinds() {
        assert_eq!(DeclaredCollectionType::List.resolve("A.Bs").unwrap(), CollectionKind::List);
        assert_eq!(DeclaredCollectionType::Set.resolve("A.Bs").unwrap(), CollectionKind::Set);
        assert_eq!(
            DeclaredCollectionType::Interface.resolve("A.Bs").unwrap(),
            CollectionKind::Set
        );
        assert!(CollectionKind::Set.is_set());
        assert!(!CollectionKind::List.is_set());
    }

    #[test]
    fn test_custom_with_default_constructor() {
        let kind = DeclaredCollectionType::custom("ObservableCollection", false)
            .resolve("Blog.Posts")
            .unwrap();

        assert_eq!(kind.type_name(), "ObservableCollection");
        assert!(!kind.is_set());
    }

    #[test]
    fn test_custom_requiring_arguments_fails() {
        let bag = DeclaredCollectionType::custom_requiring("BoundedBag", &["capacity", "comparer"]);
        let error = bag.resolve("Blog.Posts").unwrap_err();

        assert_eq!(error.category(), ErrorCategory::CollectionTypeNotConstructible);
        assert_eq!(error.paths(), vec!["Blog.Posts"]);
        assert!(error.to_string().contains("BoundedBag"));
    }
}
