//! Builds the eager-load tree from chained load directives

use crate::config::{ConfigError, ShapeConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{ShapeError, ShapeResult};
use crate::query::{DirectiveKind, IncludeDirective, IncludeStep};
use crate::relationships::{Navigation, RelationshipModel};

use super::tree::{EagerLoadTree, IncludeOrigin};

/// Position a directive continues from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Root,
    At(String),
    /// The chain was cut by a walk-back; further steps are ignored
    Ignored,
}

/// Returns true when `step` walks back over `incoming`
///
/// A reference step that is the inverse of the navigation it hangs off can
/// only reach the entity the chain came from, which fix-up already wires.
/// A collection inverse may reach more entities (one-to-many round trip from
/// the dependent side) and is accepted.
pub fn is_walk_back(incoming: &Navigation, step: &Navigation) -> bool {
    !step.is_collection()
        && step.declaring_type == incoming.target_type
        && incoming.inverse.as_deref() == Some(step.name.as_str())
}

/// Eager-Load Tree Builder
pub struct EagerLoadTreeBuilder<'a> {
    model: &'a RelationshipModel,
    config: &'a ShapeConfig,
    tree: EagerLoadTree,
    diagnostics: Diagnostics,
    cursor: Cursor,
}

impl<'a> EagerLoadTreeBuilder<'a> {
    pub fn new(
        model: &'a RelationshipModel,
        config: &'a ShapeConfig,
        root_type: &str,
    ) -> ShapeResult<Self> {
        if !model.has_entity(root_type) {
            return Err(ShapeError::InvalidShape(format!(
                "unknown root entity type '{}'",
                root_type
            )));
        }

        Ok(Self {
            model,
            config,
            tree: EagerLoadTree::new(root_type),
            diagnostics: Diagnostics::new(),
            cursor: Cursor::Root,
        })
    }

    /// Apply a list of directives in order
    pub fn apply_all(&mut self, directives: &[IncludeDirective]) -> ShapeResult<()> {
        for directive in directives {
            self.apply(directive)?;
        }
        Ok(())
    }

    /// Apply one directive; `ThenInclude` continues from the previous directive
    pub fn apply(&mut self, directive: &IncludeDirective) -> ShapeResult<()> {
        let mut cursor = match directive.kind {
            DirectiveKind::Include => Cursor::Root,
            DirectiveKind::ThenInclude => self.cursor.clone(),
        };

        for step in &directive.steps {
            if cursor == Cursor::Ignored {
                break;
            }
            cursor = self.add_step(&cursor, step)?;
        }

        self.cursor = cursor;
        Ok(())
    }

    /// Add one step below `at`, returning the position of the new node
    pub fn add_step(&mut self, at: &Cursor, step: &IncludeStep) -> ShapeResult<Cursor> {
        let (parent_path, source_type, incoming) = match at {
            Cursor::Ignored => return Ok(Cursor::Ignored),
            Cursor::Root => (None, self.tree.root_type.clone(), None),
            Cursor::At(path) => {
                let node = self.tree.find(path).ok_or_else(|| ShapeError::InvalidIncludePath {
                    path: path.clone(),
                    reason: "not part of the eager-load tree".to_string(),
                })?;
                (
                    Some(path.clone()),
                    node.target_type().to_string(),
                    Some(node.navigation.clone()),
                )
            }
        };

        let path = match parent_path {
            Some(ref parent) => format!("{}.{}", parent, step.navigation),
            None => step.navigation.clone(),
        };

        let navigation = self
            .model
            .find_navigation(&source_type, &step.navigation, &path)?;

        if let Some(ref incoming) = incoming {
            if is_walk_back(incoming, &navigation) {
                self.diagnostics.warn_or_fail(
                    ShapeError::WalkBackIgnored {
                        navigation: navigation.display_name(),
                        path,
                    },
                    self.config.strict_walk_back,
                )?;
                return Ok(Cursor::Ignored);
            }
        }

        let depth = path.split('.').count();
        if depth > self.config.max_include_depth {
            return Err(ConfigError::validation_failed(format!(
                "include path '{}' is {} levels deep, exceeding max_include_depth {}",
                path, depth, self.config.max_include_depth
            ))
            .into());
        }

        let path = self.tree.add_step(
            parent_path.as_deref(),
            navigation,
            step.filter.clone(),
            IncludeOrigin::Explicit,
        )?;

        Ok(Cursor::At(path))
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn tree(&self) -> &EagerLoadTree {
        &self.tree
    }

    /// Finish building, returning the tree and any warnings
    pub fn build(self) -> (EagerLoadTree, Diagnostics) {
        (self.tree, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::query::Query;
    use crate::relationships::EntityType;

    /// Principal {ManyDependents, SingleDependent}, ManyDependent {Principal,
    /// SingleDependent}, SingleDependent {Principal, ManyDependent}
    fn walk_back_model() -> RelationshipModel {
        let model = RelationshipModel::new();
        model.register_entity(EntityType::new("Principal")).unwrap();
        model
            .register_entity(EntityType::new("ManyDependent").with_fields(&["PrincipalId"]))
            .unwrap();
        model
            .register_entity(
                EntityType::new("SingleDependent").with_fields(&["PrincipalId", "ManyDependentId"]),
            )
            .unwrap();

        for navigation in [
            Navigation::has_many("Principal", "ManyDependents", "ManyDependent", "PrincipalId")
                .with_inverse("Principal"),
            Navigation::has_one("Principal", "SingleDependent", "SingleDependent", "PrincipalId")
                .with_inverse("Principal"),
            Navigation::belongs_to("ManyDependent", "Principal", "Principal", "PrincipalId")
                .with_inverse("ManyDependents"),
            Navigation::has_one(
                "ManyDependent",
                "SingleDependent",
                "SingleDependent",
                "ManyDependentId",
            )
            .with_inverse("ManyDependent"),
            Navigation::belongs_to("SingleDependent", "Principal", "Principal", "PrincipalId")
                .with_inverse("SingleDependent"),
            Navigation::belongs_to(
                "SingleDependent",
                "ManyDependent",
                "ManyDependent",
                "ManyDependentId",
            )
            .with_inverse("SingleDependent"),
        ] {
            model.register_navigation(navigation).unwrap();
        }
        model.validate().unwrap();
        model
    }

    fn build(query: &Query, config: &ShapeConfig) -> ShapeResult<(EagerLoadTree, Diagnostics)> {
        let model = walk_back_model();
        let mut builder = EagerLoadTreeBuilder::new(&model, config, &query.root)?;
        builder.apply_all(&query.directives)?;
        Ok(builder.build())
    }

    #[test]
    fn test_walk_back_through_collection_is_dropped() {
        let query = Query::from("Principal")
            .include("ManyDependents")
            .then_include("Principal.SingleDependent");

        let (tree, diagnostics) = build(&query, &ShapeConfig::default()).unwrap();

        assert_eq!(tree.paths(), vec!["ManyDependents"]);
        assert_eq!(diagnostics.len(), 1);
        let warning = diagnostics.iter().next().unwrap();
        assert_eq!(warning.category, ErrorCategory::WalkBackIgnored);
        assert!(warning.paths.contains(&"ManyDependent.Principal".to_string()));
    }

    #[test]
    fn test_walk_back_through_reference_is_dropped() {
        let query =
            Query::from("Principal").include_path("SingleDependent.Principal.ManyDependents");

        let (tree, diagnostics) = build(&query, &ShapeConfig::default()).unwrap();

        assert_eq!(tree.paths(), vec!["SingleDependent"]);
        assert!(diagnostics
            .iter()
            .any(|d| d.paths.contains(&"SingleDependent.Principal".to_string())));
    }

    #[test]
    fn test_collection_round_trip_is_accepted() {
        let query = Query::from("ManyDependent")
            .include_path("Principal.ManyDependents")
            .then_include("SingleDependent");

        let (tree, diagnostics) = build(&query, &ShapeConfig::default()).unwrap();

        assert!(diagnostics.is_empty());
        assert_eq!(
            tree.paths(),
            vec![
                "Principal",
                "Principal.ManyDependents",
                "Principal.ManyDependents.SingleDependent"
            ]
        );
    }

    #[test]
    fn test_one_to_one_walk_back_is_dropped() {
        let query =
            Query::from("SingleDependent").include_path("ManyDependent.SingleDependent.Principal");

        let (tree, diagnostics) = build(&query, &ShapeConfig::default()).unwrap();

        assert_eq!(tree.paths(), vec!["ManyDependent"]);
        assert!(diagnostics
            .iter()
            .any(|d| d.paths.contains(&"ManyDependent.SingleDependent".to_string())));
    }

    #[test]
    fn test_strict_mode_fails_on_walk_back() {
        let query = Query::from("Principal")
            .include("ManyDependents")
            .then_include("Principal.SingleDependent");

        let error = build(&query, &ShapeConfig::strict()).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::WalkBackIgnored);
        assert!(error.to_string().contains("ManyDependent.Principal"));
    }

    #[test]
    fn test_then_include_after_walk_back_is_ignored() {
        let query = Query::from("Principal")
            .include_path("ManyDependents.Principal")
            .then_include("SingleDependent")
            .then_include("ManyDependent");

        let (tree, diagnostics) = build(&query, &ShapeConfig::default()).unwrap();

        assert_eq!(tree.paths(), vec!["ManyDependents"]);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_unknown_navigation() {
        let query = Query::from("Principal").include("Dependents");
        let error = build(&query, &ShapeConfig::default()).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::InvalidIncludePath);
    }

    #[test]
    fn test_max_depth_guard() {
        let query = Query::from("ManyDependent")
            .include_path("Principal.ManyDependents")
            .then_include("SingleDependent");
        let config = ShapeConfig::default().with_max_include_depth(2);

        let error = build(&query, &config).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Configuration);
    }
}
