//! Typed query shapes handed over by the expression layer
//!
//! A [`Query`] describes the source entity set, its filter, the chained
//! eager-load directives, the projection and an optional grouping. The
//! builder methods mirror the fluent surface callers compose queries with.

use serde::{Deserialize, Serialize};

use crate::expr::{Filter, Lambda};

pub mod grouping;
pub mod projection;

pub use grouping::{Aggregate, AggregateFunction, GroupBy, GroupExpr, GroupKey, GroupOperator};
pub use projection::{CollectionProjection, CollectionTerminal, Projection};

/// Whether a directive starts at the query root or continues the previous chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveKind {
    Include,
    ThenInclude,
}

/// One navigation step of a load directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeStep {
    pub navigation: String,
    pub filter: Option<Filter>,
}

impl IncludeStep {
    pub fn new(navigation: &str) -> Self {
        Self {
            navigation: navigation.to_string(),
            filter: None,
        }
    }

    pub fn filtered(navigation: &str, filter: Filter) -> Self {
        Self {
            navigation: navigation.to_string(),
            filter: Some(filter),
        }
    }
}

/// A chained eager-load directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeDirective {
    pub kind: DirectiveKind,
    pub steps: Vec<IncludeStep>,
}

impl IncludeDirective {
    /// Dotted form of the directive's own steps
    pub fn path(&self) -> String {
        self.steps
            .iter()
            .map(|step| step.navigation.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Query shape over one root entity set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub root: String,
    pub filter: Filter,
    pub directives: Vec<IncludeDirective>,
    pub ignore_auto_includes: bool,
    /// Auto-include navigations (`Type.Navigation`) suppressed for this query
    pub ignored_auto_includes: Vec<String>,
    pub projection: Projection,
    pub group_by: Option<GroupBy>,
}

impl Query {
    /// Start a query over an entity set
    pub fn from(root: &str) -> Self {
        Self {
            root: root.to_string(),
            filter: Filter::default(),
            directives: Vec::new(),
            ignore_auto_includes: false,
            ignored_auto_includes: Vec::new(),
            projection: Projection::Entity,
            group_by: None,
        }
    }

    pub fn where_(mut self, predicate: Lambda) -> Self {
        self.filter = self.filter.where_(predicate);
        self
    }

    pub fn order_by(mut self, key: Lambda) -> Self {
        self.filter = self.filter.order_by(key);
        self
    }

    pub fn order_by_desc(mut self, key: Lambda) -> Self {
        self.filter = self.filter.order_by_desc(key);
        self
    }

    pub fn then_by(mut self, key: Lambda) -> Self {
        self.filter = self.filter.then_by(key);
        self
    }

    pub fn then_by_desc(mut self, key: Lambda) -> Self {
        self.filter = self.filter.then_by_desc(key);
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.filter = self.filter.skip(count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.filter = self.filter.take(count);
        self
    }

    /// Eager-load a navigation of the root entity
    pub fn include(mut self, navigation: &str) -> Self {
        self.directives.push(IncludeDirective {
            kind: DirectiveKind::Include,
            steps: vec![IncludeStep::new(navigation)],
        });
        self
    }

    /// Eager-load a filtered collection navigation of the root entity
    pub fn include_filtered(mut self, navigation: &str, filter: Filter) -> Self {
        self.directives.push(IncludeDirective {
            kind: DirectiveKind::Include,
            steps: vec![IncludeStep::filtered(navigation, filter)],
        });
        self
    }

    /// Eager-load a dotted navigation path starting at the root entity
    pub fn include_path(mut self, path: &str) -> Self {
        self.directives.push(IncludeDirective {
            kind: DirectiveKind::Include,
            steps: path.split('.').map(IncludeStep::new).collect(),
        });
        self
    }

    /// Eager-load a navigation of the entity loaded by the previous directive
    pub fn then_include(mut self, navigation: &str) -> Self {
        self.directives.push(IncludeDirective {
            kind: DirectiveKind::ThenInclude,
            steps: navigation.split('.').map(IncludeStep::new).collect(),
        });
        self
    }

    pub fn then_include_filtered(mut self, navigation: &str, filter: Filter) -> Self {
        self.directives.push(IncludeDirective {
            kind: DirectiveKind::ThenInclude,
            steps: vec![IncludeStep::filtered(navigation, filter)],
        });
        self
    }

    /// Push a prepared directive
    pub fn with_directive(mut self, directive: IncludeDirective) -> Self {
        self.directives.push(directive);
        self
    }

    /// Suppress every auto-include for this query
    pub fn ignore_auto_includes(mut self) -> Self {
        self.ignore_auto_includes = true;
        self
    }

    /// Suppress one auto-include navigation (`Type.Navigation`) for this query
    pub fn ignore_auto_include(mut self, navigation: &str) -> Self {
        self.ignored_auto_includes.push(navigation.to_string());
        self
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn is_grouped(&self) -> bool {
        self.group_by.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_surface() {
        let query = Query::from("Principal")
            .include("ManyDependents")
            .then_include("Principal.SingleDependent")
            .include_path("SingleDependent.Principal");

        assert_eq!(query.directives.len(), 3);
        assert_eq!(query.directives[0].kind, DirectiveKind::Include);
        assert_eq!(query.directives[1].kind, DirectiveKind::ThenInclude);
        assert_eq!(query.directives[1].path(), "Principal.SingleDependent");
        assert_eq!(query.directives[2].steps.len(), 2);
    }

    #[test]
    fn test_auto_include_opt_outs() {
        let query = Query::from("CycleA").ignore_auto_include("CycleB.C");
        assert!(!query.ignore_auto_includes);
        assert_eq!(query.ignored_auto_includes, vec!["CycleB.C"]);
        assert!(Query::from("CycleA").ignore_auto_includes().ignore_auto_includes);
    }
}
