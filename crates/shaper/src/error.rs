//! Error types for the query-shape compiler
//!
//! Every rejection raised while building the eager-load tree, planning
//! correlated collections or translating groupings carries a stable
//! [`ErrorCategory`] together with the offending navigation path(s), so a
//! caller can locate the failing clause in their own query.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for shape compilation and materialization
pub type ShapeResult<T> = Result<T, ShapeError>;

/// Stable, parseable error categories surfaced by the diagnostics layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    WalkBackIgnored,
    AutoIncludeCycle,
    ConflictingFilteredInclude,
    GroupingEscaped,
    UnsupportedFilterPosition,
    CollectionTypeNotConstructible,
    InvalidIncludeFilter,
    InvalidIncludePath,
    InvalidShape,
    InvalidModel,
    Materialization,
    Execution,
    Configuration,
}

impl ErrorCategory {
    /// Kebab-case name of the category
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WalkBackIgnored => "walk-back-ignored",
            Self::AutoIncludeCycle => "auto-include-cycle",
            Self::ConflictingFilteredInclude => "conflicting-filtered-include",
            Self::GroupingEscaped => "grouping-escaped",
            Self::UnsupportedFilterPosition => "unsupported-filter-position",
            Self::CollectionTypeNotConstructible => "collection-type-not-constructible",
            Self::InvalidIncludeFilter => "invalid-include-filter",
            Self::InvalidIncludePath => "invalid-include-path",
            Self::InvalidShape => "invalid-shape",
            Self::InvalidModel => "invalid-model",
            Self::Materialization => "materialization",
            Self::Execution => "execution",
            Self::Configuration => "configuration",
        }
    }

    /// Returns true for categories that are warnings unless strict mode is on
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::WalkBackIgnored)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for query-shape compilation, execution and materialization
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    /// An include step walks back to data the fix-up already populates
    #[error(
        "The navigation '{navigation}' was ignored from include path '{path}' since the fix-up \
         will automatically populate it. Any further navigations chained after it are ignored. \
         Walking back the include tree is not allowed"
    )]
    WalkBackIgnored { navigation: String, path: String },

    /// Auto-include navigations form a cycle
    #[error(
        "Cycle detected while auto-including navigations: {}. Remove the auto-include flag from at \
         least one navigation in the cycle or call 'ignore_auto_includes' on the query",
        format_cycle(.cycle)
    )]
    AutoIncludeCycle { cycle: Vec<String> },

    /// Two different filters were configured on the same include path
    #[error(
        "The filters '{first}' and '{second}' have both been configured on the included navigation \
         '{path}'. Only one unique filter per navigation is allowed"
    )]
    ConflictingFilteredInclude {
        path: String,
        first: String,
        second: String,
    },

    /// The raw grouping construct escaped aggregation
    #[error("Grouping escaped into unsupported position '{position}': {detail}")]
    GroupingEscaped { position: String, detail: String },

    /// A filter references something other than its own element
    #[error("Unsupported filter on '{path}': {reason}")]
    UnsupportedFilterPosition { path: String, reason: String },

    /// The declared collection type of a navigation cannot be instantiated
    #[error(
        "Unable to create an instance of type '{type_name}' for navigation '{navigation}': {reason}"
    )]
    CollectionTypeNotConstructible {
        navigation: String,
        type_name: String,
        reason: String,
    },

    /// A filter violates the structural rules of filtered includes
    #[error("Invalid include filter on '{path}': {reason}")]
    InvalidIncludeFilter { path: String, reason: String },

    /// An include path names a navigation that does not exist
    #[error("Invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// The query shape cannot be translated
    #[error("Invalid query shape: {0}")]
    InvalidShape(String),

    /// The relationship model is inconsistent
    #[error("Invalid relationship model: {0}")]
    InvalidModel(String),

    /// Result rows could not be turned into the requested shape
    #[error("Materialization error: {0}")]
    Materialization(String),

    /// The downstream row source failed
    #[error("Execution error in plan {plan}: {message}")]
    Execution { plan: String, message: String },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ShapeError {
    /// Stable category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::WalkBackIgnored { .. } => ErrorCategory::WalkBackIgnored,
            Self::AutoIncludeCycle { .. } => ErrorCategory::AutoIncludeCycle,
            Self::ConflictingFilteredInclude { .. } => ErrorCategory::ConflictingFilteredInclude,
            Self::GroupingEscaped { .. } => ErrorCategory::GroupingEscaped,
            Self::UnsupportedFilterPosition { .. } => ErrorCategory::UnsupportedFilterPosition,
            Self::CollectionTypeNotConstructible { .. } => {
                ErrorCategory::CollectionTypeNotConstructible
            }
            Self::InvalidIncludeFilter { .. } => ErrorCategory::InvalidIncludeFilter,
            Self::InvalidIncludePath { .. } => ErrorCategory::InvalidIncludePath,
            Self::InvalidShape(_) => ErrorCategory::InvalidShape,
            Self::InvalidModel(_) => ErrorCategory::InvalidModel,
            Self::Materialization(_) => ErrorCategory::Materialization,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Navigation paths this error points at
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::WalkBackIgnored { navigation, path } => vec![path.clone(), navigation.clone()],
            Self::AutoIncludeCycle { cycle } => cycle.clone(),
            Self::ConflictingFilteredInclude { path, .. }
            | Self::UnsupportedFilterPosition { path, .. }
            | Self::InvalidIncludeFilter { path, .. }
            | Self::InvalidIncludePath { path, .. } => vec![path.clone()],
            Self::CollectionTypeNotConstructible { navigation, .. } => vec![navigation.clone()],
            Self::GroupingEscaped { position, .. } => vec![position.clone()],
            _ => Vec::new(),
        }
    }

    pub(crate) fn execution(plan: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Execution {
            plan: plan.to_string(),
            message: message.into(),
        }
    }
}

fn format_cycle(cycle: &[String]) -> String {
    cycle
        .iter()
        .map(|navigation| format!("'{}'", navigation))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_json::Error> for ShapeError {
    fn from(err: serde_json::Error) -> Self {
        ShapeError::Materialization(err.to_string())
    }
}
