//! Eager-Load Tree Builder
//!
//! Turns chained `Include`/`ThenInclude` directives into an [`EagerLoadTree`],
//! dropping steps that walk back over the navigation they hang off, merging
//! repeated paths and rejecting conflicting filters. Model-declared
//! auto-includes are expanded afterwards, with cycle verification over the
//! auto-include edges.

pub mod auto;
pub mod builder;
pub mod tree;

pub use auto::AutoIncludeExpander;
pub use builder::{is_walk_back, Cursor, EagerLoadTreeBuilder};
pub use tree::{EagerLoadTree, IncludeNode, IncludeOrigin};

use crate::config::ShapeConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ShapeResult;
use crate::query::Query;
use crate::relationships::RelationshipModel;

/// Expand auto-include navigations into `tree`
pub fn expand_auto_includes(
    tree: &mut EagerLoadTree,
    model: &RelationshipModel,
    ignored: &[String],
    max_depth: usize,
) -> ShapeResult<()> {
    AutoIncludeExpander::new(model, ignored, max_depth).expand(tree)
}

/// Build the complete eager-load tree of a query: explicit directives first,
/// then auto-includes unless the query or configuration opts out
pub fn build_include_tree(
    model: &RelationshipModel,
    config: &ShapeConfig,
    query: &Query,
) -> ShapeResult<(EagerLoadTree, Diagnostics)> {
    let mut builder = EagerLoadTreeBuilder::new(model, config, &query.root)?;
    builder.apply_all(&query.directives)?;
    let (mut tree, diagnostics) = builder.build();

    if query.ignore_auto_includes || config.ignore_auto_includes {
        tracing::debug!(root = %query.root, "Auto-includes ignored for query");
    } else {
        expand_auto_includes(
            &mut tree,
            model,
            &query.ignored_auto_includes,
            config.max_include_depth,
        )?;
    }

    tracing::debug!(
        root = %query.root,
        nodes = tree.len(),
        warnings = diagnostics.len(),
        "Built eager-load tree"
    );

    Ok((tree, diagnostics))
}
