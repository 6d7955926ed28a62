//! Eager-load tree keyed by dotted navigation paths

use serde::Serialize;

use crate::error::{ShapeError, ShapeResult};
use crate::expr::Filter;
use crate::relationships::Navigation;

/// Where an include node came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IncludeOrigin {
    Explicit,
    Auto,
}

/// One navigation step of the eager-load tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeNode {
    pub navigation: Navigation,
    /// Dotted path from the tree root
    pub path: String,
    pub filter: Option<Filter>,
    pub origin: IncludeOrigin,
    pub children: Vec<IncludeNode>,
}

impl IncludeNode {
    pub fn target_type(&self) -> &str {
        &self.navigation.target_type
    }

    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a IncludeNode>) {
        out.push(self);
        for child in &self.children {
            child.collect(out);
        }
    }
}

/// Rooted tree of eager-load steps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EagerLoadTree {
    pub root_type: String,
    pub children: Vec<IncludeNode>,
}

impl EagerLoadTree {
    pub fn new(root_type: &str) -> Self {
        Self {
            root_type: root_type.to_string(),
            children: Vec::new(),
        }
    }

    /// Add `navigation` below `parent_path` (the root when `None`)
    ///
    /// Identical filters on the same path merge; an unfiltered step re-traverses
    /// the existing node and keeps its filter; a differently filtered step on an
    /// already filtered path is a conflict. Returns the path of the node.
    pub fn add_step(
        &mut self,
        parent_path: Option<&str>,
        navigation: Navigation,
        filter: Option<Filter>,
        origin: IncludeOrigin,
    ) -> ShapeResult<String> {
        let path = match parent_path {
            Some(parent) => format!("{}.{}", parent, navigation.name),
            None => navigation.name.clone(),
        };

        let filter = filter.filter(|f| !f.is_empty());
        if let Some(ref filter) = filter {
            if !navigation.is_collection() {
                return Err(ShapeError::InvalidIncludeFilter {
                    path,
                    reason: format!(
                        "'{}' is a reference navigation; only collection navigations can be \
                         filtered",
                        navigation.display_name()
                    ),
                });
            }
            filter.validate_for_include(&path)?;
        }

        let siblings = match parent_path {
            Some(parent) => {
                &mut self
                    .find_mut(parent)
                    .ok_or_else(|| ShapeError::InvalidIncludePath {
                        path: path.clone(),
                        reason: format!("parent path '{}' is not part of the tree", parent),
                    })?
                    .children
            }
            None => &mut self.children,
        };

        if let Some(existing) = siblings
            .iter_mut()
            .find(|node| node.navigation.name == navigation.name)
        {
            if let Some(filter) = filter {
                match existing.filter {
                    None => existing.filter = Some(filter),
                    Some(ref current) if !current.same_as(&filter) => {
                        return Err(ShapeError::ConflictingFilteredInclude {
                            path,
                            first: current.to_string(),
                            second: filter.to_string(),
                        });
                    }
                    Some(_) => {}
                }
            }
            if origin == IncludeOrigin::Explicit {
                existing.origin = IncludeOrigin::Explicit;
            }
            return Ok(path);
        }

        tracing::debug!(path = %path, origin = ?origin, "Adding include node");
        siblings.push(IncludeNode {
            navigation,
            path: path.clone(),
            filter,
            origin,
            children: Vec::new(),
        });

        Ok(path)
    }

    /// Find a node by its dotted path
    pub fn find(&self, path: &str) -> Option<&IncludeNode> {
        let mut nodes = &self.children;
        let mut found = None;
        for segment in path.split('.') {
            let node = nodes.iter().find(|node| node.navigation.name == segment)?;
            nodes = &node.children;
            found = Some(node);
        }
        found
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut IncludeNode> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self
            .children
            .iter_mut()
            .find(|node| node.navigation.name == first)?;
        for segment in segments {
            node = node
                .children
                .iter_mut()
                .find(|node| node.navigation.name == segment)?;
        }
        Some(node)
    }

    /// Children of the node at `path`, or of the root
    pub fn children_of(&self, path: Option<&str>) -> &[IncludeNode] {
        match path {
            Some(path) => self
                .find(path)
                .map(|node| node.children.as_slice())
                .unwrap_or(&[]),
            None => &self.children,
        }
    }

    /// All nodes in pre-order
    pub fn nodes(&self) -> Vec<&IncludeNode> {
        let mut out = Vec::new();
        for child in &self.children {
            child.collect(&mut out);
        }
        out
    }

    pub fn paths(&self) -> Vec<String> {
        self.nodes().into_iter().map(|node| node.path.clone()).collect()
    }

    /// Length of the longest path
    pub fn depth(&self) -> usize {
        self.nodes().iter().map(|node| node.depth()).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::expr::{lit, param, Lambda};

    fn orders() -> Navigation {
        Navigation::has_many("Customer", "Orders", "Order", "CustomerId").with_inverse("Customer")
    }

    fn lines() -> Navigation {
        Navigation::has_many("Order", "Lines", "OrderLine", "OrderId")
    }

    fn big_orders(p: &str) -> Filter {
        Filter::new().where_(Lambda::new(p, param(p).prop("Total").gt(lit(100))))
    }

    #[test]
    fn test_nested_paths() {
        let mut tree = EagerLoadTree::new("Customer");
        let orders_path = tree
            .add_step(None, orders(), None, IncludeOrigin::Explicit)
            .unwrap();
        let lines_path = tree
            .add_step(Some(&orders_path), lines(), None, IncludeOrigin::Explicit)
            .unwrap();

        assert_eq!(lines_path, "Orders.Lines");
        assert_eq!(tree.paths(), vec!["Orders", "Orders.Lines"]);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.find("Orders.Lines").unwrap().target_type(), "OrderLine");
        assert!(tree.find("Orders.Missing").is_none());
    }

    #[test]
    fn test_identical_filters_are_idempotent() {
        let mut tree = EagerLoadTree::new("Customer");
        tree.add_step(None, orders(), Some(big_orders("o")), IncludeOrigin::Explicit)
            .unwrap();
        tree.add_step(None, orders(), Some(big_orders("x")), IncludeOrigin::Explicit)
            .unwrap();

        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_unfiltered_retraversal_keeps_filter() {
        let mut tree = EagerLoadTree::new("Customer");
        tree.add_step(None, orders(), Some(big_orders("o")), IncludeOrigin::Explicit)
            .unwrap();
        tree.add_step(None, orders(), None, IncludeOrigin::Explicit)
            .unwrap();

        assert!(tree.find("Orders").unwrap().filter.is_some());
    }

    #[test]
    fn test_conflicting_filters_fail() {
        let mut tree = EagerLoadTree::new("Customer");
        tree.add_step(None, orders(), Some(big_orders("o")), IncludeOrigin::Explicit)
            .unwrap();
        let other = Filter::new().order_by(Lambda::field("o", "Id")).take(1);
        let error = tree
            .add_step(None, orders(), Some(other), IncludeOrigin::Explicit)
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::ConflictingFilteredInclude);
        assert_eq!(error.paths(), vec!["Orders"]);
    }

    #[test]
    fn test_filter_on_reference_rejected() {
        let mut tree = EagerLoadTree::new("Order");
        let customer = Navigation::belongs_to("Order", "Customer", "Customer", "CustomerId");
        let error = tree
            .add_step(None, customer, Some(big_orders("c")), IncludeOrigin::Explicit)
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::InvalidIncludeFilter);
    }

    #[test]
    fn test_auto_node_promoted_by_explicit_step() {
        let mut tree = EagerLoadTree::new("Customer");
        tree.add_step(None, orders(), None, IncludeOrigin::Auto).unwrap();
        tree.add_step(None, orders(), None, IncludeOrigin::Explicit)
            .unwrap();

        assert_eq!(tree.find("Orders").unwrap().origin, IncludeOrigin::Explicit);
    }
}
