//! Auto-include expansion and cycle verification

use std::collections::HashSet;

use crate::config::ConfigError;
use crate::error::{ShapeError, ShapeResult};
use crate::relationships::{Navigation, RelationshipModel};

use super::tree::{EagerLoadTree, IncludeOrigin};

/// Expands model-declared auto-include navigations into an eager-load tree
pub struct AutoIncludeExpander<'a> {
    model: &'a RelationshipModel,
    /// Navigations (`Type.Navigation`) opted out for this query
    ignored: HashSet<String>,
    /// Entity types already verified to have no auto-include cycle
    non_cyclic: HashSet<String>,
    max_depth: usize,
}

impl<'a> AutoIncludeExpander<'a> {
    pub fn new(model: &'a RelationshipModel, ignored: &[String], max_depth: usize) -> Self {
        Self {
            model,
            ignored: ignored.iter().cloned().collect(),
            non_cyclic: HashSet::new(),
            max_depth,
        }
    }

    fn auto_navigations(&self, entity_type: &str) -> Vec<Navigation> {
        self.model
            .auto_include_navigations(entity_type)
            .into_iter()
            .filter(|navigation| !self.ignored.contains(&navigation.display_name()))
            .collect()
    }

    /// Verify that the auto-include edges reachable from `entity_type` are acyclic
    pub fn verify_no_cycles(&mut self, entity_type: &str) -> ShapeResult<()> {
        if self.non_cyclic.contains(entity_type) {
            return Ok(());
        }
        self.verify(entity_type, &mut HashSet::new(), &mut Vec::new())
    }

    fn verify(
        &mut self,
        entity_type: &str,
        open: &mut HashSet<String>,
        chain: &mut Vec<Navigation>,
    ) -> ShapeResult<()> {
        if self.non_cyclic.contains(entity_type) {
            return Ok(());
        }

        if !open.insert(entity_type.to_string()) {
            return Err(ShapeError::AutoIncludeCycle {
                cycle: chain.iter().map(Navigation::display_name).collect(),
            });
        }

        for navigation in self.auto_navigations(entity_type) {
            // The foreign-key inverse of the previous edge only reaches the
            // entity it came from; skip navigations are never exempt
            if let Some(previous) = chain.last() {
                if !navigation.is_skip_navigation() && navigation.is_inverse_of(previous) {
                    continue;
                }
            }

            let target = navigation.target_type.clone();
            chain.push(navigation);
            self.verify(&target, open, chain)?;
            chain.pop();
        }

        self.non_cyclic.insert(entity_type.to_string());
        open.remove(entity_type);
        Ok(())
    }

    /// Add auto-include steps below every node of `tree`
    pub fn expand(&mut self, tree: &mut EagerLoadTree) -> ShapeResult<()> {
        let root_type = tree.root_type.clone();
        self.expand_node(tree, None, &root_type, None)
    }

    fn expand_node(
        &mut self,
        tree: &mut EagerLoadTree,
        path: Option<String>,
        entity_type: &str,
        incoming: Option<&Navigation>,
    ) -> ShapeResult<()> {
        let depth = path.as_deref().map_or(0, |p| p.split('.').count());
        if depth > self.max_depth {
            return Err(ConfigError::validation_failed(format!(
                "auto-include expansion below '{}' exceeds max_include_depth {}",
                path.unwrap_or_default(),
                self.max_depth
            ))
            .into());
        }

        self.verify_no_cycles(entity_type)?;

        for navigation in self.auto_navigations(entity_type) {
            if let Some(incoming) = incoming {
                // Fix-up populates the inverse of a collection, and of a
                // reference reached through a reference
                if navigation.is_inverse_of(incoming)
                    && (incoming.is_collection() || !navigation.is_collection())
                {
                    continue;
                }
            }
            tree.add_step(path.as_deref(), navigation, None, IncludeOrigin::Auto)?;
        }

        let children: Vec<(String, Navigation)> = tree
            .children_of(path.as_deref())
            .iter()
            .map(|node| (node.path.clone(), node.navigation.clone()))
            .collect();

        for (child_path, navigation) in children {
            self.expand_node(
                tree,
                Some(child_path),
                &navigation.target_type,
                Some(&navigation),
            )?;
        }

        Ok(())
    }
}
