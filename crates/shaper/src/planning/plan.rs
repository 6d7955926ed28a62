//! Correlated plan descriptions and stitch instructions

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::{ShapeError, ShapeResult};
use crate::expr::Filter;
use crate::relationships::{CollectionKind, Navigation};
use crate::value::{parent_column, segment_column, COUNT_COLUMN};

/// Identifier of a plan inside a [`PlanSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlanId(pub usize);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How many rows a plan produces per parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    Many,
    /// At most one row per parent (`First`)
    Single,
    /// One aggregate `#count` row per parent
    Count,
}

/// Correlation of a child plan with the rows of its parent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentLink {
    pub plan: PlanId,
    /// Segment of the parent row holding the owning entity
    pub segment: String,
    pub entity_type: String,
    /// Key fields of the owning entity, emitted as `^.field` columns
    pub key_fields: Vec<String>,
}

/// Where the plan's elements come from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanSource {
    Root { entity_type: String },
    Navigation(Navigation),
}

/// Reference navigation joined into a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentJoin {
    pub parent_segment: String,
    pub navigation: Navigation,
}

/// Entity-shaped slice of a plan row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSpec {
    /// Dotted path from the plan element; empty for the element itself
    pub path: String,
    pub entity_type: String,
    pub join: Option<SegmentJoin>,
    pub key_fields: Vec<String>,
    pub fields: Vec<String>,
}

impl SegmentSpec {
    pub fn columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| segment_column(&self.path, field))
            .collect()
    }
}

/// Tree or projection position a plan fulfils
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanTarget {
    Root,
    Include(String),
    Projection(String),
}

/// Inverse navigation wired by fix-up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InverseLink {
    pub navigation: String,
    /// Collection kind when the inverse is a collection
    pub kind: Option<CollectionKind>,
}

/// Eager-loaded navigation attached to a materialized entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IncludeShaper {
    Reference {
        navigation: String,
        segment: String,
        target: Box<Shaper>,
        inverse: Option<InverseLink>,
    },
    Collection {
        navigation: String,
        plan: PlanId,
        kind: CollectionKind,
        inverse: Option<InverseLink>,
    },
}

/// How child results of a collection projection are consumed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CollectionShape {
    Collection(CollectionKind),
    First,
    Count,
}

/// How one plan row becomes a result value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Shaper {
    Entity {
        segment: String,
        entity_type: String,
        key_fields: Vec<String>,
        fields: Vec<String>,
        includes: Vec<IncludeShaper>,
    },
    Field {
        segment: String,
        field: String,
    },
    Constant(JsonValue),
    /// Value reached through a reference; null when the segment is absent
    Reference {
        segment: String,
        key_fields: Vec<String>,
        inner: Box<Shaper>,
    },
    /// Results of a child plan keyed by the entity at `segment`
    Collection {
        plan: PlanId,
        segment: String,
        key_fields: Vec<String>,
        shape: CollectionShape,
    },
    Record {
        type_name: Option<String>,
        fields: Vec<(String, Shaper)>,
    },
}

/// One independently executable unit of a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelatedPlan {
    pub id: PlanId,
    pub parent: Option<ParentLink>,
    pub source: PlanSource,
    pub element_type: String,
    pub filter: Filter,
    /// Element segment first, then joined references parent before child
    pub segments: Vec<SegmentSpec>,
    pub cardinality: Cardinality,
    pub fulfills: PlanTarget,
    pub shaper: Shaper,
    pub depth: usize,
}

impl CorrelatedPlan {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn segment(&self, path: &str) -> Option<&SegmentSpec> {
        self.segments.iter().find(|segment| segment.path == path)
    }

    /// Columns the row source must deliver for this plan
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::new();

        if let Some(ref parent) = self.parent {
            columns.extend(parent.key_fields.iter().map(|field| parent_column(field)));
        }

        if self.cardinality == Cardinality::Count {
            columns.push(COUNT_COLUMN.to_string());
            return columns;
        }

        for segment in &self.segments {
            columns.extend(segment.columns());
        }
        columns
    }

    pub fn is_paged(&self) -> bool {
        self.filter.has_paging()
    }
}

/// All plans of one query, parents before children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSet {
    plans: Vec<CorrelatedPlan>,
}

impl PlanSet {
    pub(crate) fn new(plans: Vec<CorrelatedPlan>) -> ShapeResult<Self> {
        let set = Self { plans };
        set.validate()?;
        Ok(set)
    }

    pub fn root(&self) -> &CorrelatedPlan {
        &self.plans[0]
    }

    pub fn get(&self, id: PlanId) -> Option<&CorrelatedPlan> {
        self.plans.get(id.0)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CorrelatedPlan> {
        self.plans.iter()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.plans.iter().map(|plan| plan.depth).max().unwrap_or(0)
    }

    /// Direct children of a plan
    pub fn children_of(&self, id: PlanId) -> Vec<&CorrelatedPlan> {
        self.plans
            .iter()
            .filter(|plan| plan.parent.as_ref().map(|p| p.plan) == Some(id))
            .collect()
    }

    /// Groups of plans that can run concurrently; every plan's parent runs in
    /// an earlier phase
    pub fn execution_phases(&self) -> Vec<Vec<PlanId>> {
        let mut phases: Vec<Vec<PlanId>> = vec![Vec::new(); self.max_depth() + 1];
        for plan in &self.plans {
            phases[plan.depth].push(plan.id);
        }
        phases.retain(|phase| !phase.is_empty());
        phases
    }

    /// Validate plan ids, parent links and paging invariants
    pub fn validate(&self) -> ShapeResult<()> {
        if self.plans.is_empty() {
            return Err(ShapeError::InvalidShape("a query needs at least one plan".to_string()));
        }

        for (index, plan) in self.plans.iter().enumerate() {
            if plan.id.0 != index {
                return Err(ShapeError::InvalidShape(format!(
                    "plan {} is stored at position {}",
                    plan.id, index
                )));
            }

            match (&plan.parent, index) {
                (None, 0) => {}
                (None, _) => {
                    return Err(ShapeError::InvalidShape(format!(
                        "plan {} has no parent",
                        plan.id
                    )))
                }
                (Some(parent), _) => {
                    let parent_plan = self
                        .get(parent.plan)
                        .filter(|p| p.id < plan.id)
                        .ok_or_else(|| {
                            ShapeError::InvalidShape(format!(
                                "parent {} of plan {} must precede it",
                                parent.plan, plan.id
                            ))
                        })?;
                    if parent_plan.depth + 1 != plan.depth {
                        return Err(ShapeError::InvalidShape(format!(
                            "plan {} is not one level below its parent",
                            plan.id
                        )));
                    }
                }
            }

            if plan.is_paged() && !plan.filter.is_ordered() {
                return Err(ShapeError::InvalidShape(format!(
                    "paginated plan {} is not ordered",
                    plan.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: usize, parent: Option<usize>, depth: usize) -> CorrelatedPlan {
        CorrelatedPlan {
            id: PlanId(id),
            parent: parent.map(|p| ParentLink {
                plan: PlanId(p),
                segment: String::new(),
                entity_type: "Customer".to_string(),
                key_fields: vec!["Id".to_string()],
            }),
            source: PlanSource::Root {
                entity_type: "Customer".to_string(),
            },
            element_type: "Customer".to_string(),
            filter: Filter::default(),
            segments: vec![SegmentSpec {
                path: String::new(),
                entity_type: "Customer".to_string(),
                join: None,
                key_fields: vec!["Id".to_string()],
                fields: vec!["Id".to_string(), "Name".to_string()],
            }],
            cardinality: Cardinality::Many,
            fulfills: PlanTarget::Root,
            shaper: Shaper::Constant(JsonValue::Null),
            depth,
        }
    }

    #[test]
    fn test_execution_phases_by_depth() {
        let set = PlanSet::new(vec![
            plan(0, None, 0),
            plan(1, Some(0), 1),
            plan(2, Some(0), 1),
            plan(3, Some(1), 2),
        ])
        .unwrap();

        assert_eq!(
            set.execution_phases(),
            vec![vec![PlanId(0)], vec![PlanId(1), PlanId(2)], vec![PlanId(3)]]
        );
        assert_eq!(set.children_of(PlanId(0)).len(), 2);
    }

    #[test]
    fn test_invalid_parent_order() {
        let result = PlanSet::new(vec![plan(0, None, 0), plan(1, Some(2), 1), plan(2, Some(0), 1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unordered_paging_rejected() {
        let mut paged = plan(1, Some(0), 1);
        paged.filter = Filter::new().take(2);
        assert!(PlanSet::new(vec![plan(0, None, 0), paged]).is_err());
    }

    #[test]
    fn test_columns() {
        let mut count = plan(1, Some(0), 1);
        count.cardinality = Cardinality::Count;

        assert_eq!(plan(0, None, 0).columns(), vec!["$.Id", "$.Name"]);
        assert_eq!(count.columns(), vec!["^.Id", "#count"]);
    }
}
