//! Query planning: correlated-collection decomposition, grouping translation
//! and phased plan execution.
//!
//! A non-grouped query becomes a [`PlanSet`] with one [`CorrelatedPlan`] per
//! level of collection nesting. Plans are executed by depth, so every child
//! receives the keys of its parent's rows; plans of the same depth run
//! concurrently. A grouped query becomes a single [`GroupedPlan`].

pub mod correlated;
pub mod executor;
pub mod grouping;
pub mod plan;

pub use correlated::CorrelatedPlanner;
pub use executor::{ExecutionStats, PlanExecutor, RowSource, RowStreams};
pub use grouping::{
    AggregateColumn, GroupElement, GroupStage, GroupedOutput, GroupedPlan, GroupingTranslator,
    KeyColumn, KeyShape,
};
pub use plan::{
    Cardinality, CollectionShape, CorrelatedPlan, IncludeShaper, InverseLink, ParentLink,
    PlanId, PlanSet, PlanSource, PlanTarget, SegmentJoin, SegmentSpec, Shaper,
};
