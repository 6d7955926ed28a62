//! # elif-shaper: Query-Shape Compiler for elif.rs
//!
//! Compiles typed query shapes (eager-load directives, correlated collection
//! projections and groupings) into executable plans, runs them through a
//! pluggable [`RowSource`] and materializes the returned rows into one object
//! graph with a single instance per entity identity.
//!
//! The pipeline:
//!
//! 1. [`include`] builds the eager-load tree, dropping walk-backs and
//!    expanding auto-includes with cycle detection.
//! 2. [`planning`] decomposes collection nesting into correlated plans, or
//!    translates a grouping into a single grouped plan.
//! 3. [`planning::PlanExecutor`] fetches plans phase by phase.
//! 4. [`materialize`] stitches rows together through the identity map and
//!    wires inverse navigations.

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod expr;
pub mod include;
pub mod materialize;
pub mod memory;
pub mod planning;
pub mod query;
pub mod relationships;
pub mod value;

// Re-export the main entry points
pub use compiler::{CompiledPlan, CompiledQuery, QueryCompiler, QueryOutcome};
pub use config::{ConfigError, ShapeConfig};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{ErrorCategory, ShapeError, ShapeResult};
pub use expr::{Expr, Filter, Lambda};
pub use include::{EagerLoadTree, IncludeNode};
pub use materialize::{EntityGraph, EntityId, MaterializedResult, ResultValue};
pub use memory::MemoryStore;
pub use planning::{ExecutionStats, PlanExecutor, PlanSet, RowSource, RowStreams};
pub use query::{Projection, Query};
pub use relationships::{EntityType, Navigation, RelationshipModel, RelationshipType};
pub use value::{KeyValue, Row};
