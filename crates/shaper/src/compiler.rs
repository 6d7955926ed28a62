//! Query compiler façade
//!
//! [`QueryCompiler`] ties the pipeline together: it builds the eager-load
//! tree, plans the query, runs the plans through a [`RowSource`] and
//! materializes the rows.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ShapeConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ShapeResult;
use crate::include::{build_include_tree, EagerLoadTree};
use crate::materialize::{materialize_grouped, MaterializedResult, Materializer};
use crate::planning::{
    CorrelatedPlanner, ExecutionStats, GroupedPlan, GroupingTranslator, PlanExecutor, PlanSet,
    RowSource, RowStreams,
};
use crate::query::Query;
use crate::relationships::RelationshipModel;

/// Executable form of one query
#[derive(Debug, Clone)]
pub enum CompiledPlan {
    Correlated { tree: EagerLoadTree, plans: PlanSet },
    Grouped(GroupedPlan),
}

/// A compiled query together with the warnings raised while compiling it
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub plan: CompiledPlan,
    pub diagnostics: Diagnostics,
}

impl CompiledQuery {
    /// Number of row-source round trips the query needs
    pub fn plan_count(&self) -> usize {
        match self.plan {
            CompiledPlan::Correlated { ref plans, .. } => plans.len(),
            CompiledPlan::Grouped(_) => 1,
        }
    }

    pub fn plans(&self) -> Option<&PlanSet> {
        match self.plan {
            CompiledPlan::Correlated { ref plans, .. } => Some(plans),
            CompiledPlan::Grouped(_) => None,
        }
    }

    pub fn tree(&self) -> Option<&EagerLoadTree> {
        match self.plan {
            CompiledPlan::Correlated { ref tree, .. } => Some(tree),
            CompiledPlan::Grouped(_) => None,
        }
    }

    pub fn grouped(&self) -> Option<&GroupedPlan> {
        match self.plan {
            CompiledPlan::Grouped(ref plan) => Some(plan),
            CompiledPlan::Correlated { .. } => None,
        }
    }

    /// Materialize rows that were fetched outside of [`QueryCompiler::execute`]
    pub fn materialize(&self, streams: &RowStreams) -> ShapeResult<MaterializedResult> {
        match self.plan {
            CompiledPlan::Correlated { ref plans, .. } => {
                Materializer::new(plans, streams).materialize()
            }
            CompiledPlan::Grouped(ref plan) => materialize_grouped(plan, streams),
        }
    }
}

/// Result of a compiled and executed query
#[derive(Debug)]
pub struct QueryOutcome {
    pub result: MaterializedResult,
    pub stats: ExecutionStats,
    pub diagnostics: Diagnostics,
}

/// Compiles query shapes against a relationship model and runs them
/// through a [`RowSource`]
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    model: Arc<RelationshipModel>,
    config: ShapeConfig,
}

impl QueryCompiler {
    /// Create a compiler with the default configuration
    pub fn new(model: Arc<RelationshipModel>) -> Self {
        Self::with_config(model, ShapeConfig::default())
    }

    /// Create a compiler with custom configuration
    pub fn with_config(model: Arc<RelationshipModel>, config: ShapeConfig) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> &RelationshipModel {
        &self.model
    }

    pub fn config(&self) -> &ShapeConfig {
        &self.config
    }

    /// Compile a query into a plan set or a grouped plan
    pub fn compile(&self, query: &Query) -> ShapeResult<CompiledQuery> {
        self.config.validate()?;

        if query.is_grouped() {
            if !query.directives.is_empty() {
                tracing::debug!(root = %query.root, "Include directives ignored for grouped query");
            }
            let plan = GroupingTranslator::new(&self.model).translate(query)?;
            tracing::debug!(
                root = %query.root,
                stages = plan.stages.len(),
                "Compiled grouped query"
            );
            return Ok(CompiledQuery {
                plan: CompiledPlan::Grouped(plan),
                diagnostics: Diagnostics::new(),
            });
        }

        let (tree, diagnostics) = build_include_tree(&self.model, &self.config, query)?;
        let plans = CorrelatedPlanner::new(&self.model, &self.config).decompose(query, &tree)?;

        tracing::debug!(
            root = %query.root,
            plans = plans.len(),
            depth = plans.max_depth(),
            "Compiled correlated query"
        );

        Ok(CompiledQuery {
            plan: CompiledPlan::Correlated { tree, plans },
            diagnostics,
        })
    }

    /// Compile, execute and materialize a query
    pub async fn execute(
        &self,
        query: &Query,
        source: Arc<dyn RowSource>,
    ) -> ShapeResult<QueryOutcome> {
        let start_time = Instant::now();
        let compiled = self.compile(query)?;
        let executor = PlanExecutor::with_config(source, &self.config);

        let (streams, stats) = match compiled.plan {
            CompiledPlan::Correlated { ref plans, .. } => executor.execute(plans).await?,
            CompiledPlan::Grouped(ref plan) => executor.execute_grouped(plan).await?,
        };
        let result = compiled.materialize(&streams)?;

        tracing::debug!(
            root = %query.root,
            rows = result.len(),
            entities = result.graph().len(),
            queries = stats.query_count,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Executed query"
        );

        Ok(QueryOutcome {
            result,
            stats,
            diagnostics: compiled.diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Lambda;
    use crate::memory::MemoryStore;
    use crate::query::{Aggregate, GroupBy, GroupExpr};
    use crate::relationships::{EntityType, Navigation};
    use serde_json::json;

    fn model() -> Arc<RelationshipModel> {
        let model = RelationshipModel::new();
        model.register_entity(EntityType::new("Team").with_fields(&["Name"])).unwrap();
        model
            .register_entity(EntityType::new("Player").with_fields(&["TeamId", "Goals"]))
            .unwrap();
        model
            .register_navigation(
                Navigation::has_many("Team", "Players", "Player", "TeamId").with_inverse("Team"),
            )
            .unwrap();
        model
            .register_navigation(
                Navigation::belongs_to("Player", "Team", "Team", "TeamId").with_inverse("Players"),
            )
            .unwrap();
        Arc::new(model)
    }

    fn store(model: &Arc<RelationshipModel>) -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new(Arc::clone(model))
                .with_rows(
                    "Team",
                    vec![json!({"Id": 1, "Name": "Reds"}), json!({"Id": 2, "Name": "Blues"})],
                )
                .with_rows(
                    "Player",
                    vec![
                        json!({"Id": 10, "TeamId": 1, "Goals": 3}),
                        json!({"Id": 11, "TeamId": 1, "Goals": 1}),
                        json!({"Id": 12, "TeamId": 2, "Goals": 4}),
                    ],
                ),
        )
    }

    #[test]
    fn test_compile_counts_plans() {
        let compiler = QueryCompiler::new(model());
        let compiled = compiler.compile(&Query::from("Team").include("Players")).unwrap();

        assert_eq!(compiled.plan_count(), 2);
        assert!(compiled.tree().is_some());
        assert!(compiled.grouped().is_none());
    }

    #[test]
    fn test_compile_rejects_invalid_config() {
        let config = ShapeConfig {
            max_parallel_plans: 0,
            ..ShapeConfig::default()
        };
        let compiler = QueryCompiler::with_config(model(), config);

        assert!(compiler.compile(&Query::from("Team")).is_err());
    }

    #[tokio::test]
    async fn test_execute_include_with_fixup() {
        let model = model();
        let compiler = QueryCompiler::new(Arc::clone(&model));
        let outcome = compiler
            .execute(&Query::from("Team").include("Players"), store(&model))
            .await
            .unwrap();

        let result = &outcome.result;
        assert_eq!(result.len(), 2);
        assert_eq!(outcome.stats.query_count, 2);

        let reds = result.graph().find("Team", 1i64).unwrap();
        let players = result.collection(reds, "Players").unwrap();
        assert_eq!(players.len(), 2);
        for player in &players.members {
            assert_eq!(result.reference(*player, "Team"), Some(reds));
        }
    }

    #[tokio::test]
    async fn test_execute_grouped_query() {
        let model = model();
        let compiler = QueryCompiler::new(Arc::clone(&model));
        let query = Query::from("Player").group_by(
            GroupBy::by(Lambda::field("p", "TeamId")).select(GroupExpr::record(vec![
                ("Team", GroupExpr::Key),
                ("Goals", GroupExpr::aggregate(Aggregate::sum(Lambda::field("p", "Goals")))),
            ])),
        );

        let outcome = compiler.execute(&query, store(&model)).await.unwrap();
        let rows = outcome.result.rows();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field("Goals").and_then(|v| v.as_scalar()), Some(&json!(4)));
        assert_eq!(rows[1].field("Goals").and_then(|v| v.as_scalar()), Some(&json!(4)));
        assert_eq!(rows[1].field("Team").and_then(|v| v.as_scalar()), Some(&json!(2)));
    }
}
