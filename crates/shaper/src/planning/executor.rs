//! Plan execution
//!
//! [`PlanExecutor`] runs a plan set phase by phase against a [`RowSource`].
//! Every child plan receives the distinct keys its parent's rows produced;
//! plans of the same phase are fetched concurrently in bounded chunks.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::ShapeConfig;
use crate::error::{ShapeError, ShapeResult};
use crate::value::{KeyValue, Row};

use super::grouping::GroupedPlan;
use super::plan::{CorrelatedPlan, PlanId, PlanSet};

/// Downstream execution layer: turns one logical plan into rows
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch the rows of a plan; child plans receive the distinct keys of
    /// their parent's rows and must emit them in `^.` columns
    async fn fetch(
        &self,
        plan: &CorrelatedPlan,
        parent_keys: Option<&[KeyValue]>,
    ) -> ShapeResult<Vec<Row>>;

    /// Fetch the rows of a grouped plan
    async fn fetch_grouped(&self, plan: &GroupedPlan) -> ShapeResult<Vec<Row>>;
}

/// Row buffers of one execution pass, written once per plan
#[derive(Debug, Clone, Default)]
pub struct RowStreams {
    plans: HashMap<PlanId, Vec<Row>>,
    grouped: Option<Vec<Row>>,
}

impl RowStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the rows of a plan; a second write for the same plan fails
    pub fn insert(&mut self, plan: PlanId, rows: Vec<Row>) -> ShapeResult<()> {
        if self.plans.contains_key(&plan) {
            return Err(ShapeError::execution(plan, "rows were already delivered"));
        }
        self.plans.insert(plan, rows);
        Ok(())
    }

    /// Builder-style insertion for callers executing plans themselves
    pub fn with(mut self, plan: PlanId, rows: Vec<Row>) -> ShapeResult<Self> {
        self.insert(plan, rows)?;
        Ok(self)
    }

    pub fn with_grouped(mut self, rows: Vec<Row>) -> Self {
        self.grouped = Some(rows);
        self
    }

    pub fn rows(&self, plan: PlanId) -> &[Row] {
        self.plans.get(&plan).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, plan: PlanId) -> bool {
        self.plans.contains_key(&plan)
    }

    pub fn grouped_rows(&self) -> &[Row] {
        self.grouped.as_deref().unwrap_or(&[])
    }
}

/// Statistics about plan execution
#[derive(Debug, Clone)]
pub struct ExecutionStats {
    /// Total execution time
    pub total_duration: Duration,
    /// Time spent on each phase
    pub phase_durations: Vec<Duration>,
    /// Number of plans sent to the row source
    pub query_count: usize,
    /// Total rows fetched
    pub rows_fetched: usize,
    /// Number of phases executed in parallel
    pub parallel_phases: usize,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self {
            total_duration: Duration::from_secs(0),
            phase_durations: Vec::new(),
            query_count: 0,
            rows_fetched: 0,
            parallel_phases: 0,
        }
    }

    /// Add phase duration
    pub fn add_phase_duration(&mut self, duration: Duration) {
        self.phase_durations.push(duration);
    }

    fn record(&mut self, rows: &[Row]) {
        self.query_count += 1;
        self.rows_fetched += rows.len();
    }
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes plan sets phase by phase, plans of a phase in parallel
pub struct PlanExecutor {
    source: Arc<dyn RowSource>,
    /// Maximum number of parallel tasks
    max_parallel_plans: usize,
    /// Timeout for individual plans
    plan_timeout: Duration,
}

impl PlanExecutor {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self::with_config(source, &ShapeConfig::default())
    }

    pub fn with_config(source: Arc<dyn RowSource>, config: &ShapeConfig) -> Self {
        Self {
            source,
            max_parallel_plans: config.max_parallel_plans.max(1),
            plan_timeout: config.plan_timeout(),
        }
    }

    /// Execute every plan; children run after their parent with the parent's
    /// distinct keys
    pub async fn execute(&self, plans: &PlanSet) -> ShapeResult<(RowStreams, ExecutionStats)> {
        let start_time = Instant::now();
        let mut streams = RowStreams::new();
        let mut stats = ExecutionStats::new();

        for (phase_index, phase) in plans.execution_phases().iter().enumerate() {
            let phase_start = Instant::now();
            let mut pending = Vec::with_capacity(phase.len());

            for id in phase {
                let plan = plans
                    .get(*id)
                    .ok_or_else(|| ShapeError::execution(id, "plan is missing from the plan set"))?;

                let keys = match plan.parent {
                    Some(ref link) => {
                        let keys = distinct_keys(
                            streams.rows(link.plan),
                            &link.segment,
                            &link.key_fields,
                        )?;
                        if keys.is_empty() {
                            tracing::debug!(plan = %plan.id, "No parent rows, skipping fetch");
                            streams.insert(plan.id, Vec::new())?;
                            continue;
                        }
                        Some(keys)
                    }
                    None => None,
                };
                pending.push((plan.clone(), keys));
            }

            if pending.len() == 1 {
                // Single plan - execute directly
                let (plan, keys) = &pending[0];
                let rows = self.fetch_with_timeout(plan, keys.as_deref()).await?;
                stats.record(&rows);
                streams.insert(plan.id, rows)?;
            } else if !pending.is_empty() {
                stats.parallel_phases += 1;
                for (id, rows) in self.execute_phase_parallel(pending).await? {
                    stats.record(&rows);
                    streams.insert(id, rows)?;
                }
            }

            let phase_duration = phase_start.elapsed();
            tracing::debug!(
                phase = phase_index,
                plans = phase.len(),
                duration_ms = phase_duration.as_millis() as u64,
                "Executed phase"
            );
            stats.add_phase_duration(phase_duration);
        }

        stats.total_duration = start_time.elapsed();
        Ok((streams, stats))
    }

    /// Execute a grouped plan as a single fetch
    pub async fn execute_grouped(
        &self,
        plan: &GroupedPlan,
    ) -> ShapeResult<(RowStreams, ExecutionStats)> {
        let start_time = Instant::now();
        let mut stats = ExecutionStats::new();

        let rows = tokio::time::timeout(self.plan_timeout, self.source.fetch_grouped(plan))
            .await
            .map_err(|_| ShapeError::execution(&plan.source, "grouped plan timed out"))??;

        stats.record(&rows);
        stats.add_phase_duration(start_time.elapsed());
        stats.total_duration = start_time.elapsed();
        Ok((RowStreams::new().with_grouped(rows), stats))
    }

    async fn fetch_with_timeout(
        &self,
        plan: &CorrelatedPlan,
        keys: Option<&[KeyValue]>,
    ) -> ShapeResult<Vec<Row>> {
        fetch_plan(self.source.as_ref(), plan, keys, self.plan_timeout).await
    }

    /// Execute a phase with multiple plans in parallel; the first failure
    /// aborts the plans still running
    async fn execute_phase_parallel(
        &self,
        pending: Vec<(CorrelatedPlan, Option<Vec<KeyValue>>)>,
    ) -> ShapeResult<Vec<(PlanId, Vec<Row>)>> {
        let mut results = Vec::with_capacity(pending.len());

        // Limit parallel tasks to avoid overwhelming the row source
        for chunk in pending.chunks(self.max_parallel_plans) {
            let mut tasks: JoinSet<(PlanId, ShapeResult<Vec<Row>>)> = JoinSet::new();

            for (plan, keys) in chunk {
                let source = Arc::clone(&self.source);
                let plan = plan.clone();
                let keys = keys.clone();
                let timeout = self.plan_timeout;

                tasks.spawn(async move {
                    let result = fetch_plan(source.as_ref(), &plan, keys.as_deref(), timeout).await;
                    (plan.id, result)
                });
            }

            // Wait for chunk to complete
            while let Some(joined) = tasks.join_next().await {
                let failure = match joined {
                    Ok((id, Ok(rows))) => {
                        results.push((id, rows));
                        continue;
                    }
                    Ok((_, Err(e))) => e,
                    Err(e) => ShapeError::execution(
                        "parallel phase",
                        format!("task join error: {}", e),
                    ),
                };

                tasks.abort_all();
                tracing::debug!(aborted = tasks.len(), "Aborted remaining plans of a failed phase");
                return Err(failure);
            }
        }

        results.sort_by_key(|(id, _)| *id);
        Ok(results)
    }
}

async fn fetch_plan(
    source: &dyn RowSource,
    plan: &CorrelatedPlan,
    keys: Option<&[KeyValue]>,
    timeout: Duration,
) -> ShapeResult<Vec<Row>> {
    match tokio::time::timeout(timeout, source.fetch(plan, keys)).await {
        Ok(result) => result,
        Err(_) => Err(ShapeError::execution(
            plan.id,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

/// Distinct non-null keys of the entity at `segment`, in first-seen order
fn distinct_keys(rows: &[Row], segment: &str, key_fields: &[String]) -> ShapeResult<Vec<KeyValue>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();

    for row in rows {
        let key = row.segment_key(segment, key_fields)?;
        if !key.is_null() && seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    Ok(keys)
}
