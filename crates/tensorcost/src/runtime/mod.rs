//! Graph-level aggregation of operator estimates and the fusion decision.
//!
//! Nothing here executes a kernel: the runtime walks a graph in topological order,
//! asks every operator for its three closed-form estimates and folds them into one
//! [`PerfMetrics`]. Two such figures are then compared to decide whether a fused
//! rewrite of a graph should replace the original.

mod report;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::{CostModelConfig, ParallelismReduction};
use crate::error::{ConfigError, GraphError};
use crate::graph::{Graph, OpId, OpView};
use crate::ops::{CostContext, OpDef, OpSemantics};

pub use report::{ProfileReport, ProfileRow};

/// Compute time (seconds), memory traffic (configured unit) and parallel work units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfMetrics {
    pub compute_time: f64,
    pub memory_cost: f64,
    pub parallelism: f64,
}

impl PerfMetrics {
    pub fn new(compute_time: f64, memory_cost: f64, parallelism: f64) -> Self {
        PerfMetrics {
            compute_time,
            memory_cost,
            parallelism,
        }
    }
}

/// Metric that settled a fusion comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionCriterion {
    ComputeTime,
    MemoryCost,
    Parallelism,
    /// All three metrics tied; the original graph is kept.
    Tie,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionDecision {
    pub fuse: bool,
    pub criterion: FusionCriterion,
    pub original: PerfMetrics,
    pub fused: PerfMetrics,
}

/// Execution-free evaluator configured with one [`CostModelConfig`].
#[derive(Debug, Clone, Default)]
pub struct CostRuntime {
    config: CostModelConfig,
    cx: CostContext,
}

impl CostRuntime {
    pub fn new(config: CostModelConfig) -> Self {
        let cx = CostContext::from_config(&config);
        CostRuntime { config, cx }
    }

    /// Runtime configured from the `TENSORCOST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CostRuntime::new(CostModelConfig::from_env()?))
    }

    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    pub fn cost_context(&self) -> &CostContext {
        &self.cx
    }

    /// Estimates of a single operator.
    pub fn op_metrics(&self, graph: &Graph, op: OpId) -> Result<PerfMetrics, GraphError> {
        Ok(self.evaluate(&graph.op(op)?))
    }

    fn evaluate(&self, op: &OpView<'_>) -> PerfMetrics {
        if let OpDef::AllGather(gather) = op.def() {
            if gather.world_size != self.config.world_size {
                warn!(
                    op = %op.id(),
                    gather_world_size = gather.world_size,
                    configured_world_size = self.config.world_size,
                    "all-gather width differs from the configured communicator"
                );
            }
        }
        let io = op.io();
        let def = op.def();
        PerfMetrics::new(
            def.compute_time(&io, &self.cx),
            def.memory_cost(&io, &self.cx),
            def.parallelism(&io, &self.cx),
        )
    }

    /// Whole-graph estimate.
    ///
    /// Compute time and memory cost add up over all operators; parallelism is folded
    /// with the configured reduction. An empty graph yields all zeros. With
    /// `profiling` set (or `profile` enabled in the config) every operator's estimate
    /// is logged at info level.
    pub fn perf_metrics(&self, graph: &Graph, profiling: bool) -> Result<PerfMetrics, GraphError> {
        let profiling = profiling || self.config.profile;
        let mut total = PerfMetrics::default();
        let mut parallelism: Option<f64> = None;
        for id in graph.topological_order()? {
            let op = graph.op(id)?;
            let metrics = self.evaluate(&op);
            if profiling {
                info!(
                    op = %op,
                    compute_time = metrics.compute_time,
                    memory_cost = metrics.memory_cost,
                    parallelism = metrics.parallelism,
                    "operator estimate"
                );
            } else {
                trace!(
                    op = %id,
                    kind = %op.kind(),
                    compute_time = metrics.compute_time,
                    memory_cost = metrics.memory_cost,
                    parallelism = metrics.parallelism,
                    "operator estimate"
                );
            }
            total.compute_time += metrics.compute_time;
            total.memory_cost += metrics.memory_cost;
            parallelism = Some(match parallelism {
                None => metrics.parallelism,
                Some(acc) => self.fold_parallelism(acc, metrics.parallelism),
            });
        }
        total.parallelism = parallelism.unwrap_or(0.0);
        if profiling {
            info!(
                ops = graph.num_ops(),
                compute_time = total.compute_time,
                memory_cost = total.memory_cost,
                parallelism = total.parallelism,
                "graph estimate"
            );
        }
        Ok(total)
    }

    fn fold_parallelism(&self, acc: f64, value: f64) -> f64 {
        match self.config.parallelism {
            ParallelismReduction::Min => acc.min(value),
            ParallelismReduction::Max => acc.max(value),
            ParallelismReduction::Sum => acc + value,
        }
    }

    /// Compares `fused` against `original`.
    ///
    /// Lower compute time wins. Inside the relative `fuse_epsilon` window the lower
    /// memory cost wins, then the higher parallelism; a full tie keeps the original.
    pub fn fusion_decision(
        &self,
        original: &Graph,
        fused: &Graph,
    ) -> Result<FusionDecision, GraphError> {
        let before = self.perf_metrics(original, false)?;
        let after = self.perf_metrics(fused, false)?;
        let (fuse, criterion) = decide(&before, &after, self.config.fuse_epsilon);
        debug!(
            fuse,
            criterion = ?criterion,
            original_time = before.compute_time,
            fused_time = after.compute_time,
            "fusion decision"
        );
        Ok(FusionDecision {
            fuse,
            criterion,
            original: before,
            fused: after,
        })
    }

    pub fn should_fuse(&self, original: &Graph, fused: &Graph) -> Result<bool, GraphError> {
        Ok(self.fusion_decision(original, fused)?.fuse)
    }

    /// Per-operator estimates plus the graph total.
    pub fn profile(&self, graph: &Graph) -> Result<ProfileReport, GraphError> {
        let mut rows = Vec::with_capacity(graph.num_ops());
        for id in graph.topological_order()? {
            let op = graph.op(id)?;
            rows.push(ProfileRow::new(&op, self.evaluate(&op)));
        }
        let total = self.perf_metrics(graph, false)?;
        Ok(ProfileReport::new(self.config.clone(), rows, total))
    }
}

fn tied(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= epsilon * a.abs().max(b.abs())
}

fn decide(original: &PerfMetrics, fused: &PerfMetrics, epsilon: f64) -> (bool, FusionCriterion) {
    if !tied(original.compute_time, fused.compute_time, epsilon) {
        return (
            fused.compute_time < original.compute_time,
            FusionCriterion::ComputeTime,
        );
    }
    if !tied(original.memory_cost, fused.memory_cost, epsilon) {
        return (
            fused.memory_cost < original.memory_cost,
            FusionCriterion::MemoryCost,
        );
    }
    if !tied(original.parallelism, fused.parallelism, epsilon) {
        return (
            fused.parallelism > original.parallelism,
            FusionCriterion::Parallelism,
        );
    }
    (false, FusionCriterion::Tie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_time_decides_outside_the_tie_window() {
        let original = PerfMetrics::new(2.0, 10.0, 4.0);
        let fused = PerfMetrics::new(1.0, 50.0, 1.0);
        assert_eq!(
            decide(&original, &fused, 1e-9),
            (true, FusionCriterion::ComputeTime)
        );
        assert_eq!(
            decide(&fused, &original, 1e-9),
            (false, FusionCriterion::ComputeTime)
        );
    }

    #[test]
    fn ties_fall_through_memory_then_parallelism() {
        let original = PerfMetrics::new(1.0, 10.0, 4.0);
        let cheaper = PerfMetrics::new(1.0 + 1e-12, 8.0, 1.0);
        assert_eq!(
            decide(&original, &cheaper, 1e-9),
            (true, FusionCriterion::MemoryCost)
        );
        let wider = PerfMetrics::new(1.0, 10.0, 8.0);
        assert_eq!(
            decide(&original, &wider, 1e-9),
            (true, FusionCriterion::Parallelism)
        );
        assert_eq!(
            decide(&original, &original, 1e-9),
            (false, FusionCriterion::Tie)
        );
    }
}
