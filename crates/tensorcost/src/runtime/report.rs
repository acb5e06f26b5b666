use serde::Serialize;

use super::PerfMetrics;
use crate::config::CostModelConfig;
use crate::graph::OpView;

/// One operator's estimate inside a [`ProfileReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRow {
    pub op: u32,
    pub guid: u64,
    pub kind: &'static str,
    pub description: String,
    pub perf_key: String,
    pub metrics: PerfMetrics,
}

impl ProfileRow {
    pub(crate) fn new(op: &OpView<'_>, metrics: PerfMetrics) -> Self {
        ProfileRow {
            op: op.id().0,
            guid: op.guid(),
            kind: op.kind().name(),
            description: op.to_string(),
            perf_key: op.perf_key().to_string(),
            metrics,
        }
    }
}

/// Per-operator rows in topological order followed by the graph total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileReport {
    pub config: CostModelConfig,
    pub ops: Vec<ProfileRow>,
    pub total: PerfMetrics,
}

impl ProfileReport {
    pub(crate) fn new(config: CostModelConfig, ops: Vec<ProfileRow>, total: PerfMetrics) -> Self {
        ProfileReport { config, ops, total }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Row with the largest compute time.
    pub fn slowest(&self) -> Option<&ProfileRow> {
        self.ops
            .iter()
            .max_by(|a, b| a.metrics.compute_time.total_cmp(&b.metrics.compute_time))
    }
}
