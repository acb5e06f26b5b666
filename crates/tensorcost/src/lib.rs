//! Tensor graph IR with shape/dtype inference and an analytical cost model.
//!
//! Operators are registered into a [`Graph`], which infers and validates their
//! outputs. A [`CostRuntime`] then estimates compute time, memory traffic and
//! parallelism for single operators or whole graphs, and decides whether a fused
//! variant of a graph beats the original. No kernel is ever executed.

pub mod config;
mod env;
pub mod error;
pub mod graph;
pub mod ops;
pub mod runtime;
pub mod tensor;

pub use config::{CostModelConfig, MemoryUnit, ParallelismReduction};
pub use error::{ConfigError, GraphError, Unsupported};
pub use graph::{Graph, OpId, OpView};
pub use ops::{ActType, CostContext, KeyVector, OpDef, OpKind, OpSemantics, PerfKey};
pub use runtime::{
    CostRuntime, FusionCriterion, FusionDecision, PerfMetrics, ProfileReport, ProfileRow,
};
pub use tensor::{DType, HostContext, ResidentHost, Shape, Tensor, TensorData, TensorId};
