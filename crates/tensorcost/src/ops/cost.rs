//! Shared plumbing for the analytical cost formulas.
//!
//! Every formula reads tensors through an [`OpIo`] and converts element counts into the
//! configured memory unit through a [`CostContext`]. Helpers here clamp the degenerate
//! cases (zero sizes, `log2` of values below one) so that estimates stay finite for any
//! legally constructed operator.

use crate::config::{CostModelConfig, MemoryUnit};
use crate::tensor::{DType, Tensor};

/// Ambient parameters shared by all cost queries of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostContext {
    world_size: usize,
    memory_unit: MemoryUnit,
}

impl Default for CostContext {
    fn default() -> Self {
        CostContext::from_config(&CostModelConfig::default())
    }
}

impl CostContext {
    pub fn from_config(config: &CostModelConfig) -> Self {
        CostContext {
            world_size: config.world_size.max(1),
            memory_unit: config.memory_unit,
        }
    }

    /// Communicator width used by the collective formulas.
    pub fn world_size(&self) -> f64 {
        self.world_size as f64
    }

    pub fn memory_unit(&self) -> MemoryUnit {
        self.memory_unit
    }

    /// Memory traffic of reading or writing `tensor` once.
    pub fn traffic(&self, tensor: &Tensor) -> f64 {
        self.scaled(tensor.size() as f64, tensor.dtype())
    }

    /// Converts an element count of `dtype` into the configured unit.
    pub fn scaled(&self, elements: f64, dtype: DType) -> f64 {
        match self.memory_unit {
            MemoryUnit::Elements => elements,
            MemoryUnit::Bytes => elements * dtype.size_in_bytes() as f64,
        }
    }

    /// Converts a byte count into the configured unit, using `dtype` as the element width.
    pub fn from_bytes(&self, bytes: f64, dtype: DType) -> f64 {
        match self.memory_unit {
            MemoryUnit::Elements => bytes / dtype.size_in_bytes() as f64,
            MemoryUnit::Bytes => bytes,
        }
    }
}

/// Input and output tensors of one registered operator.
#[derive(Debug, Clone)]
pub struct OpIo<'a> {
    inputs: Vec<&'a Tensor>,
    outputs: Vec<&'a Tensor>,
}

impl<'a> OpIo<'a> {
    pub fn new(inputs: Vec<&'a Tensor>, outputs: Vec<&'a Tensor>) -> Self {
        OpIo { inputs, outputs }
    }

    pub fn inputs(&self) -> &[&'a Tensor] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[&'a Tensor] {
        &self.outputs
    }

    pub fn input(&self, idx: usize) -> &'a Tensor {
        self.inputs[idx]
    }

    pub fn output(&self, idx: usize) -> &'a Tensor {
        self.outputs[idx]
    }

    pub fn in_dims(&self, idx: usize) -> &'a [usize] {
        self.inputs[idx].dims()
    }

    pub fn out_dims(&self, idx: usize) -> &'a [usize] {
        self.outputs[idx].dims()
    }

    /// Element count of input `idx` as `f64`.
    pub fn in_size(&self, idx: usize) -> f64 {
        self.inputs[idx].size() as f64
    }

    pub fn out_size(&self, idx: usize) -> f64 {
        self.outputs[idx].size() as f64
    }

    pub fn in_traffic(&self, cx: &CostContext) -> f64 {
        self.inputs.iter().map(|t| cx.traffic(t)).sum()
    }

    pub fn out_traffic(&self, cx: &CostContext) -> f64 {
        self.outputs.iter().map(|t| cx.traffic(t)).sum()
    }

    /// Element type used to scale derived (non-tensor) counts.
    pub fn dtype(&self) -> DType {
        self.inputs
            .first()
            .or_else(|| self.outputs.first())
            .map(|t| t.dtype())
            .unwrap_or(DType::Float32)
    }
}

/// `log2` with the argument clamped to at least one.
pub fn log2(value: f64) -> f64 {
    value.max(1.0).log2()
}

pub fn capped(value: f64, cap: f64) -> f64 {
    value.min(cap)
}

/// Placeholder time reported by operators that move no data.
pub const NEGLIGIBLE_TIME: f64 = 1e-6;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Shape, TensorId};

    #[test]
    fn traffic_follows_memory_unit() {
        let tensor = Tensor::new(TensorId(0), 1, Shape::new(vec![2, 3]), DType::Float16);
        let elements = CostContext::default();
        assert_eq!(elements.traffic(&tensor), 6.0);
        let bytes = CostContext::from_config(
            &CostModelConfig::default().with_memory_unit(MemoryUnit::Bytes),
        );
        assert_eq!(bytes.traffic(&tensor), 12.0);
        assert_eq!(elements.from_bytes(256.0, DType::Float32), 64.0);
    }

    #[test]
    fn log2_clamps_small_arguments() {
        assert_eq!(log2(0.0), 0.0);
        assert_eq!(log2(8.0), 3.0);
    }
}
