//! Broadcasting binary operators, `MSELoss` and `Where`.

use std::fmt;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use super::cost::{capped, log2, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{ActType, Arity, OpKind, OpSemantics};
use crate::config::MemoryUnit;
use crate::error::Unsupported;
use crate::tensor::shape::{broadcast_all, broadcast_shapes};
use crate::tensor::{DType, HostContext, Shape, Tensor};

/// Binary elementwise operator with numpy broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elementwise {
    kind: OpKind,
    act: ActType,
}

impl Elementwise {
    pub fn new(kind: OpKind) -> Self {
        Elementwise {
            kind,
            act: ActType::None,
        }
    }

    pub fn add() -> Self {
        Self::new(OpKind::Add)
    }

    pub fn sub() -> Self {
        Self::new(OpKind::Sub)
    }

    pub fn mul() -> Self {
        Self::new(OpKind::Mul)
    }

    pub fn div() -> Self {
        Self::new(OpKind::Div)
    }

    /// Fuses an activation into the operator output.
    pub fn with_act(mut self, act: ActType) -> Self {
        self.act = act;
        self
    }

    pub fn act(&self) -> ActType {
        self.act
    }

    pub fn is_elementwise_kind(kind: OpKind) -> bool {
        matches!(
            kind,
            OpKind::Add
                | OpKind::Sub
                | OpKind::Mul
                | OpKind::Div
                | OpKind::Pow
                | OpKind::Max
                | OpKind::Min
                | OpKind::Equal
                | OpKind::Greater
                | OpKind::GreaterEqual
                | OpKind::Less
                | OpKind::LessEqual
                | OpKind::And
                | OpKind::Or
                | OpKind::Xor
        )
    }

    fn produces_bool(&self) -> bool {
        matches!(
            self.kind,
            OpKind::Equal
                | OpKind::Greater
                | OpKind::GreaterEqual
                | OpKind::Less
                | OpKind::LessEqual
                | OpKind::And
                | OpKind::Or
                | OpKind::Xor
        )
    }

    fn complexity(&self) -> f64 {
        match self.kind {
            OpKind::Add | OpKind::Sub => 1.0,
            OpKind::Mul => 1.1,
            OpKind::Div | OpKind::Pow => 1.3,
            OpKind::Equal
            | OpKind::Greater
            | OpKind::GreaterEqual
            | OpKind::Less
            | OpKind::LessEqual => 0.8,
            _ => 1.0,
        }
    }
}

impl OpSemantics for Elementwise {
    fn kind(&self) -> OpKind {
        self.kind
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn prepare(&mut self, _inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        ensure!(
            Self::is_elementwise_kind(self.kind),
            "{} is not a binary elementwise operator",
            self.kind
        );
        if self.act.is_some()
            && !matches!(
                self.kind,
                OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div
            )
        {
            return Err(Unsupported::new(format!("fused activation on {}", self.kind)).into());
        }
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let out = broadcast_shapes(inputs[0].dims(), inputs[1].dims())?;
        Ok(vec![Shape::new(out)])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        ensure!(
            inputs[0].dtype() == inputs[1].dtype(),
            "operand dtypes differ: {} vs {}",
            inputs[0].dtype(),
            inputs[1].dtype()
        );
        if self.produces_bool() {
            Ok(vec![DType::Bool])
        } else {
            Ok(vec![inputs[0].dtype()])
        }
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let out = io.out_size(0);
        let act = if self.act.is_some() { 0.1 * out } else { 0.0 };
        (out * self.complexity() + act) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let smaller = cx.traffic(io.input(0)).min(cx.traffic(io.input(1)));
        cx.traffic(io.output(0)) * 1.1 + smaller * 0.1
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0) * 0.95, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(self.kind);
        push_dims(&mut key, io.out_dims(0));
        key.push(self.act.tag());
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(self.kind);
        key.push(self.act.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        if self.act.is_some() {
            write!(f, "act={:?},", self.act)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reduction {
    #[default]
    None,
    Mean,
    Sum,
}

impl Reduction {
    fn tag(self) -> i64 {
        match self {
            Reduction::None => 0,
            Reduction::Mean => 1,
            Reduction::Sum => 2,
        }
    }
}

/// Mean squared error between two equally shaped tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MseLoss {
    pub reduction: Reduction,
}

impl MseLoss {
    pub fn new(reduction: Reduction) -> Self {
        MseLoss { reduction }
    }
}

impl OpSemantics for MseLoss {
    fn kind(&self) -> OpKind {
        OpKind::MseLoss
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(
            inputs[0].dims() == inputs[1].dims(),
            "prediction {} and target {} must have equal shapes",
            inputs[0].shape(),
            inputs[1].shape()
        );
        Ok(match self.reduction {
            Reduction::None => vec![inputs[0].shape().clone()],
            Reduction::Mean | Reduction::Sum => vec![Shape::new(vec![1])],
        })
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let size = io.in_size(0);
        let mut per_element = 2.0;
        if self.reduction != Reduction::None && size > 0.0 {
            per_element += log2(size) / size;
        }
        size * per_element / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx) + cx.traffic(io.input(0))
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        match self.reduction {
            Reduction::None => capped(io.in_size(0), 1024.0),
            Reduction::Mean | Reduction::Sum => capped(log2(io.in_size(0)) * 32.0, 512.0),
        }
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::MseLoss);
        push_dims(&mut key, io.in_dims(0));
        key.push(self.reduction.tag());
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::MseLoss);
        key.push(self.reduction.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "reduction={:?},", self.reduction)
    }
}

/// Selects `x` where `cond` holds and `y` elsewhere. Inputs are `(x, y, cond)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Where;

impl Where {
    fn broadcast_flags(io: &OpIo<'_>) -> [bool; 3] {
        let out = io.out_dims(0);
        [
            io.in_dims(0) != out,
            io.in_dims(1) != out,
            io.in_dims(2) != out,
        ]
    }
}

impl OpSemantics for Where {
    fn kind(&self) -> OpKind {
        OpKind::Where
    }

    fn arity(&self) -> Arity {
        Arity::exact(3, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let out = broadcast_all(inputs.iter().map(|t| t.dims()))?;
        Ok(vec![Shape::new(out)])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        if inputs[0].dtype() != inputs[1].dtype() {
            bail!(
                "branches must share a dtype, got {} and {}",
                inputs[0].dtype(),
                inputs[1].dtype()
            );
        }
        Ok(vec![inputs[0].dtype()])
    }

    /// Select cost per output element plus operand reads weighted by their sizes.
    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let reads = 0.1 * io.in_size(0) + 0.1 * io.in_size(1) + 0.2 * io.in_size(2);
        (io.out_size(0) * 2.0 + reads) / 3e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let flags = Self::broadcast_flags(io);
        let access = |broadcast: bool| if broadcast { 1.2 } else { 1.0 };
        // Conditions are byte-wide masks; element counts are weighted down to match.
        let cond_ratio = match cx.memory_unit() {
            MemoryUnit::Elements => 0.25,
            MemoryUnit::Bytes => 1.0,
        };
        cx.traffic(io.input(2)) * access(flags[2]) * cond_ratio
            + cx.traffic(io.input(0)) * access(flags[0])
            + cx.traffic(io.input(1)) * access(flags[1])
            + cx.traffic(io.output(0))
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let out = io.out_size(0);
        if Self::broadcast_flags(io).iter().any(|&b| b) {
            out * 0.9
        } else {
            out
        }
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Where);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Where)
    }
}
