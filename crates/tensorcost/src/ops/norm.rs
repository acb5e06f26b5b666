//! Softmax and the normalization layers.

use std::fmt;

use anyhow::{ensure, Result};

use super::cost::{capped, log2, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{Arity, OpKind, OpSemantics};
use crate::error::Unsupported;
use crate::tensor::shape::{is_unidirectional_broadcast, normalize_axis, product};
use crate::tensor::{DType, HostContext, Shape, Tensor};

/// Parallel lanes available inside one normalized row of `len` elements.
fn row_lanes(len: f64) -> f64 {
    (log2(len) * 4.0).clamp(1.0, 16.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Softmax {
    axis: isize,
    resolved: usize,
}

impl Softmax {
    pub fn new(axis: isize) -> Self {
        Softmax { axis, resolved: 0 }
    }

    pub fn axis(&self) -> usize {
        self.resolved
    }

    fn strided_axes(&self, rank: usize) -> f64 {
        rank.saturating_sub(1 + self.resolved) as f64
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl OpSemantics for Softmax {
    fn kind(&self) -> OpKind {
        OpKind::Softmax
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = normalize_axis(self.axis, inputs[0].rank())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let size = io.in_size(0);
        // max, 5 for exp, sum, normalize
        let ops = size * 8.0;
        let strided = self.strided_axes(io.in_dims(0).len());
        let cache = if strided > 0.0 {
            1.2 + 0.1 * strided
        } else {
            1.0
        };
        ops * cache / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let axis_len = dims[self.resolved].max(1) as f64;
        let rows = io.in_size(0) / axis_len;
        let strided = self.strided_axes(dims.len());
        let access = if strided > 0.0 {
            1.3 + 0.1 * strided
        } else {
            1.0
        };
        (io.in_traffic(cx) + io.out_traffic(cx)) * access + cx.scaled(rows * 2.0, io.dtype())
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let axis_len = io.in_dims(0)[self.resolved].max(1) as f64;
        let rows = io.in_size(0) / axis_len;
        capped(rows * row_lanes(axis_len), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Softmax);
        key.push(self.resolved as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "axis={},", self.resolved)
    }
}

/// Layer normalization over `axis..rank`. Inputs are `(x, scale[, bias])`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerNorm {
    axis: isize,
    pub eps: f32,
    pub stash_type: i32,
    resolved: usize,
}

impl LayerNorm {
    pub fn new(axis: isize, eps: f32) -> Self {
        LayerNorm {
            axis,
            eps,
            stash_type: 1,
            resolved: 0,
        }
    }

    fn outer_and_normalized(&self, dims: &[usize]) -> (f64, f64) {
        (product(&dims[..self.resolved]), product(&dims[self.resolved..]))
    }
}

impl Default for LayerNorm {
    fn default() -> Self {
        Self::new(-1, 1e-5)
    }
}

impl OpSemantics for LayerNorm {
    fn kind(&self) -> OpKind {
        OpKind::LayerNorm
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = normalize_axis(self.axis, inputs[0].rank())?;
        for param in &inputs[1..] {
            ensure!(
                is_unidirectional_broadcast(inputs[0].dims(), param.dims()),
                "parameter {} does not broadcast into {}",
                param.shape(),
                inputs[0].shape()
            );
        }
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (outer, normalized) = self.outer_and_normalized(io.in_dims(0));
        let elements = outer * normalized;
        let has_bias = if io.inputs().len() > 2 { 1.0 } else { 0.0 };
        let mean = elements + outer;
        let variance = 3.0 * elements + outer;
        let normalize = 3.0 * elements;
        let scale_shift = (1.0 + has_bias) * elements;
        (mean + variance + normalize + scale_shift) / 1.5e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let (outer, _) = self.outer_and_normalized(io.in_dims(0));
        io.in_traffic(cx) + io.out_traffic(cx) + cx.scaled(2.0 * outer, io.dtype())
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (outer, normalized) = self.outer_and_normalized(io.in_dims(0));
        capped(outer * row_lanes(normalized), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::LayerNorm);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::LayerNorm);
        key.push(self.resolved as i64);
        key.push(i64::from(self.stash_type));
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            f,
            "axis={},eps={},stash_type={},",
            self.resolved, self.eps, self.stash_type
        )
    }
}

/// Root-mean-square normalization over the last axis. Inputs are `(x, weight)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RmsNorm;

impl OpSemantics for RmsNorm {
    fn kind(&self) -> OpKind {
        OpKind::RmsNorm
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(inputs[0].rank() >= 1, "input must have rank >= 1");
        ensure!(
            is_unidirectional_broadcast(inputs[0].dims(), inputs[1].dims()),
            "weight {} does not broadcast into {}",
            inputs[1].shape(),
            inputs[0].shape()
        );
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let size = io.in_size(0);
        let last = io.in_dims(0).last().copied().unwrap_or(1).max(1) as f64;
        let rows = size / last;
        // square, sum, normalize and scale per element plus two ops per row
        (4.0 * size + 2.0 * rows) / 1.5e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let size = io.in_size(0);
        let last = io.in_dims(0).last().copied().unwrap_or(1).max(1) as f64;
        let scratch = cx.scaled(size + size / last, io.dtype());
        io.in_traffic(cx) + io.out_traffic(cx) + scratch
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let last = io.in_dims(0).last().copied().unwrap_or(1).max(1) as f64;
        capped(io.in_size(0) / last * row_lanes(last), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::RmsNorm);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::RmsNorm)
    }
}

/// Inference-mode batch normalization. Inputs are `(x, mean, var, scale, bias)`,
/// every parameter shaped `[c]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNorm {
    pub momentum: f32,
    pub eps: f32,
    pub training: bool,
}

impl BatchNorm {
    pub fn new(momentum: f32, eps: f32) -> Self {
        BatchNorm {
            momentum,
            eps,
            training: false,
        }
    }

    pub fn training(mut self) -> Self {
        self.training = true;
        self
    }
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new(0.9, 1e-5)
    }
}

impl OpSemantics for BatchNorm {
    fn kind(&self) -> OpKind {
        OpKind::BatchNorm
    }

    fn arity(&self) -> Arity {
        Arity::exact(5, 1)
    }

    fn prepare(&mut self, _inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        if self.training {
            return Err(Unsupported::new("training-mode batch normalization").into());
        }
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let x = inputs[0];
        ensure!(x.rank() >= 2, "input {} must have rank >= 2", x.shape());
        let channels = [x.dims()[1]];
        for (name, param) in ["mean", "var", "scale", "bias"].iter().zip(&inputs[1..]) {
            ensure!(
                param.dims() == channels,
                "{} must have shape [{}], got {}",
                name,
                channels[0],
                param.shape()
            );
        }
        Ok(vec![x.shape().clone()])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        for param in &inputs[1..] {
            ensure!(
                param.dtype() == DType::Float32,
                "batch norm parameters must be float32, got {}",
                param.dtype()
            );
        }
        Ok(vec![inputs[0].dtype()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 5.0 / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let mut lanes = dims[1] as f64;
        if dims[0] > 1 {
            lanes *= dims[0].min(8) as f64;
        }
        capped(lanes, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::BatchNorm);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::BatchNorm)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            f,
            "momentum={},eps={},training={},",
            self.momentum, self.eps, self.training
        )
    }
}

/// Per-instance normalization. Inputs are `(x, scale, bias)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceNorm {
    pub eps: f32,
}

impl InstanceNorm {
    pub fn new(eps: f32) -> Self {
        InstanceNorm { eps }
    }
}

impl Default for InstanceNorm {
    fn default() -> Self {
        Self::new(1e-5)
    }
}

impl OpSemantics for InstanceNorm {
    fn kind(&self) -> OpKind {
        OpKind::InstanceNorm
    }

    fn arity(&self) -> Arity {
        Arity::exact(3, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(
            inputs[0].rank() >= 2,
            "input {} must have rank >= 2",
            inputs[0].shape()
        );
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let instances = (dims[0] * dims[1]) as f64;
        let elements = io.in_size(0);
        // mean 1, variance 3, normalize 3 and scale-shift 2 per element
        (9.0 * elements + 2.0 * instances) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let scratch = cx.scaled(2.0 * (dims[0] * dims[1]) as f64, io.dtype());
        io.in_traffic(cx) + io.out_traffic(cx) + scratch
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        capped((dims[0] * dims[1]) as f64, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::InstanceNorm);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::InstanceNorm)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "eps={},", self.eps)
    }
}

/// Local response normalization across channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lrn {
    pub alpha: f32,
    pub beta: f32,
    pub bias: f32,
    pub size: usize,
}

impl Lrn {
    pub fn new(size: usize) -> Self {
        Lrn {
            alpha: 1e-4,
            beta: 0.75,
            bias: 1.0,
            size,
        }
    }

    fn spatial(dims: &[usize]) -> f64 {
        product(&dims[2..])
    }
}

impl OpSemantics for Lrn {
    fn kind(&self) -> OpKind {
        OpKind::Lrn
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        ensure!(self.size > 0, "window size must be > 0");
        ensure!(
            inputs[0].rank() >= 2,
            "input {} must have rank >= 2",
            inputs[0].shape()
        );
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let channels = io.in_dims(0)[1] as f64;
        let window = (self.size as f64).min(channels);
        io.in_size(0) * (window + 5.0) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let window = 1.0 + log2(self.size as f64) * 0.1;
        io.in_traffic(cx) * window + io.out_traffic(cx) + io.in_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let mut lanes = dims[0] as f64 * Self::spatial(dims);
        if self.size < dims[1] {
            lanes *= (dims[1] as f64 / self.size as f64).ceil().min(4.0);
        }
        capped(lanes, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Lrn);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Lrn)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            f,
            "alpha={},beta={},bias={},size={},",
            self.alpha, self.beta, self.bias, self.size
        )
    }
}
