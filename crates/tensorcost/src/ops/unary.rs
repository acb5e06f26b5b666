//! Shape-preserving single-input operators and their close relatives.
//!
//! Scalar attributes (clip bounds, slopes, fill values) do not change kernel cost, so
//! they are left out of the attribute vectors.

use std::fmt;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use super::cost::{capped, CostContext, OpIo, NEGLIGIBLE_TIME};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{Arity, OpKind, OpSemantics};
use crate::error::Unsupported;
use crate::tensor::shape::is_unidirectional_broadcast;
use crate::tensor::{DType, HostContext, Shape, Tensor};

fn same_shape(inputs: &[&Tensor]) -> Result<Vec<Shape>> {
    Ok(vec![inputs[0].shape().clone()])
}

fn shape_key(kind: OpKind, io: &OpIo<'_>) -> KeyVector {
    let mut key = key_with_kind(kind);
    push_dims(&mut key, io.out_dims(0));
    key
}

/// Unary math or activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unary {
    kind: OpKind,
}

impl Unary {
    pub fn new(kind: OpKind) -> Self {
        Unary { kind }
    }

    pub fn relu() -> Self {
        Self::new(OpKind::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::new(OpKind::Sigmoid)
    }

    pub fn tanh() -> Self {
        Self::new(OpKind::Tanh)
    }

    pub fn is_unary_kind(kind: OpKind) -> bool {
        (OpKind::Relu.tag()..=OpKind::Softplus.tag()).contains(&kind.tag())
    }

    fn op_cost(&self) -> f64 {
        match self.kind {
            OpKind::Neg | OpKind::Abs | OpKind::Sign | OpKind::Not => 0.5,
            OpKind::Exp
            | OpKind::Sqrt
            | OpKind::Tanh
            | OpKind::Sin
            | OpKind::Cos
            | OpKind::Tan
            | OpKind::Asin
            | OpKind::Acos
            | OpKind::Atan
            | OpKind::Sinh
            | OpKind::Cosh
            | OpKind::Asinh
            | OpKind::Acosh
            | OpKind::Atanh => 3.0,
            _ => 1.0,
        }
    }
}

impl OpSemantics for Unary {
    fn kind(&self) -> OpKind {
        self.kind
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, _inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        ensure!(
            Self::is_unary_kind(self.kind),
            "{} is not a unary operator",
            self.kind
        );
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * self.op_cost() / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let factor = match self.kind {
            OpKind::Exp | OpKind::Tanh | OpKind::Erf => 1.1,
            _ => 1.0,
        };
        (io.in_traffic(cx) + io.out_traffic(cx)) * factor
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let efficiency = match self.kind {
            OpKind::Exp | OpKind::Sin | OpKind::Cos => 0.8,
            _ => 1.0,
        };
        capped(io.in_size(0) * efficiency, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(self.kind, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Clip {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl Clip {
    pub fn new(min: Option<f32>, max: Option<f32>) -> Self {
        Clip { min, max }
    }
}

impl OpSemantics for Clip {
    fn kind(&self) -> OpKind {
        OpKind::Clip
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            ensure!(min <= max, "clip bounds are inverted: min {min} > max {max}");
        }
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 1.2 / 5e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.in_size(0) * 0.8, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(OpKind::Clip, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Clip)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        if let Some(min) = self.min {
            write!(f, "min={min},")?;
        }
        if let Some(max) = self.max {
            write!(f, "max={max},")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hardtanh {
    pub min: f32,
    pub max: f32,
}

impl Default for Hardtanh {
    fn default() -> Self {
        Hardtanh {
            min: -1.0,
            max: 1.0,
        }
    }
}

impl OpSemantics for Hardtanh {
    fn kind(&self) -> OpKind {
        OpKind::Hardtanh
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(
            self.min <= self.max,
            "hardtanh bounds are inverted: min {} > max {}",
            self.min,
            self.max
        );
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 0.7 / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.traffic(io.input(0)) * 2.0
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(OpKind::Hardtanh, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Hardtanh)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "min={},max={},", self.min, self.max)
    }
}

/// Overwrites every element with a constant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fill {
    pub value: f32,
}

impl OpSemantics for Fill {
    fn kind(&self) -> OpKind {
        OpKind::Fill
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.out_size(0) * 0.2 / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(OpKind::Fill, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Fill)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "value={},", self.value)
    }
}

/// Half the squared L2 norm, reduced to one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct L2Loss;

impl OpSemantics for L2Loss {
    fn kind(&self) -> OpKind {
        OpKind::L2Loss
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, _inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![Shape::new(vec![1])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        (2.0 * io.in_size(0) + 1.0) / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.in_size(0) / 2.0, 256.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::L2Loss);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::L2Loss)
    }
}

/// Supported dtype conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastType {
    Float2Float16,
    Float2Int64,
    Float2Int32,
    Float2Int16,
    Float2Int8,
    Float2BFloat16,
    Int322Float,
    Int322Int8,
    Int322Int16,
    Int322Int64,
    Int162Float,
    Int162Int32,
    Int82Float,
    Int82Int16,
    Int82Int32,
    Uint82Float,
    Uint82Int32,
    Uint82Int64,
    Int642Int32,
    Int642Uint32,
    Int642Float,
    Uint322Int64,
    Float162Float,
    BFloat162Float,
    Float2Float,
}

impl CastType {
    pub fn source(self) -> DType {
        use CastType::*;
        match self {
            Float2Float16 | Float2Int64 | Float2Int32 | Float2Int16 | Float2Int8
            | Float2BFloat16 | Float2Float => DType::Float32,
            Int322Float | Int322Int8 | Int322Int16 | Int322Int64 => DType::Int32,
            Int162Float | Int162Int32 => DType::Int16,
            Int82Float | Int82Int16 | Int82Int32 => DType::Int8,
            Uint82Float | Uint82Int32 | Uint82Int64 => DType::UInt8,
            Int642Int32 | Int642Uint32 | Int642Float => DType::Int64,
            Uint322Int64 => DType::UInt32,
            Float162Float => DType::Float16,
            BFloat162Float => DType::BFloat16,
        }
    }

    pub fn target(self) -> DType {
        use CastType::*;
        match self {
            Float2Float16 => DType::Float16,
            Float2Int64 | Int322Int64 | Uint82Int64 | Uint322Int64 => DType::Int64,
            Float2Int32 | Int162Int32 | Int82Int32 | Uint82Int32 | Int642Int32 => DType::Int32,
            Float2Int16 | Int322Int16 | Int82Int16 => DType::Int16,
            Float2Int8 | Int322Int8 => DType::Int8,
            Float2BFloat16 => DType::BFloat16,
            Int642Uint32 => DType::UInt32,
            Int322Float | Int162Float | Int82Float | Uint82Float | Int642Float
            | Float162Float | BFloat162Float | Float2Float => DType::Float32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cast {
    pub cast: CastType,
}

impl Cast {
    pub fn new(cast: CastType) -> Self {
        Cast { cast }
    }
}

impl OpSemantics for Cast {
    fn kind(&self) -> OpKind {
        OpKind::Cast
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        same_shape(inputs)
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        ensure!(
            inputs[0].dtype() == self.cast.source(),
            "{:?} expects {} input, got {}",
            self.cast,
            self.cast.source(),
            inputs[0].dtype()
        );
        Ok(vec![self.cast.target()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 0.5 / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = shape_key(OpKind::Cast, io);
        key.push(self.cast as i64);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Cast);
        key.push(self.cast as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "cast={:?},", self.cast)
    }
}

/// Emits the input's dims as a rank-1 `Int64` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShapeOf;

impl OpSemantics for ShapeOf {
    fn kind(&self) -> OpKind {
        OpKind::Shape
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![Shape::new(vec![inputs[0].rank()])])
    }

    fn infer_dtypes(&self, _inputs: &[&Tensor]) -> Result<Vec<DType>> {
        Ok(vec![DType::Int64])
    }

    fn compute_time(&self, _io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        NEGLIGIBLE_TIME
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.scaled(io.input(0).rank() as f64, DType::Int64)
    }

    fn parallelism(&self, _io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        1.0
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Shape);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Shape)
    }
}

/// Leaky ReLU with a learned slope tensor `(x, slope)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PRelu;

impl OpSemantics for PRelu {
    fn kind(&self) -> OpKind {
        OpKind::PRelu
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(
            is_unidirectional_broadcast(inputs[0].dims(), inputs[1].dims()),
            "slope {} does not broadcast into input {}",
            inputs[1].shape(),
            inputs[0].shape()
        );
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 1.2 / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.traffic(io.input(0)) * 2.0 + cx.traffic(io.input(1))
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(OpKind::PRelu, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::PRelu)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyRelu {
    pub alpha: f32,
}

impl Default for LeakyRelu {
    fn default() -> Self {
        LeakyRelu { alpha: 0.01 }
    }
}

impl OpSemantics for LeakyRelu {
    fn kind(&self) -> OpKind {
        OpKind::LeakyRelu
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.traffic(io.input(0)) * 2.0
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(OpKind::LeakyRelu, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::LeakyRelu)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "alpha={},", self.alpha)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogBase {
    #[default]
    E,
    Two,
    Ten,
}

impl LogBase {
    fn tag(self) -> i64 {
        match self {
            LogBase::E => 0,
            LogBase::Two => 1,
            LogBase::Ten => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Log {
    pub base: LogBase,
}

impl OpSemantics for Log {
    fn kind(&self) -> OpKind {
        OpKind::Log
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 5.0 / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.traffic(io.input(0)) * 2.0
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = shape_key(OpKind::Log, io);
        key.push(self.base.tag());
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Log);
        key.push(self.base.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "base={:?},", self.base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Elu {
    pub alpha: f32,
}

impl Default for Elu {
    fn default() -> Self {
        Elu { alpha: 1.0 }
    }
}

impl OpSemantics for Elu {
    fn kind(&self) -> OpKind {
        OpKind::Elu
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 3.0 / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.traffic(io.input(0)) * 2.0
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(OpKind::Elu, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Elu)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "alpha={},", self.alpha)
    }
}

/// Gradient of an activation. Inputs are `(y, dy, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationBackward {
    kind: OpKind,
}

impl ActivationBackward {
    pub fn new(kind: OpKind) -> Self {
        ActivationBackward { kind }
    }

    pub fn relu() -> Self {
        Self::new(OpKind::ReluBackward)
    }
}

impl OpSemantics for ActivationBackward {
    fn kind(&self) -> OpKind {
        self.kind
    }

    fn arity(&self) -> Arity {
        Arity::exact(3, 1)
    }

    fn prepare(&mut self, _inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        ensure!(
            matches!(
                self.kind,
                OpKind::ReluBackward | OpKind::SigmoidBackward | OpKind::TanhBackward
            ),
            "{} is not an activation gradient",
            self.kind
        );
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(
            inputs[0].dims() == inputs[1].dims(),
            "gradient {} must match activation output {}",
            inputs[1].shape(),
            inputs[0].shape()
        );
        same_shape(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let per_element = match self.kind {
            OpKind::ReluBackward => 1.0,
            OpKind::SigmoidBackward | OpKind::TanhBackward => 3.0,
            _ => 2.0,
        };
        io.out_size(0) * per_element / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.out_size(0) / 16.0
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        shape_key(self.kind, io)
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(self.kind)
    }
}

/// Inference-mode dropout producing `(data, mask)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    pub ratio: f32,
    pub training: bool,
}

impl Dropout {
    pub fn new(ratio: f32) -> Self {
        Dropout {
            ratio,
            training: false,
        }
    }
}

impl OpSemantics for Dropout {
    fn kind(&self) -> OpKind {
        OpKind::Dropout
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 2)
    }

    fn prepare(&mut self, _inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        if self.training {
            return Err(Unsupported::new("training-mode dropout").into());
        }
        ensure!(
            (0.0..1.0).contains(&self.ratio),
            "dropout ratio {} must lie in [0, 1)",
            self.ratio
        );
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let shape = inputs[0].shape().clone();
        Ok(vec![shape.clone(), shape])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        Ok(vec![inputs[0].dtype(), DType::Bool])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * 3.6 / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.in_size(0) * 0.95, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Dropout);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Dropout)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "ratio={},", self.ratio)
    }
}
