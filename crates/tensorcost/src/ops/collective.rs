//! Collective communication primitives.
//!
//! Costs follow a bandwidth/latency model that never consults a real communicator.
//! The communicator width `W` comes from [`CostContext::world_size`]; only
//! [`AllGather`] carries its own width because it determines the output count.

use std::fmt;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use super::cost::{log2, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::{DType, Shape, Tensor};

/// Seconds per element per hop of a tree collective.
const HOP_TIME: f64 = 1e-7;
const LINK_BYTES_PER_SEC: f64 = 10.0 * 1e9;
const PROTOCOL_OVERHEAD_BYTES: f64 = 256.0;
const MIB: f64 = 1024.0 * 1024.0;
const MAX_LINK_CHANNELS: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AllReduceOp {
    #[default]
    Sum,
    Prod,
    Min,
    Max,
    Avg,
}

impl AllReduceOp {
    fn kind(self) -> OpKind {
        match self {
            AllReduceOp::Sum => OpKind::AllReduceSum,
            AllReduceOp::Prod => OpKind::AllReduceProd,
            AllReduceOp::Min => OpKind::AllReduceMin,
            AllReduceOp::Max => OpKind::AllReduceMax,
            AllReduceOp::Avg => OpKind::AllReduceAvg,
        }
    }

    fn cost_factor(self) -> f64 {
        match self {
            AllReduceOp::Sum => 1.0,
            AllReduceOp::Prod => 1.2,
            AllReduceOp::Min | AllReduceOp::Max => 1.1,
            AllReduceOp::Avg => 1.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllReduce {
    pub op: AllReduceOp,
}

impl AllReduce {
    pub fn new(op: AllReduceOp) -> Self {
        AllReduce { op }
    }

    pub fn sum() -> Self {
        AllReduce::new(AllReduceOp::Sum)
    }

    pub fn avg() -> Self {
        AllReduce::new(AllReduceOp::Avg)
    }
}

impl OpSemantics for AllReduce {
    fn kind(&self) -> OpKind {
        self.op.kind()
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let size = io.in_size(0);
        let comm = size * log2(cx.world_size()) * HOP_TIME;
        let reduce = size * 1e-9;
        (comm + reduce) * self.op.cost_factor()
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, _io: &OpIo<'_>, cx: &CostContext) -> f64 {
        cx.world_size() * 0.9
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(self.op.kind())
    }
}

/// Gathers the input from every rank; produces `world_size` copies of the input shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllGather {
    pub world_size: usize,
}

impl AllGather {
    pub fn new(world_size: usize) -> Self {
        AllGather { world_size }
    }
}

impl OpSemantics for AllGather {
    fn kind(&self) -> OpKind {
        OpKind::AllGather
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, self.world_size)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(self.world_size >= 1, "world_size must be at least 1");
        Ok(vec![inputs[0].shape().clone(); self.world_size])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) * log2(self.world_size as f64) * HOP_TIME
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, _io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.world_size as f64 * 0.8
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::AllGather);
        push_dims(&mut key, io.in_dims(0));
        key.push(self.world_size as i64);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::AllGather);
        key.push(self.world_size as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "world_size={},", self.world_size)
    }
}

/// Broadcasts the tensor held by rank `root`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Broadcast {
    pub root: usize,
}

impl Broadcast {
    pub fn new(root: usize) -> Self {
        Broadcast { root }
    }
}

impl OpSemantics for Broadcast {
    fn kind(&self) -> OpKind {
        OpKind::Broadcast
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_size(0) * log2(cx.world_size()) * HOP_TIME
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, _io: &OpIo<'_>, cx: &CostContext) -> f64 {
        (cx.world_size() - 1.0).max(1.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Broadcast);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Broadcast)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "root={},", self.root)
    }
}

/// Point-to-point link time for `bytes` between ranks `source` and `destination`.
fn link_time(bytes: f64, source: usize, destination: usize) -> f64 {
    let distance = source.abs_diff(destination);
    let mut latency_ms = 0.01;
    if distance > 1 {
        latency_ms += distance as f64 * 0.005;
    }
    let setup = 1e-4;
    bytes / LINK_BYTES_PER_SEC + latency_ms / 1000.0 + setup
}

/// Channels a transfer of `bytes` can spread over.
fn link_parallelism(bytes: f64) -> f64 {
    let channels = if bytes > 10.0 * MIB {
        (bytes / (10.0 * MIB)).min(4.0)
    } else {
        1.0
    };
    channels.min(MAX_LINK_CHANNELS)
}

fn push_ranks(key: &mut KeyVector, source: usize, destination: usize) {
    key.push(source as i64);
    key.push(destination as i64);
}

/// Sends the input to rank `destination`; the output mirrors the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Send {
    pub source: usize,
    pub destination: usize,
}

impl Send {
    pub fn new(source: usize, destination: usize) -> Self {
        Send {
            source,
            destination,
        }
    }
}

impl OpSemantics for Send {
    fn kind(&self) -> OpKind {
        OpKind::Send
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        link_time(io.input(0).bytes() as f64, self.source, self.destination)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let payload = io.input(0).bytes() as f64;
        let output: f64 = io.outputs().iter().map(|t| t.bytes() as f64).sum();
        // payload plus its send buffer
        let bytes = 2.0 * payload + PROTOCOL_OVERHEAD_BYTES + output;
        cx.from_bytes(bytes, io.dtype())
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        link_parallelism(io.input(0).bytes() as f64)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Send);
        push_dims(&mut key, io.in_dims(0));
        push_ranks(&mut key, self.source, self.destination);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Send);
        push_ranks(&mut key, self.source, self.destination);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "source={},destination={},", self.source, self.destination)
    }
}

/// Receives a tensor of known shape and dtype from rank `source`.
///
/// The optional input only orders the receive after another operator; its shape is
/// never consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recv {
    pub source: usize,
    pub destination: usize,
    pub shape: Shape,
    pub dtype: DType,
}

impl Recv {
    pub fn new(source: usize, destination: usize, shape: Shape, dtype: DType) -> Self {
        Recv {
            source,
            destination,
            shape,
            dtype,
        }
    }
}

impl OpSemantics for Recv {
    fn kind(&self) -> OpKind {
        OpKind::Recv
    }

    fn arity(&self) -> Arity {
        Arity::range(0, 1, 1)
    }

    fn infer_shapes(&self, _inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![self.shape.clone()])
    }

    fn infer_dtypes(&self, _inputs: &[&Tensor]) -> Result<Vec<DType>> {
        Ok(vec![self.dtype])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        link_time(io.output(0).bytes() as f64, self.source, self.destination)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let output = io.output(0);
        let payload = output.bytes() as f64;
        let staging = if output.size() as f64 > MIB {
            (payload * 0.1).min(MIB)
        } else {
            0.0
        };
        cx.from_bytes(payload + staging + PROTOCOL_OVERHEAD_BYTES, output.dtype())
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        link_parallelism(io.output(0).bytes() as f64)
    }

    fn workload_vector(&self, _io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        key.push(i64::from(self.dtype.tag()));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Recv);
        push_dims(&mut key, self.shape.dims());
        push_ranks(&mut key, self.source, self.destination);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "source={},destination={},", self.source, self.destination)?;
        write_list(f, "shape", self.shape.dims())?;
        write!(f, "dtype={},", self.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorId;

    #[test]
    fn link_latency_grows_with_rank_distance() {
        let near = link_time(0.0, 0, 1);
        let far = link_time(0.0, 0, 5);
        assert!((near - (0.01 / 1000.0 + 1e-4)).abs() < 1e-15);
        assert!(far > near);
    }

    #[test]
    fn link_parallelism_is_bounded() {
        assert_eq!(link_parallelism(1.0), 1.0);
        assert_eq!(link_parallelism(20.0 * MIB), 2.0);
        assert_eq!(link_parallelism(1e12), 4.0);
    }

    #[test]
    fn all_gather_replicates_input() {
        let input = Tensor::new(TensorId(0), 0, Shape::new(vec![2, 3]), DType::Float32);
        let shapes = AllGather::new(4).infer_shapes(&[&input]).expect("gather");
        assert_eq!(shapes.len(), 4);
        assert!(shapes.iter().all(|s| s.dims() == [2, 3]));
        AllGather::new(0)
            .infer_shapes(&[&input])
            .expect_err("zero ranks");
    }
}
