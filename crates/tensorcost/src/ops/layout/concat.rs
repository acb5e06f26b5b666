use std::fmt;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::ops::cost::{capped, log2, CostContext, OpIo};
use crate::ops::key::{key_with_kind, push_dims, KeyVector};
use crate::ops::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::shape::normalize_axis;
use crate::tensor::{HostContext, Shape, Tensor};

/// Joins inputs along one axis; all other dims must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concat {
    axis: isize,
    resolved: usize,
}

impl Concat {
    pub fn new(axis: isize) -> Self {
        Concat { axis, resolved: 0 }
    }
}

impl OpSemantics for Concat {
    fn kind(&self) -> OpKind {
        OpKind::Concat
    }

    fn arity(&self) -> Arity {
        Arity::variadic(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = normalize_axis(self.axis, inputs[0].rank())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        // A pair with one empty member passes the other through unchanged.
        if let [a, b] = inputs {
            if a.size() == 0 {
                return Ok(vec![b.shape().clone()]);
            }
            if b.size() == 0 {
                return Ok(vec![a.shape().clone()]);
            }
        }
        let axis = normalize_axis(self.axis, inputs[0].rank())?;
        let mut out = inputs[0].dims().to_vec();
        for input in &inputs[1..] {
            ensure!(
                input.rank() == out.len(),
                "rank of {} differs from {}",
                input.shape(),
                inputs[0].shape()
            );
            for (dim, (&have, &want)) in input.dims().iter().zip(inputs[0].dims()).enumerate() {
                if dim != axis {
                    ensure!(
                        have == want,
                        "dim {} of {} does not match {}",
                        dim,
                        input.shape(),
                        inputs[0].shape()
                    );
                }
            }
            out[axis] += input.dims()[axis];
        }
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let total: f64 = io.inputs().iter().map(|t| t.size() as f64).sum();
        total / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let lanes: f64 = io
            .out_dims(0)
            .iter()
            .enumerate()
            .filter(|(dim, _)| *dim != self.resolved)
            .map(|(_, &d)| d as f64)
            .product();
        capped(lanes, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        key.push(io.inputs().len() as i64);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Concat);
        key.push(self.resolved as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "dim={},", self.resolved)
    }
}

/// How a [`Split`] divides its axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitSpec {
    /// Equal pieces; the remainder goes to the last one.
    Num(usize),
    /// Relative piece sizes; the axis must divide by their sum.
    Ratio(Vec<usize>),
}

impl SplitSpec {
    fn pieces(&self) -> usize {
        match self {
            SplitSpec::Num(num) => *num,
            SplitSpec::Ratio(ratio) => ratio.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    axis: isize,
    spec: SplitSpec,
    resolved: usize,
}

impl Split {
    pub fn new(axis: isize, spec: SplitSpec) -> Self {
        Split {
            axis,
            spec,
            resolved: 0,
        }
    }

    pub fn equal(axis: isize, num: usize) -> Self {
        Self::new(axis, SplitSpec::Num(num))
    }

    pub fn ratio(axis: isize, ratio: Vec<usize>) -> Self {
        Self::new(axis, SplitSpec::Ratio(ratio))
    }

    fn extents(&self, len: usize) -> Result<Vec<usize>> {
        match &self.spec {
            SplitSpec::Num(num) => {
                ensure!(*num > 0, "split count must be > 0");
                let piece = len / num;
                let mut out = vec![piece; *num];
                if let Some(last) = out.last_mut() {
                    *last += len - piece * num;
                }
                Ok(out)
            }
            SplitSpec::Ratio(ratio) => {
                let sum: usize = ratio.iter().sum();
                ensure!(
                    !ratio.is_empty() && sum > 0 && len % sum == 0,
                    "axis extent {} is not divisible by ratio sum {}",
                    len,
                    sum
                );
                let unit = len / sum;
                Ok(ratio.iter().map(|r| r * unit).collect())
            }
        }
    }
}

impl OpSemantics for Split {
    fn kind(&self) -> OpKind {
        OpKind::Split
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, self.spec.pieces())
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = normalize_axis(self.axis, inputs[0].rank())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        let axis = normalize_axis(self.axis, dims.len())?;
        let shapes = self
            .extents(dims[axis])?
            .into_iter()
            .map(|extent| {
                let mut out = dims.to_vec();
                out[axis] = extent;
                Shape::new(out)
            })
            .collect();
        Ok(shapes)
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let rank = io.in_dims(0).len().max(1) as f64;
        let copy = if self.resolved == 0 {
            0.05
        } else {
            0.2 + self.resolved as f64 / rank * 0.8
        };
        let split = 1.0 + log2(self.spec.pieces() as f64) * 0.05;
        io.in_size(0) * copy * split / 10e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let half = io.in_dims(0).len() / 2;
        let mut access = 1.0;
        if half > 0 && self.resolved > half {
            access = 1.0 + (self.resolved - half) as f64 / half as f64 * 0.5;
        }
        if self.resolved == 0 {
            access *= 0.2;
        }
        (io.in_traffic(cx) + io.out_traffic(cx)) * access
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let pieces = (self.spec.pieces() as f64).min(32.0);
        let within = io.out_size(0).sqrt().min(64.0);
        capped(pieces * within, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Split);
        push_dims(&mut key, io.in_dims(0));
        key.push(self.resolved as i64);
        key.push(self.spec.pieces() as i64);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Split);
        key.push(self.resolved as i64);
        key.push(self.spec.pieces() as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "dim={},num={},", self.resolved, self.spec.pieces())?;
        if let SplitSpec::Ratio(ratio) = &self.spec {
            write_list(f, "ratio", ratio)?;
        }
        Ok(())
    }
}

/// Repeats the input `num` extra times along `axis`: `dims[axis]·(num + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extend {
    axis: isize,
    pub num: usize,
    resolved: usize,
}

impl Extend {
    pub fn new(axis: isize, num: usize) -> Self {
        Extend {
            axis,
            num,
            resolved: 0,
        }
    }
}

impl OpSemantics for Extend {
    fn kind(&self) -> OpKind {
        OpKind::Extend
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = normalize_axis(self.axis, inputs[0].rank())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let mut out = inputs[0].dims().to_vec();
        let axis = normalize_axis(self.axis, out.len())?;
        out[axis] *= self.num + 1;
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let mapping = log2((self.num + 1) as f64) * 0.1;
        io.out_size(0) * (1.0 + mapping) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let others: f64 = dims
            .iter()
            .enumerate()
            .filter(|(dim, _)| *dim != self.resolved)
            .map(|(_, &d)| d as f64)
            .product();
        let extended = (dims[self.resolved] * (self.num + 1)).min(16) as f64;
        capped(others * extended, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Extend);
        push_dims(&mut key, io.in_dims(0));
        key.push(self.resolved as i64);
        key.push(self.num as i64);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Extend);
        key.push(self.resolved as i64);
        key.push(self.num as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "dim={},num={},", self.resolved, self.num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, TensorId};

    fn tensor(id: u32, dims: &[usize]) -> Tensor {
        Tensor::new(TensorId(id), u64::from(id), Shape::new(dims.to_vec()), DType::Float32)
    }

    #[test]
    fn equal_split_gives_remainder_to_last_piece() {
        let x = tensor(0, &[2, 10]);
        let shapes = Split::equal(1, 3).infer_shapes(&[&x]).expect("split");
        let extents: Vec<usize> = shapes.iter().map(|s| s.dims()[1]).collect();
        assert_eq!(extents, vec![3, 3, 4]);
    }

    #[test]
    fn ratio_split_requires_divisible_axis() {
        let x = tensor(0, &[12, 4]);
        let shapes = Split::ratio(0, vec![1, 2]).infer_shapes(&[&x]).expect("split");
        assert_eq!(shapes[0].dims(), &[4, 4]);
        assert_eq!(shapes[1].dims(), &[8, 4]);
        Split::ratio(0, vec![5]).infer_shapes(&[&x]).expect_err("12 % 5");
    }

    #[test]
    fn concat_pair_with_empty_member_passes_through() {
        let a = tensor(0, &[0]);
        let b = tensor(1, &[3, 5]);
        let out = Concat::new(0).infer_shapes(&[&a, &b]).expect("concat");
        assert_eq!(out[0].dims(), &[3, 5]);
    }

    #[test]
    fn extend_multiplies_axis() {
        let x = tensor(0, &[2, 3]);
        let out = Extend::new(-1, 2).infer_shapes(&[&x]).expect("extend");
        assert_eq!(out[0].dims(), &[2, 9]);
    }
}
