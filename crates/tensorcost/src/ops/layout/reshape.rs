use std::fmt;

use anyhow::{bail, ensure, Result};

use super::Relayout;
use crate::ops::cost::{capped, CostContext, OpIo};
use crate::ops::key::{key_with_kind, push_dims, KeyVector};
use crate::ops::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::shape::{broadcast_shapes, normalize_axes};
use crate::tensor::{HostContext, Shape, Tensor};

/// A reshape copies data when the rank changes or any leading dim moves.
fn reshape_copies(input: &[usize], output: &[usize]) -> bool {
    input.len() != output.len()
        || input
            .iter()
            .zip(output)
            .take(input.len().saturating_sub(1))
            .any(|(a, b)| a != b)
}

/// Reshape to a target shape where `0` copies the input dim and one `-1` is inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reshape {
    target: Vec<i64>,
    resolved: Vec<usize>,
}

impl Reshape {
    pub fn new(target: Vec<i64>) -> Self {
        Reshape {
            target,
            resolved: Vec::new(),
        }
    }

    fn resolve(&self, input: &[usize]) -> Result<Vec<usize>> {
        let mut inferred = None;
        let mut out = Vec::with_capacity(self.target.len());
        for (idx, &dim) in self.target.iter().enumerate() {
            match dim {
                -1 => {
                    ensure!(inferred.is_none(), "at most one -1 is allowed");
                    inferred = Some(idx);
                    out.push(1);
                }
                0 => {
                    ensure!(
                        idx < input.len(),
                        "0 at position {} has no matching input dim",
                        idx
                    );
                    out.push(input[idx]);
                }
                d if d > 0 => out.push(d as usize),
                d => bail!("invalid target dim {}", d),
            }
        }
        let size: usize = input.iter().product();
        if let Some(idx) = inferred {
            let known: usize = out.iter().product();
            ensure!(
                known > 0 && size % known == 0,
                "cannot infer -1 for {} elements into {:?}",
                size,
                self.target
            );
            out[idx] = size / known;
        }
        let out_size: usize = out.iter().product();
        ensure!(
            out_size == size,
            "target {:?} holds {} elements, input has {}",
            self.target,
            out_size,
            size
        );
        Ok(out)
    }
}

impl OpSemantics for Reshape {
    fn kind(&self) -> OpKind {
        OpKind::Reshape
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = self.resolve(inputs[0].dims())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![Shape::new(self.resolve(inputs[0].dims())?)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Relayout::new(reshape_copies(io.in_dims(0), io.out_dims(0)), 8e9).compute_time(io)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        Relayout::new(reshape_copies(io.in_dims(0), io.out_dims(0)), 8e9).memory_cost(io, cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Relayout::new(reshape_copies(io.in_dims(0), io.out_dims(0)), 8e9).parallelism(io)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Reshape);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Reshape);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "dims", &self.resolved)
    }
}

/// Collapses the input into `[prod(dims[..axis]), prod(dims[axis..])]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flatten {
    axis: isize,
    resolved: usize,
}

impl Flatten {
    pub fn new(axis: isize) -> Self {
        Flatten { axis, resolved: 1 }
    }

    fn resolve(&self, rank: usize) -> Result<usize> {
        let rank_i = rank as isize;
        let axis = if self.axis < 0 {
            self.axis + rank_i
        } else {
            self.axis
        };
        ensure!(
            (0..=rank_i).contains(&axis),
            "axis {} out of range for rank {}",
            self.axis,
            rank
        );
        Ok(axis as usize)
    }

    fn relayout(&self) -> Relayout {
        Relayout::new(self.resolved > 1, 8e9)
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new(1)
    }
}

impl OpSemantics for Flatten {
    fn kind(&self) -> OpKind {
        OpKind::Flatten
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = self.resolve(inputs[0].rank())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        let axis = self.resolve(dims.len())?;
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis..].iter().product();
        Ok(vec![Shape::new(vec![outer, inner])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.relayout().compute_time(io)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        self.relayout().memory_cost(io, cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.relayout().parallelism(io)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Flatten);
        key.push(self.resolved as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "axis={},", self.resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Identity;

impl OpSemantics for Identity {
    fn kind(&self) -> OpKind {
        OpKind::Identity
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        io.in_size(0) / 10e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.in_size(0) / 64.0, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Identity);
        push_dims(&mut key, io.in_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Identity)
    }
}

/// Removes unit axes. An empty axis list removes every unit axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Squeeze {
    axes: Vec<isize>,
    resolved: Vec<usize>,
    rank: usize,
}

impl Squeeze {
    pub fn new(axes: Vec<isize>) -> Self {
        Squeeze {
            axes,
            resolved: Vec::new(),
            rank: 0,
        }
    }

    fn resolve(&self, dims: &[usize]) -> Result<Vec<usize>> {
        if self.axes.is_empty() {
            return Ok(dims
                .iter()
                .enumerate()
                .filter(|(_, &d)| d == 1)
                .map(|(axis, _)| axis)
                .collect());
        }
        let axes = normalize_axes(&self.axes, dims.len())?;
        for &axis in &axes {
            ensure!(
                dims[axis] == 1,
                "cannot squeeze axis {} of extent {}",
                axis,
                dims[axis]
            );
        }
        Ok(axes)
    }

    fn relayout(&self) -> Relayout {
        let inner = self
            .resolved
            .iter()
            .any(|&a| a > 0 && a + 1 < self.rank);
        Relayout::new(inner, 10e9)
    }
}

impl OpSemantics for Squeeze {
    fn kind(&self) -> OpKind {
        OpKind::Squeeze
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = self.resolve(inputs[0].dims())?;
        self.rank = inputs[0].rank();
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        let axes = self.resolve(dims)?;
        let out = dims
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &d)| d)
            .collect::<Vec<_>>();
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.relayout().compute_time(io)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        self.relayout().memory_cost(io, cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.relayout().parallelism(io)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Squeeze);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, &self.resolved);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Squeeze);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "axes", &self.resolved)
    }
}

/// Inserts unit axes; `axes` index into the output rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsqueeze {
    axes: Vec<isize>,
    resolved: Vec<usize>,
    out_rank: usize,
}

impl Unsqueeze {
    pub fn new(axes: Vec<isize>) -> Self {
        Unsqueeze {
            axes,
            resolved: Vec::new(),
            out_rank: 0,
        }
    }

    fn relayout(&self) -> Relayout {
        let inner = self
            .resolved
            .iter()
            .any(|&a| a > 0 && a + 1 < self.out_rank);
        Relayout::new(inner, 10e9)
    }
}

impl OpSemantics for Unsqueeze {
    fn kind(&self) -> OpKind {
        OpKind::Unsqueeze
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.out_rank = inputs[0].rank() + self.axes.len();
        self.resolved = normalize_axes(&self.axes, self.out_rank)?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        let out_rank = dims.len() + self.axes.len();
        let axes = normalize_axes(&self.axes, out_rank)?;
        let mut source = dims.iter();
        let out = (0..out_rank)
            .map(|axis| {
                if axes.contains(&axis) {
                    1
                } else {
                    source.next().copied().unwrap_or(1)
                }
            })
            .collect::<Vec<_>>();
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.relayout().compute_time(io)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        self.relayout().memory_cost(io, cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        self.relayout().parallelism(io)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Unsqueeze);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, &self.resolved);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Unsqueeze);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "axes", &self.resolved)
    }
}

/// Broadcasts the input to `shape` (numpy rules, both sides may stretch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expand {
    pub shape: Vec<usize>,
}

impl Expand {
    pub fn new(shape: Vec<usize>) -> Self {
        Expand { shape }
    }
}

impl OpSemantics for Expand {
    fn kind(&self) -> OpKind {
        OpKind::Expand
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![Shape::new(broadcast_shapes(
            inputs[0].dims(),
            &self.shape,
        )?)])
    }

    /// One write plus index mapping per output element, one read per input element.
    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        (io.out_size(0) * 1.2 + io.in_size(0) * 0.2) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        capped(io.out_size(0) * 0.95, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Expand);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, &self.shape);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Expand);
        push_dims(&mut key, &self.shape);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "shape", &self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, ResidentHost, TensorId};

    fn input(dims: &[usize]) -> Tensor {
        Tensor::new(TensorId(0), 1, Shape::new(dims.to_vec()), DType::Float32)
    }

    fn shape_of(op: &mut dyn OpSemantics, dims: &[usize]) -> Result<Vec<usize>> {
        let x = input(dims);
        op.prepare(&[&x], &ResidentHost)?;
        Ok(op.infer_shapes(&[&x])?[0].dims().to_vec())
    }

    #[test]
    fn reshape_copies_zero_and_infers_minus_one() {
        let mut op = Reshape::new(vec![0, -1]);
        assert_eq!(shape_of(&mut op, &[2, 3, 4]).expect("reshape"), vec![2, 12]);
    }

    #[test]
    fn reshape_rejects_size_mismatch_and_double_inference() {
        shape_of(&mut Reshape::new(vec![5, 5]), &[2, 3]).expect_err("6 != 25");
        shape_of(&mut Reshape::new(vec![-1, -1]), &[2, 3]).expect_err("two -1");
    }

    #[test]
    fn reshape_keeping_leading_dims_is_a_view() {
        assert!(!reshape_copies(&[2, 3, 4], &[2, 3, 4]));
        assert!(reshape_copies(&[2, 3, 4], &[6, 4]));
    }

    #[test]
    fn squeeze_without_axes_drops_all_unit_dims() {
        let mut op = Squeeze::default();
        assert_eq!(shape_of(&mut op, &[1, 3, 1, 4]).expect("squeeze"), vec![3, 4]);
        shape_of(&mut Squeeze::new(vec![1]), &[1, 3]).expect_err("extent 3");
    }

    #[test]
    fn unsqueeze_places_axes_in_output_rank() {
        let mut op = Unsqueeze::new(vec![0, -1]);
        assert_eq!(shape_of(&mut op, &[3, 4]).expect("unsqueeze"), vec![1, 3, 4, 1]);
        shape_of(&mut Unsqueeze::new(vec![1, 1]), &[3]).expect_err("duplicate axes");
    }

    #[test]
    fn flatten_accepts_axis_equal_to_rank() {
        let mut op = Flatten::new(3);
        assert_eq!(shape_of(&mut op, &[2, 3, 4]).expect("flatten"), vec![24, 1]);
    }
}
