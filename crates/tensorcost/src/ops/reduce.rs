use std::fmt;

use anyhow::{ensure, Result};

use super::cost::{capped, log2, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::shape::normalize_axes;
use crate::tensor::{HostContext, Shape, Tensor};

/// ReduceSum / ReduceMean / ReduceMax / ReduceMin / ReduceProd over a set of axes.
///
/// `axes = None` reduces every axis. Axes are resolved against the input rank in
/// `prepare`; dropping every axis without `keep_dims` yields shape `[1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduce {
    kind: OpKind,
    axes: Option<Vec<isize>>,
    keep_dims: bool,
    resolved: Vec<usize>,
}

impl Reduce {
    pub fn new(kind: OpKind, axes: Option<Vec<isize>>, keep_dims: bool) -> Self {
        Reduce {
            kind,
            axes,
            keep_dims,
            resolved: Vec::new(),
        }
    }

    pub fn sum(axes: Option<Vec<isize>>, keep_dims: bool) -> Self {
        Self::new(OpKind::ReduceSum, axes, keep_dims)
    }

    pub fn mean(axes: Option<Vec<isize>>, keep_dims: bool) -> Self {
        Self::new(OpKind::ReduceMean, axes, keep_dims)
    }

    pub fn max(axes: Option<Vec<isize>>, keep_dims: bool) -> Self {
        Self::new(OpKind::ReduceMax, axes, keep_dims)
    }

    pub fn min(axes: Option<Vec<isize>>, keep_dims: bool) -> Self {
        Self::new(OpKind::ReduceMin, axes, keep_dims)
    }

    pub fn prod(axes: Option<Vec<isize>>, keep_dims: bool) -> Self {
        Self::new(OpKind::ReduceProd, axes, keep_dims)
    }

    /// Resolved, sorted reduction axes. Empty before the operator joins a graph.
    pub fn axes(&self) -> &[usize] {
        &self.resolved
    }

    pub fn keep_dims(&self) -> bool {
        self.keep_dims
    }

    fn is_reduced(&self, axis: usize) -> bool {
        self.resolved.binary_search(&axis).is_ok()
    }

    fn has_outer_reduction(&self, rank: usize) -> bool {
        self.resolved.iter().any(|&a| a < rank / 2)
    }

    /// `(reduced, kept)` element counts of `dims`.
    fn split_sizes(&self, dims: &[usize]) -> (f64, f64) {
        let mut reduced = 1.0;
        let mut kept = 1.0;
        for (axis, &d) in dims.iter().enumerate() {
            if self.is_reduced(axis) {
                reduced *= d as f64;
            } else {
                kept *= d as f64;
            }
        }
        (reduced, kept)
    }
}

impl OpSemantics for Reduce {
    fn kind(&self) -> OpKind {
        self.kind
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        ensure!(
            matches!(
                self.kind,
                OpKind::ReduceSum
                    | OpKind::ReduceMean
                    | OpKind::ReduceMax
                    | OpKind::ReduceMin
                    | OpKind::ReduceProd
            ),
            "{} is not a reduction",
            self.kind
        );
        let rank = inputs[0].rank();
        self.resolved = match &self.axes {
            Some(axes) => normalize_axes(axes, rank)?,
            None => (0..rank).collect(),
        };
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        let out: Vec<usize> = if self.keep_dims {
            dims.iter()
                .enumerate()
                .map(|(axis, &d)| if self.is_reduced(axis) { 1 } else { d })
                .collect()
        } else {
            let kept: Vec<usize> = dims
                .iter()
                .enumerate()
                .filter(|(axis, _)| !self.is_reduced(*axis))
                .map(|(_, &d)| d)
                .collect();
            if kept.is_empty() {
                vec![1]
            } else {
                kept
            }
        };
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let (reduced, kept) = self.split_sizes(dims);
        let out = kept.max(1.0);
        let per_reduction = match self.kind {
            OpKind::ReduceMean if reduced > 0.0 => 1.0 + 1.0 / reduced,
            _ => 1.0,
        };
        let axis_factor = if self.has_outer_reduction(dims.len()) {
            1.5
        } else {
            1.0
        };
        out * reduced * per_reduction * axis_factor / 1.5e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let input = io.in_traffic(cx);
        let naxes = self.resolved.len() as f64;
        let access = if self.has_outer_reduction(io.in_dims(0).len()) {
            1.0 + 0.2 * naxes
        } else {
            1.0 + 0.05 * naxes
        };
        let scattered = self.resolved.windows(2).any(|w| w[1] != w[0] + 1);
        let scratch = if scattered { input * 0.1 } else { 0.0 };
        input * access + io.out_traffic(cx) + scratch
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (reduced, kept) = self.split_sizes(io.in_dims(0));
        let inner = if reduced > 1.0 {
            log2(reduced).min(8.0)
        } else {
            1.0
        };
        capped(kept * inner, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(self.kind);
        push_dims(&mut key, io.in_dims(0));
        key.push(self.keep_dims as i64);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(self.kind);
        key.push(self.keep_dims as i64);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "axes", &self.resolved)?;
        write!(f, "keepDims={},", self.keep_dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, ResidentHost, TensorId};

    fn input(dims: &[usize]) -> Tensor {
        Tensor::new(TensorId(0), 1, Shape::new(dims.to_vec()), DType::Float32)
    }

    fn infer(mut op: Reduce, dims: &[usize]) -> Vec<usize> {
        let x = input(dims);
        op.prepare(&[&x], &ResidentHost).expect("prepare");
        op.infer_shapes(&[&x]).expect("shape")[0].dims().to_vec()
    }

    #[test]
    fn dropping_every_axis_leaves_unit_shape() {
        assert_eq!(infer(Reduce::sum(None, false), &[2, 3, 4]), vec![1]);
        assert_eq!(infer(Reduce::sum(None, true), &[2, 3, 4]), vec![1, 1, 1]);
    }

    #[test]
    fn negative_axes_resolve_against_rank() {
        assert_eq!(
            infer(Reduce::mean(Some(vec![-1]), false), &[2, 3, 4]),
            vec![2, 3]
        );
        assert_eq!(
            infer(Reduce::max(Some(vec![0, -1]), true), &[2, 3, 4]),
            vec![1, 3, 1]
        );
    }

    #[test]
    fn out_of_range_axis_is_rejected() {
        let x = input(&[2, 3]);
        let mut op = Reduce::sum(Some(vec![2]), false);
        op.prepare(&[&x], &ResidentHost).expect_err("axis 2 on rank 2");
    }
}
