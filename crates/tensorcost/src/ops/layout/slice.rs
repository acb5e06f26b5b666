use std::fmt;

use anyhow::{ensure, Result};

use crate::ops::cost::{capped, CostContext, OpIo};
use crate::ops::key::{key_with_kind, push_dims, KeyVector};
use crate::ops::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::shape::normalize_axes;
use crate::tensor::{HostContext, Shape, Tensor};

/// Resolved `[start, end)` range with a non-zero step for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SliceRange {
    start: i64,
    end: i64,
    step: i64,
}

impl SliceRange {
    fn full(len: usize) -> Self {
        SliceRange {
            start: 0,
            end: len as i64,
            step: 1,
        }
    }

    fn extent(&self) -> usize {
        let span = if self.step > 0 {
            self.end - self.start
        } else {
            self.start - self.end
        };
        let step = self.step.abs();
        ((span + step - 1) / step).max(0) as usize
    }
}

/// Strided slice. `axes` defaults to the leading axes, `steps` to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    starts: Vec<i64>,
    ends: Vec<i64>,
    axes: Option<Vec<isize>>,
    steps: Option<Vec<i64>>,
    ranges: Vec<SliceRange>,
}

impl Slice {
    pub fn new(starts: Vec<i64>, ends: Vec<i64>) -> Self {
        Slice {
            starts,
            ends,
            axes: None,
            steps: None,
            ranges: Vec::new(),
        }
    }

    pub fn with_axes(mut self, axes: Vec<isize>) -> Self {
        self.axes = Some(axes);
        self
    }

    pub fn with_steps(mut self, steps: Vec<i64>) -> Self {
        self.steps = Some(steps);
        self
    }

    fn resolve(&self, dims: &[usize]) -> Result<Vec<SliceRange>> {
        let count = self.starts.len();
        ensure!(
            self.ends.len() == count,
            "{} starts but {} ends",
            count,
            self.ends.len()
        );
        let axes = match &self.axes {
            Some(axes) => {
                ensure!(axes.len() == count, "{} axes for {} ranges", axes.len(), count);
                // validates range and duplicates
                normalize_axes(axes, dims.len())?;
                axes.iter()
                    .map(|&a| {
                        if a < 0 {
                            (a + dims.len() as isize) as usize
                        } else {
                            a as usize
                        }
                    })
                    .collect::<Vec<_>>()
            }
            None => {
                ensure!(
                    count <= dims.len(),
                    "{} ranges for rank {}",
                    count,
                    dims.len()
                );
                (0..count).collect()
            }
        };
        let steps = match &self.steps {
            Some(steps) => {
                ensure!(steps.len() == count, "{} steps for {} ranges", steps.len(), count);
                ensure!(steps.iter().all(|&s| s != 0), "steps must be non-zero");
                steps.clone()
            }
            None => vec![1; count],
        };
        let mut ranges: Vec<SliceRange> = dims.iter().map(|&d| SliceRange::full(d)).collect();
        for (idx, &axis) in axes.iter().enumerate() {
            let len = dims[axis] as i64;
            let clamp = |value: i64| {
                let value = if value < 0 { value + len } else { value };
                if steps[idx] > 0 {
                    value.clamp(0, len)
                } else {
                    value.clamp(-1, len - 1)
                }
            };
            ranges[axis] = SliceRange {
                start: clamp(self.starts[idx]),
                end: clamp(self.ends[idx]),
                step: steps[idx],
            };
        }
        Ok(ranges)
    }

    fn strided(&self) -> impl Iterator<Item = (usize, &SliceRange)> + '_ {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, range)| range.step.abs() != 1)
    }
}

impl OpSemantics for Slice {
    fn kind(&self) -> OpKind {
        OpKind::Slice
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.ranges = self.resolve(inputs[0].dims())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let ranges = self.resolve(inputs[0].dims())?;
        Ok(vec![Shape::new(
            ranges.iter().map(SliceRange::extent).collect::<Vec<_>>(),
        )])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let half = self.ranges.len() / 2;
        let strided = self.strided().count() as f64;
        let inner = self.strided().filter(|(axis, _)| *axis >= half).count() as f64;
        let discontinuity = 1.0 + 0.15 * strided + 0.25 * inner;
        io.out_size(0) * 2.0 * discontinuity / 5e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let half = self.ranges.len() / 2;
        let access = 1.0
            + self
                .strided()
                .map(|(axis, _)| if axis >= half { 0.4 } else { 0.2 })
                .sum::<f64>();
        let out = io.out_traffic(cx);
        out * access + out
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let efficiency: f64 = self
            .ranges
            .iter()
            .filter(|range| range.step.abs() > 1)
            .map(|range| 1.0 - 0.05 * (range.step.abs() - 1).min(5) as f64)
            .product();
        capped(io.out_size(0) * efficiency, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Slice);
        for range in &self.ranges {
            key.extend([range.start, range.end, range.step]);
        }
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        f.write_str("ranges=[")?;
        for range in &self.ranges {
            write!(f, "{}:{}:{},", range.start, range.end, range.step)?;
        }
        f.write_str("],")
    }
}

/// Zero padding. `pads` is `[begin..., end...]` over `axes` (all axes when absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pad {
    pads: Vec<i64>,
    axes: Option<Vec<isize>>,
    resolved: Vec<usize>,
}

impl Pad {
    pub fn new(pads: Vec<i64>) -> Self {
        Pad {
            pads,
            axes: None,
            resolved: Vec::new(),
        }
    }

    pub fn with_axes(mut self, axes: Vec<isize>) -> Self {
        self.axes = Some(axes);
        self
    }

    /// Per-axis `[begin..., end...]` pads over the full input rank.
    pub fn pads(&self) -> &[usize] {
        &self.resolved
    }

    fn resolve(&self, rank: usize) -> Result<Vec<usize>> {
        ensure!(
            self.pads.iter().all(|&p| p >= 0),
            "pads must be non-negative, got {:?}",
            self.pads
        );
        let pads: Vec<usize> = self.pads.iter().map(|&p| p as usize).collect();
        match &self.axes {
            None => {
                ensure!(
                    pads.len() == 2 * rank,
                    "expected {} pads for rank {}, got {}",
                    2 * rank,
                    rank,
                    pads.len()
                );
                Ok(pads)
            }
            Some(axes) => {
                let count = axes.len();
                ensure!(
                    pads.len() == 2 * count,
                    "expected {} pads for {} axes, got {}",
                    2 * count,
                    count,
                    pads.len()
                );
                // validates range and duplicates
                normalize_axes(axes, rank)?;
                let mut out = vec![0; 2 * rank];
                for (idx, &axis) in axes.iter().enumerate() {
                    let axis = if axis < 0 {
                        (axis + rank as isize) as usize
                    } else {
                        axis as usize
                    };
                    out[axis] = pads[idx];
                    out[axis + rank] = pads[idx + count];
                }
                Ok(out)
            }
        }
    }

    fn axis_pad(&self, axis: usize) -> usize {
        let rank = self.resolved.len() / 2;
        self.resolved[axis] + self.resolved[axis + rank]
    }
}

impl OpSemantics for Pad {
    fn kind(&self) -> OpKind {
        OpKind::Pad
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
        let rank = dims.len();
        let pads = self.resolve(rank)?;
        let out = dims
            .iter()
            .enumerate()
            .map(|(axis, &d)| d + pads[axis] + pads[axis + rank])
            .collect::<Vec<_>>();
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let input = io.in_size(0);
        let out = io.out_size(0);
        (2.0 * input + (out - input) + 0.1 * out) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let rank = self.resolved.len() / 2;
        let inner = (rank / 2..rank).any(|axis| self.axis_pad(axis) > 0);
        let access = if inner { 1.2 } else { 1.0 };
        (io.in_traffic(cx) + io.out_traffic(cx)) * access
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let rank = self.resolved.len() / 2;
        let total: usize = (0..rank).map(|axis| self.axis_pad(axis)).sum();
        let outer: usize = (0..rank / 2).map(|axis| self.axis_pad(axis)).sum();
        let outer_ratio = if total > 0 {
            outer as f64 / total as f64
        } else {
            0.5
        };
        capped(io.out_size(0) * (0.8 + outer_ratio * 0.2), 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Pad);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, &self.resolved);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Pad);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "pads", &self.resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, TensorId};

    fn tensor(dims: &[usize]) -> Tensor {
        Tensor::new(TensorId(0), 1, Shape::new(dims.to_vec()), DType::Float32)
    }

    #[test]
    fn slice_clamps_and_wraps_bounds() {
        let x = tensor(&[10, 8]);
        let op = Slice::new(vec![-3, 0], vec![100, 8]).with_steps(vec![1, 3]);
        let out = op.infer_shapes(&[&x]).expect("slice");
        assert_eq!(out[0].dims(), &[3, 3]);
    }

    #[test]
    fn slice_rejects_zero_step() {
        let x = tensor(&[4]);
        Slice::new(vec![0], vec![4])
            .with_steps(vec![0])
            .infer_shapes(&[&x])
            .expect_err("zero step");
    }

    #[test]
    fn slice_with_negative_step_walks_backwards() {
        let x = tensor(&[6]);
        let op = Slice::new(vec![5], vec![-7]).with_steps(vec![-2]);
        assert_eq!(op.infer_shapes(&[&x]).expect("slice")[0].dims(), &[3]);
    }

    #[test]
    fn pad_over_selected_axes() {
        let x = tensor(&[2, 3, 4]);
        let op = Pad::new(vec![1, 2, 3, 4]).with_axes(vec![0, -1]);
        assert_eq!(op.infer_shapes(&[&x]).expect("pad")[0].dims(), &[6, 3, 10]);
        Pad::new(vec![-1, 0])
            .infer_shapes(&[&tensor(&[3])])
            .expect_err("negative pad");
    }
}
