use std::fmt;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::ops::cost::{capped, log2, CostContext, OpIo, NEGLIGIBLE_TIME};
use crate::ops::key::{key_with_kind, push_dims, KeyVector};
use crate::ops::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::{HostContext, Shape, Tensor};

/// Axis permutation. An empty permutation is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transpose {
    perm: Vec<usize>,
    resolved: Vec<usize>,
}

impl Transpose {
    pub fn new(perm: Vec<usize>) -> Self {
        Transpose {
            perm,
            resolved: Vec::new(),
        }
    }

    pub fn permutation(&self) -> &[usize] {
        &self.resolved
    }

    fn resolve(&self, rank: usize) -> Result<Vec<usize>> {
        if self.perm.is_empty() {
            return Ok((0..rank).collect());
        }
        ensure!(
            self.perm.len() == rank,
            "permutation {:?} does not match rank {}",
            self.perm,
            rank
        );
        let mut seen = vec![false; rank];
        for &axis in &self.perm {
            ensure!(
                axis < rank && !seen[axis],
                "{:?} is not a permutation of 0..{}",
                self.perm,
                rank
            );
            seen[axis] = true;
        }
        Ok(self.perm.clone())
    }

    fn is_identity(&self) -> bool {
        self.resolved.iter().enumerate().all(|(i, &p)| i == p)
    }

    /// Distances of axes moved by more than one position.
    fn far_moves(&self) -> impl Iterator<Item = f64> + '_ {
        self.resolved
            .iter()
            .enumerate()
            .map(|(i, &p)| i.abs_diff(p))
            .filter(|&d| d > 1)
            .map(|d| d as f64)
    }

    /// Number of the two innermost output axes that are permuted.
    fn inner_moves(&self) -> usize {
        let rank = self.resolved.len();
        (rank.saturating_sub(2)..rank)
            .filter(|&i| self.resolved[i] != i)
            .count()
    }
}

impl OpSemantics for Transpose {
    fn kind(&self) -> OpKind {
        OpKind::Transpose
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
        let perm = self.resolve(dims.len())?;
        Ok(vec![Shape::new(
            perm.iter().map(|&axis| dims[axis]).collect::<Vec<_>>(),
        )])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        if self.is_identity() {
            return NEGLIGIBLE_TIME;
        }
        let far: Vec<f64> = self.far_moves().collect();
        let inner = self.inner_moves();
        let complexity = 1.0 + far.iter().map(|d| 0.2 * d).sum::<f64>() + 0.5 * inner as f64;
        let mut speed = 2e9;
        if !far.is_empty() {
            speed /= 2.0;
        }
        if inner > 0 {
            speed /= 1.5;
        }
        io.in_size(0) * complexity / speed
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        if self.is_identity() {
            return 0.0;
        }
        let access = 1.0
            + 0.5 * self.inner_moves() as f64
            + self.far_moves().map(|d| 0.1 * d).sum::<f64>();
        (io.in_traffic(cx) + io.out_traffic(cx)) * access
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        if self.is_identity() {
            return 1.0;
        }
        let rank = self.resolved.len();
        let adjacent = self
            .resolved
            .windows(2)
            .filter(|w| w[0].abs_diff(w[1]) == 1)
            .count();
        let efficiency = 0.7 - 0.05 * rank.saturating_sub(3) as f64 + 0.05 * adjacent as f64;
        capped(io.in_size(0).sqrt() * efficiency, 512.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Transpose);
        push_dims(&mut key, &self.resolved);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "perm", &self.resolved)
    }
}

/// Channel ordering used when unfolding depth into space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthToSpaceMode {
    /// depth-column-row
    #[default]
    Dcr,
    /// column-row-depth
    Crd,
}

impl DepthToSpaceMode {
    fn tag(self) -> i64 {
        match self {
            DepthToSpaceMode::Dcr => 0,
            DepthToSpaceMode::Crd => 1,
        }
    }
}

/// Rearranges `[n, c, h, w]` into `[n, c / b², h·b, w·b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthToSpace {
    pub block: usize,
    pub mode: DepthToSpaceMode,
}

impl DepthToSpace {
    pub fn new(block: usize, mode: DepthToSpaceMode) -> Self {
        DepthToSpace { block, mode }
    }

    fn block_factor(&self, weight: f64) -> f64 {
        1.0 + log2(self.block as f64) * weight
    }
}

impl OpSemantics for DepthToSpace {
    fn kind(&self) -> OpKind {
        OpKind::DepthToSpace
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        ensure!(dims.len() == 4, "input {} must be rank 4", inputs[0].shape());
        ensure!(self.block > 0, "block size must be > 0");
        let area = self.block * self.block;
        ensure!(
            dims[1] % area == 0,
            "channels {} are not divisible by block² = {}",
            dims[1],
            area
        );
        Ok(vec![Shape::new(vec![
            dims[0],
            dims[1] / area,
            dims[2] * self.block,
            dims[3] * self.block,
        ])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let size = io.in_size(0);
        let mut shuffle = size * self.block_factor(0.1);
        if self.mode == DepthToSpaceMode::Dcr {
            shuffle *= 1.2;
        }
        // two view reshapes around the shuffle
        (size * 0.02 + shuffle) / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let mut access = self.block_factor(0.1);
        if self.mode == DepthToSpaceMode::Dcr {
            access *= 1.1;
        }
        (2.0 * io.in_traffic(cx) + io.out_traffic(cx)) * access
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let mode = match self.mode {
            DepthToSpaceMode::Dcr => 1.0,
            DepthToSpaceMode::Crd => 1.1,
        };
        capped(
            io.in_size(0).sqrt() / self.block_factor(0.05) * mode,
            512.0,
        )
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::DepthToSpace);
        key.push(self.block as i64);
        key.push(self.mode.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "block={},mode={:?},", self.block, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, ResidentHost, TensorId};

    fn tensor(id: u32, dims: &[usize]) -> Tensor {
        Tensor::new(TensorId(id), u64::from(id), Shape::new(dims.to_vec()), DType::Float32)
    }

    #[test]
    fn identity_permutation_is_free() {
        let x = tensor(0, &[4, 8]);
        let mut op = Transpose::default();
        op.prepare(&[&x], &ResidentHost).expect("prepare");
        let out_shape = op.infer_shapes(&[&x]).expect("shape");
        let y = tensor(1, out_shape[0].dims());
        let io = OpIo::new(vec![&x], vec![&y]);
        let cx = CostContext::default();
        assert_eq!(op.compute_time(&io, &cx), NEGLIGIBLE_TIME);
        assert_eq!(op.memory_cost(&io, &cx), 0.0);
        assert_eq!(op.parallelism(&io, &cx), 1.0);
    }

    #[test]
    fn rejects_repeated_axes() {
        let x = tensor(0, &[2, 3, 4]);
        let mut op = Transpose::new(vec![0, 0, 2]);
        op.prepare(&[&x], &ResidentHost)
            .expect_err("0 appears twice");
    }

    #[test]
    fn depth_to_space_unfolds_channels() {
        let x = tensor(0, &[1, 8, 3, 3]);
        let op = DepthToSpace::new(2, DepthToSpaceMode::Crd);
        let out = op.infer_shapes(&[&x]).expect("shape");
        assert_eq!(out[0].dims(), &[1, 2, 6, 6]);
        let bad = tensor(1, &[1, 6, 3, 3]);
        op.infer_shapes(&[&bad]).expect_err("6 % 4 != 0");
    }
}
