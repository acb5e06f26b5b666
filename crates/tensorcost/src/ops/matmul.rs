use std::fmt;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use super::cost::{capped, log2, CostContext, OpIo};
use super::key::{key_with_kind, KeyVector};
use super::{ActType, Arity, OpKind, OpSemantics};
use crate::tensor::shape::{broadcast_shapes, is_unidirectional_broadcast, product};
use crate::tensor::{DType, Shape, Tensor};

/// Arithmetic precision the product is accumulated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputePrecision {
    Half,
    #[default]
    Single,
    Double,
}

impl ComputePrecision {
    fn throughput_factor(self) -> f64 {
        match self {
            ComputePrecision::Half => 0.5,
            ComputePrecision::Single => 1.0,
            ComputePrecision::Double => 2.0,
        }
    }

    fn tag(self) -> i64 {
        match self {
            ComputePrecision::Half => 0,
            ComputePrecision::Single => 1,
            ComputePrecision::Double => 2,
        }
    }
}

/// Batched matrix product `C = op(A) @ op(B) (+ bias)`, inputs `(A, B[, bias])`.
///
/// Leading dimensions broadcast; the two trailing dimensions are the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatMul {
    pub trans_a: bool,
    pub trans_b: bool,
    pub act: ActType,
    pub precision: ComputePrecision,
}

/// Problem size of a batched matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bmnk {
    b: usize,
    m: usize,
    n: usize,
    k: usize,
}

impl MatMul {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transposed(mut self, trans_a: bool, trans_b: bool) -> Self {
        self.trans_a = trans_a;
        self.trans_b = trans_b;
        self
    }

    pub fn with_act(mut self, act: ActType) -> Self {
        self.act = act;
        self
    }

    pub fn with_precision(mut self, precision: ComputePrecision) -> Self {
        self.precision = precision;
        self
    }

    fn problem(&self, a: &[usize], b: &[usize]) -> Result<(Vec<usize>, Bmnk)> {
        ensure!(
            a.len() >= 2 && b.len() >= 2,
            "operands must have rank >= 2, got {:?} and {:?}",
            a,
            b
        );
        let (ra, rb) = (a.len(), b.len());
        let batch = broadcast_shapes(&a[..ra - 2], &b[..rb - 2])?;
        let (m, k_a) = if self.trans_a {
            (a[ra - 1], a[ra - 2])
        } else {
            (a[ra - 2], a[ra - 1])
        };
        let (k_b, n) = if self.trans_b {
            (b[rb - 1], b[rb - 2])
        } else {
            (b[rb - 2], b[rb - 1])
        };
        ensure!(
            k_a == k_b,
            "contraction dims differ: {} (A {:?}) vs {} (B {:?})",
            k_a,
            a,
            k_b,
            b
        );
        let b_size = batch.iter().product::<usize>().max(1);
        Ok((
            batch,
            Bmnk {
                b: b_size,
                m,
                n,
                k: k_a,
            },
        ))
    }

    fn bmnk(&self, io: &OpIo<'_>) -> Bmnk {
        match self.problem(io.in_dims(0), io.in_dims(1)) {
            Ok((_, bmnk)) => bmnk,
            Err(_) => Bmnk {
                b: 1,
                m: 0,
                n: 0,
                k: 0,
            },
        }
    }

    fn any_trans(&self) -> bool {
        self.trans_a || self.trans_b
    }
}

impl OpSemantics for MatMul {
    fn kind(&self) -> OpKind {
        OpKind::MatMul
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let (mut out, bmnk) = self.problem(inputs[0].dims(), inputs[1].dims())?;
        out.push(bmnk.m);
        out.push(bmnk.n);
        if let Some(bias) = inputs.get(2) {
            ensure!(
                is_unidirectional_broadcast(&out, bias.dims()),
                "bias {} does not broadcast into output {:?}",
                bias.shape(),
                out
            );
        }
        Ok(vec![Shape::new(out)])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        ensure!(
            inputs[0].dtype() == inputs[1].dtype(),
            "operand dtypes differ: {} vs {}",
            inputs[0].dtype(),
            inputs[1].dtype()
        );
        Ok(vec![inputs[0].dtype()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let Bmnk { b, m, n, k } = self.bmnk(io);
        let bmn = b as f64 * m as f64 * n as f64;
        let mut ops = 2.0 * bmn * k as f64;
        if self.any_trans() {
            ops *= 1.05;
        }
        if self.act.is_some() {
            ops += 0.1 * bmn;
        }
        if io.inputs().len() > 2 {
            ops += bmn;
        }
        ops / self.precision.throughput_factor() / 5e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let mut cache = 0.2;
        if self.any_trans() {
            cache *= 1.5;
        }
        let operands = cx.traffic(io.input(0)) + cx.traffic(io.input(1));
        let bias = io.inputs().get(2).map(|t| cx.traffic(t)).unwrap_or(0.0);
        operands * cache + bias + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let Bmnk { b, m, n, k } = self.bmnk(io);
        let inner = (k as f64).sqrt().min(8.0);
        let trans = match (self.trans_a, self.trans_b) {
            (true, true) => 0.9,
            (true, false) | (false, true) => 0.95,
            (false, false) => 1.0,
        };
        capped(b as f64 * m as f64 * n as f64 * inner * trans, 4096.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let Bmnk { b, m, n, k } = self.bmnk(io);
        let mut key = key_with_kind(OpKind::MatMul);
        key.extend([b as i64, m as i64, n as i64, k as i64]);
        key.extend(self.attr_vector().into_iter().skip(1));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::MatMul);
        key.extend([
            self.trans_a as i64,
            self.trans_b as i64,
            self.act.tag(),
            self.precision.tag(),
        ]);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            f,
            "transA={},transB={},act={:?},precision={:?},",
            self.trans_a, self.trans_b, self.act, self.precision
        )
    }
}

fn dilation_log(dilation: usize) -> f64 {
    if dilation > 1 {
        log2(dilation as f64)
    } else {
        0.0
    }
}

fn batched_dims(what: &str, dims: &[usize]) -> Result<[usize; 3]> {
    match *dims {
        [b, m, x] => Ok([b, m, x]),
        _ => bail!("{what} must be rank 3 [b, m, _], got {:?}", dims),
    }
}

/// Banded batched matmul: `A [b, m, 2w+1]` holds a band of width `w` around the
/// diagonal, multiplied with `B [b, m, n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gbmm {
    pub dilation: usize,
    pub act: ActType,
}

impl Default for Gbmm {
    fn default() -> Self {
        Gbmm {
            dilation: 1,
            act: ActType::None,
        }
    }
}

impl OpSemantics for Gbmm {
    fn kind(&self) -> OpKind {
        OpKind::Gbmm
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(self.dilation > 0, "dilation must be >= 1");
        let [b, m, band] = batched_dims("A", inputs[0].dims())?;
        let [b2, m2, n] = batched_dims("B", inputs[1].dims())?;
        ensure!(band % 2 == 1, "band width {band} must be odd (2w+1)");
        ensure!(
            b == b2 && m == m2,
            "A {} and B {} disagree on [b, m]",
            inputs[0].shape(),
            inputs[1].shape()
        );
        Ok(vec![Shape::new(vec![b, m, n])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let a = io.in_dims(0);
        let out = io.out_dims(0);
        let bmn = product(out);
        let mut ops = bmn * a[2] as f64 * (1.0 + dilation_log(self.dilation) * 0.15);
        if self.act.is_some() {
            ops += 0.1 * bmn;
        }
        ops / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let factor = if self.dilation > 1 {
            1.0 + 0.05 * self.dilation as f64
        } else {
            1.0
        };
        io.in_traffic(cx) * factor + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let out = io.out_dims(0);
        let efficiency = (1.0 - dilation_log(self.dilation) * 0.05).max(0.1);
        capped(
            out[0] as f64 * out[1] as f64 * (out[2] as f64).min(16.0) * efficiency,
            2048.0,
        )
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Gbmm);
        let a = io.in_dims(0);
        let out = io.out_dims(0);
        key.extend([out[0] as i64, out[1] as i64, out[2] as i64, a[2] as i64]);
        key.extend([self.dilation as i64, self.act.tag()]);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Gbmm);
        key.extend([self.dilation as i64, self.act.tag()]);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "dilation={},act={:?},", self.dilation, self.act)
    }
}

/// Banded product of two `[b, m, k]` operands, producing `[b, m, 2·width+1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct G2bmm {
    pub width: usize,
    pub dilation: usize,
    pub act: ActType,
}

impl G2bmm {
    pub fn new(width: usize) -> Self {
        G2bmm {
            width,
            dilation: 1,
            act: ActType::None,
        }
    }

    fn band(&self) -> usize {
        2 * self.width + 1
    }
}

impl OpSemantics for G2bmm {
    fn kind(&self) -> OpKind {
        OpKind::G2bmm
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(self.dilation > 0, "dilation must be >= 1");
        let [b, m, _] = batched_dims("A", inputs[0].dims())?;
        batched_dims("B", inputs[1].dims())?;
        ensure!(
            inputs[0].dims() == inputs[1].dims(),
            "A {} and B {} must have equal shapes",
            inputs[0].shape(),
            inputs[1].shape()
        );
        Ok(vec![Shape::new(vec![b, m, self.band()])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let a = io.in_dims(0);
        let bmw = a[0] as f64 * a[1] as f64 * self.band() as f64;
        let mut ops = bmw * a[2] as f64 * (1.0 + 0.1 * (self.dilation as f64 + 1.0).log2());
        if self.act.is_some() {
            ops += 0.1 * bmw;
        }
        ops / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) * (1.0 + 0.05 * self.dilation as f64) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let a = io.in_dims(0);
        capped(
            a[0] as f64 * a[1] as f64 * (self.band() as f64).min(8.0),
            2048.0,
        )
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::G2bmm);
        let a = io.in_dims(0);
        key.extend([a[0] as i64, a[1] as i64, a[2] as i64]);
        key.extend(self.attr_vector().into_iter().skip(1));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::G2bmm);
        key.extend([self.width as i64, self.dilation as i64, self.act.tag()]);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            f,
            "width={},dilation={},act={:?},",
            self.width, self.dilation, self.act
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposed_operands_swap_contraction_axes() {
        let mm = MatMul::new().transposed(true, false);
        let (batch, bmnk) = mm.problem(&[2, 128, 64], &[128, 32]).expect("problem");
        assert_eq!(batch, vec![2]);
        assert_eq!(
            bmnk,
            Bmnk {
                b: 2,
                m: 64,
                n: 32,
                k: 128
            }
        );
    }

    #[test]
    fn mismatched_contraction_is_rejected() {
        let err = MatMul::new()
            .problem(&[4, 8], &[9, 4])
            .expect_err("k mismatch");
        assert!(err.to_string().contains("contraction"));
    }
}
