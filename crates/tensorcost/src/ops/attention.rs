//! Decoder attention primitives.

use anyhow::{ensure, Result};

use super::cost::{capped, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{Arity, OpKind, OpSemantics};
use crate::tensor::shape::product;
use crate::tensor::{Shape, Tensor};

/// Heads and head width assumed when `q` is not laid out as `[b, heads, seq, dim]`.
const DEFAULT_HEADS: f64 = 16.0;
const DEFAULT_HEAD_DIM: f64 = 64.0;

/// Single decoding step of attention against a key/value cache.
///
/// Inputs are `(k_cache, v_cache, q, k, v, position_id)` with rank-4 caches; the new
/// key/value rows are appended along dim 2 and the output has the shape of `q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttentionKvCache;

impl AttentionKvCache {
    pub const CONCAT_DIM: usize = 2;

    /// `(batch, heads, cached_len, head_dim)`.
    fn problem(io: &OpIo<'_>) -> (f64, f64, f64, f64) {
        let q = io.in_dims(2);
        let cached = io.in_dims(0)[Self::CONCAT_DIM] as f64;
        let batch = q.first().copied().unwrap_or(1) as f64;
        let (heads, head_dim) = if q.len() >= 4 {
            (q[1] as f64, q[3] as f64)
        } else if q.len() >= 2 {
            (q[1] as f64, DEFAULT_HEAD_DIM)
        } else {
            (DEFAULT_HEADS, DEFAULT_HEAD_DIM)
        };
        (batch, heads, cached, head_dim)
    }
}

impl OpSemantics for AttentionKvCache {
    fn kind(&self) -> OpKind {
        OpKind::AttentionKvCache
    }

    fn arity(&self) -> Arity {
        Arity::exact(6, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let (k_cache, v_cache, q) = (inputs[0], inputs[1], inputs[2]);
        ensure!(
            k_cache.rank() == 4,
            "k_cache {} must be rank 4",
            k_cache.shape()
        );
        ensure!(
            k_cache.dims() == v_cache.dims(),
            "k_cache {} and v_cache {} differ",
            k_cache.shape(),
            v_cache.shape()
        );
        ensure!(q.rank() >= 1, "q must have rank >= 1");
        Ok(vec![q.shape().clone()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (batch, heads, cached, head_dim) = Self::problem(io);
        let scores = batch * heads * cached * (cached + 1.0);
        let qk = scores * head_dim;
        let softmax = scores * 3.0;
        let attn_v = scores * head_dim;
        let cache_update = 2.0 * batch * heads * head_dim;
        (qk + softmax + attn_v + cache_update) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let (batch, heads, cached, _) = Self::problem(io);
        let scores = cx.scaled(batch * heads * cached * (cached + 1.0), io.dtype());
        io.in_traffic(cx) + io.out_traffic(cx) + scores
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (batch, heads, _, _) = Self::problem(io);
        batch * heads * 0.9
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = self.attr_vector();
        key.push(io.inputs().len() as i64);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::AttentionKvCache);
        key.push(Self::CONCAT_DIM as i64);
        key
    }
}

/// Rotary position embedding. Inputs are `(position, x)`; the output has the shape of `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rope;

impl Rope {
    /// `(batch, seq_len, rotation_pairs)` of the embedded input.
    fn problem(io: &OpIo<'_>) -> (f64, f64, f64) {
        let dims = io.in_dims(1);
        let last = dims.last().copied().unwrap_or(1).max(1) as f64;
        let seq = if dims.len() >= 2 {
            dims[dims.len() - 2].max(1) as f64
        } else {
            1.0
        };
        let batch = (product(dims) / (seq * last)).floor();
        (batch, seq, (last / 2.0).floor())
    }
}

impl OpSemantics for Rope {
    fn kind(&self) -> OpKind {
        OpKind::Rope
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        ensure!(
            inputs[1].rank() >= 1,
            "embedded input must have rank >= 1"
        );
        Ok(vec![inputs[1].shape().clone()])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<crate::tensor::DType>> {
        Ok(vec![inputs[1].dtype()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (batch, seq, pairs) = Self::problem(io);
        let angles = seq * pairs * 0.5;
        let trig = seq * pairs * 2.0 * 5.0;
        let rotation = batch * seq * pairs * 4.0;
        (angles + trig + rotation) / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let (_, seq, pairs) = Self::problem(io);
        let table = cx.scaled(seq * pairs * 2.0, io.output(0).dtype());
        io.in_traffic(cx) + io.out_traffic(cx) + table
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let (batch, seq, pairs) = Self::problem(io);
        capped(batch * seq * pairs.min(16.0), 2048.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Rope);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Rope)
    }
}
