use std::fmt;

use anyhow::{ensure, Result};

use super::cost::{capped, log2, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::{HostContext, Shape, Tensor};

/// Max or average pooling over `[n, c, h, w]` or `[n, c, w]` input.
///
/// Rank-3 input pools only the last axis; the `h` entries of kernel, pads, strides and
/// dilations must then be the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool {
    kind: OpKind,
    pub kernel: [usize; 2],
    pub dilations: [usize; 2],
    pub pads: [usize; 2],
    pub strides: [usize; 2],
    pub ceil_mode: bool,
}

impl Pool {
    pub fn new(kind: OpKind, kernel: [usize; 2]) -> Self {
        Pool {
            kind,
            kernel,
            dilations: [1, 1],
            pads: [0, 0],
            strides: kernel,
            ceil_mode: false,
        }
    }

    pub fn max(kernel: [usize; 2]) -> Self {
        Self::new(OpKind::MaxPool, kernel)
    }

    pub fn average(kernel: [usize; 2]) -> Self {
        Self::new(OpKind::AveragePool, kernel)
    }

    pub fn with_strides(mut self, strides: [usize; 2]) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_pads(mut self, pads: [usize; 2]) -> Self {
        self.pads = pads;
        self
    }

    pub fn with_dilations(mut self, dilations: [usize; 2]) -> Self {
        self.dilations = dilations;
        self
    }

    pub fn with_ceil_mode(mut self, ceil_mode: bool) -> Self {
        self.ceil_mode = ceil_mode;
        self
    }

    fn pooled(&self, axis: usize, input: usize) -> Result<usize> {
        let window = self.dilations[axis] * (self.kernel[axis] - 1) + 1;
        let padded = input + 2 * self.pads[axis];
        ensure!(
            padded >= window,
            "pooling window {} exceeds padded extent {}",
            window,
            padded
        );
        let span = padded - window;
        let stride = self.strides[axis];
        let steps = if self.ceil_mode {
            span.div_ceil(stride)
        } else {
            span / stride
        };
        Ok(steps + 1)
    }

    fn max_dilation(&self) -> usize {
        self.dilations[0].max(self.dilations[1])
    }

    fn max_stride(&self) -> usize {
        self.strides[0].max(self.strides[1])
    }
}

impl OpSemantics for Pool {
    fn kind(&self) -> OpKind {
        self.kind
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        ensure!(
            matches!(self.kind, OpKind::MaxPool | OpKind::AveragePool),
            "{} is not a pooling operator",
            self.kind
        );
        ensure!(
            self.kernel.iter().all(|&k| k > 0)
                && self.strides.iter().all(|&s| s > 0)
                && self.dilations.iter().all(|&d| d > 0),
            "kernel, strides and dilations must be > 0"
        );
        let rank = inputs[0].rank();
        ensure!(
            rank == 3 || rank == 4,
            "pooling expects rank 3 or 4 input, got {}",
            inputs[0].shape()
        );
        if rank == 3 {
            ensure!(
                self.kernel[0] == 1 && self.pads[0] == 0,
                "rank-3 pooling must use a unit window on the h axis"
            );
        }
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let mut out = inputs[0].dims().to_vec();
        let rank = out.len();
        if rank == 4 {
            out[2] = self.pooled(0, out[2])?;
        }
        out[rank - 1] = self.pooled(1, out[rank - 1])?;
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let window = (self.kernel[0] * self.kernel[1]) as f64;
        let per_output = match self.kind {
            OpKind::MaxPool => window - 1.0,
            _ => window + 1.0,
        };
        let dilation = if self.max_dilation() > 1 {
            1.0 + log2(self.max_dilation() as f64) * 0.1
        } else {
            1.0
        };
        io.out_size(0) * per_output * dilation / 2e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let stride = if self.max_stride() > 1 {
            1.0 + log2(self.max_stride() as f64) * 0.05
        } else {
            1.0
        };
        let dilation = if self.max_dilation() > 1 {
            1.0 + log2(self.max_dilation() as f64) * 0.1
        } else {
            1.0
        };
        io.in_traffic(cx) * 1.5 * stride * dilation + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let out = io.out_dims(0);
        let spatial: usize = out[2..].iter().product();
        capped(
            out[0] as f64 * (out[1] as f64).min(64.0) * (spatial as f64).min(256.0),
            2048.0,
        )
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(self.kind);
        push_dims(&mut key, io.in_dims(0));
        key.extend(self.attr_vector().into_iter().skip(1));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(self.kind);
        for values in [&self.kernel, &self.pads, &self.strides, &self.dilations] {
            key.extend(values.iter().map(|&v| v as i64));
        }
        key.push(self.ceil_mode as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "kernel", &self.kernel)?;
        write_list(f, "pads", &self.pads)?;
        write_list(f, "strides", &self.strides)?;
        write_list(f, "dilations", &self.dilations)?;
        write!(f, "ceil_mode={},", self.ceil_mode)
    }
}
