//! Convolution family: 2D/3D forward convolution, transposed convolution and the
//! filter gradient.
//!
//! Forward output size per spatial axis is
//! `floor((in + 2·pad − dilation·(kernel − 1) − 1) / stride + 1)`, with `Same` padding
//! producing `ceil(in / stride)` and `Valid` using zero padding. Transposed output size
//! is `(in − 1)·stride − 2·pad + dilation·(kernel − 1) + output_pad + 1`.

use std::fmt;

use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};

use super::cost::{capped, CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{write_list, ActType, Arity, OpKind, OpSemantics};
use crate::error::Unsupported;
use crate::tensor::shape::product;
use crate::tensor::{HostContext, Shape, Tensor};

const MAX_CONV_PARALLEL_UNITS: f64 = 10240.0;

/// Spatial padding policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Padding {
    /// Symmetric padding, one value per spatial axis.
    Explicit(Vec<usize>),
    /// Pad so that the output is `ceil(in / stride)`.
    Same,
    #[default]
    Valid,
}

impl Padding {
    fn tag(&self) -> i64 {
        match self {
            Padding::Explicit(_) => 0,
            Padding::Same => 1,
            Padding::Valid => 2,
        }
    }
}

fn conv_out_dim(
    input: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
) -> Result<usize> {
    ensure!(kernel > 0, "kernel must be > 0");
    let effective = (kernel - 1)
        .checked_mul(dilation)
        .and_then(|v| v.checked_add(1))
        .ok_or_else(|| anyhow!("effective window overflow"))?;
    let padded = input
        .checked_add(2 * pad)
        .ok_or_else(|| anyhow!("padded dimension overflow"))?;
    ensure!(
        padded >= effective,
        "window ({}) exceeds padded input ({})",
        effective,
        padded
    );
    Ok((padded - effective) / stride + 1)
}

/// Stride, dilation and padding shared by the convolution variants.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConvAttrs<const N: usize> {
    padding: Padding,
    strides: [usize; N],
    dilations: [usize; N],
    pads: [usize; N],
}

impl<const N: usize> Default for ConvAttrs<N> {
    fn default() -> Self {
        ConvAttrs {
            padding: Padding::Valid,
            strides: [1; N],
            dilations: [1; N],
            pads: [0; N],
        }
    }
}

impl<const N: usize> ConvAttrs<N> {
    fn check_steps(&self) -> Result<()> {
        ensure!(
            self.strides.iter().all(|&s| s > 0),
            "strides must be > 0, got {:?}",
            self.strides
        );
        ensure!(
            self.dilations.iter().all(|&d| d > 0),
            "dilations must be > 0, got {:?}",
            self.dilations
        );
        Ok(())
    }

    fn resolve(&mut self, spatial: &[usize], kernel: &[usize]) -> Result<()> {
        self.check_steps()?;
        self.pads = match &self.padding {
            Padding::Explicit(pads) => explicit_pads::<N>(pads)?,
            Padding::Valid => [0; N],
            Padding::Same => {
                let mut pads = [0; N];
                for axis in 0..N {
                    let out = spatial[axis].div_ceil(self.strides[axis]);
                    let needed = out.saturating_sub(1) * self.strides[axis]
                        + self.dilations[axis] * kernel[axis].saturating_sub(1)
                        + 1;
                    pads[axis] = needed.saturating_sub(spatial[axis]) / 2;
                }
                pads
            }
        };
        Ok(())
    }

    fn out_dims(&self, spatial: &[usize], kernel: &[usize]) -> Result<[usize; N]> {
        let mut out = [0; N];
        for axis in 0..N {
            out[axis] = match self.padding {
                Padding::Same => spatial[axis].div_ceil(self.strides[axis]),
                _ => conv_out_dim(
                    spatial[axis],
                    kernel[axis],
                    self.strides[axis],
                    self.dilations[axis],
                    self.pads[axis],
                )?,
            };
        }
        Ok(out)
    }

    fn push_key(&self, key: &mut KeyVector) {
        key.push(self.padding.tag());
        for values in [&self.pads, &self.strides, &self.dilations] {
            key.extend(values.iter().map(|&v| v as i64));
        }
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "pads", &self.pads)?;
        write_list(f, "strides", &self.strides)?;
        write_list(f, "dilations", &self.dilations)
    }
}

fn explicit_pads<const N: usize>(pads: &[usize]) -> Result<[usize; N]> {
    pads.try_into()
        .map_err(|_| anyhow!("expected {} padding values, got {:?}", N, pads))
}

fn rank_of<const R: usize>(what: &str, tensor: &Tensor) -> Result<()> {
    ensure!(
        tensor.rank() == R,
        "{what} must be rank {R}, got {}",
        tensor.shape()
    );
    Ok(())
}

fn reject_bias(inputs: &[&Tensor]) -> Result<()> {
    if inputs.len() > 2 {
        return Err(Unsupported::new("convolution bias input").into());
    }
    Ok(())
}

/// Output channels and group count of a forward convolution.
fn forward_channels(input_c: usize, weight: &[usize]) -> Result<(usize, usize)> {
    let (f, per_group) = (weight[0], weight[1]);
    ensure!(
        per_group > 0 && input_c % per_group == 0,
        "input channels {} are not divisible by weight channels {}",
        input_c,
        per_group
    );
    let group = input_c / per_group;
    ensure!(
        f % group == 0,
        "output channels {} are not divisible by group {}",
        f,
        group
    );
    Ok((f, group))
}

/// 2D convolution over NCHW input with OIHW weight, inputs `(x, w)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conv2d {
    attrs: ConvAttrs<2>,
    pub act: ActType,
}

impl Conv2d {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.attrs.padding = padding;
        self
    }

    pub fn with_pads(self, ph: usize, pw: usize) -> Self {
        self.with_padding(Padding::Explicit(vec![ph, pw]))
    }

    pub fn with_strides(mut self, sh: usize, sw: usize) -> Self {
        self.attrs.strides = [sh, sw];
        self
    }

    pub fn with_dilations(mut self, dh: usize, dw: usize) -> Self {
        self.attrs.dilations = [dh, dw];
        self
    }

    pub fn with_act(mut self, act: ActType) -> Self {
        self.act = act;
        self
    }

    /// Padding actually applied per spatial axis.
    pub fn pads(&self) -> [usize; 2] {
        self.attrs.pads
    }

    fn base_ops(io: &OpIo<'_>) -> f64 {
        let weight = io.in_dims(1);
        let out = io.out_dims(0);
        product(out) * product(&weight[1..])
    }

    fn base_memory(io: &OpIo<'_>, cx: &CostContext) -> f64 {
        io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn base_parallelism(io: &OpIo<'_>) -> f64 {
        capped(io.out_size(0), MAX_CONV_PARALLEL_UNITS)
    }
}

impl OpSemantics for Conv2d {
    fn kind(&self) -> OpKind {
        OpKind::Conv
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        reject_bias(inputs)?;
        rank_of::<4>("input", inputs[0])?;
        rank_of::<4>("weight", inputs[1])?;
        self.attrs
            .resolve(&inputs[0].dims()[2..], &inputs[1].dims()[2..])
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let x = inputs[0].dims();
        let w = inputs[1].dims();
        let (f, _) = forward_channels(x[1], w)?;
        let [oh, ow] = self.attrs.out_dims(&x[2..], &w[2..])?;
        Ok(vec![Shape::new(vec![x[0], f, oh, ow])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let act = if self.act.is_some() {
            0.1 * io.out_size(0)
        } else {
            0.0
        };
        (Self::base_ops(io) + act) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        Self::base_memory(io, cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Self::base_parallelism(io)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Conv);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.in_dims(1));
        self.attrs.push_key(&mut key);
        key.push(self.act.tag());
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Conv);
        self.attrs.push_key(&mut key);
        key.push(self.act.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        self.attrs.describe(f)?;
        if self.act.is_some() {
            write!(f, "act={:?},", self.act)?;
        }
        Ok(())
    }
}

/// 3D convolution over NCDHW input, inputs `(x, w)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conv3d {
    attrs: ConvAttrs<3>,
    pub act: ActType,
}

impl Conv3d {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.attrs.padding = padding;
        self
    }

    pub fn with_strides(mut self, strides: [usize; 3]) -> Self {
        self.attrs.strides = strides;
        self
    }

    pub fn with_dilations(mut self, dilations: [usize; 3]) -> Self {
        self.attrs.dilations = dilations;
        self
    }

    pub fn with_act(mut self, act: ActType) -> Self {
        self.act = act;
        self
    }
}

impl OpSemantics for Conv3d {
    fn kind(&self) -> OpKind {
        OpKind::Conv3d
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        reject_bias(inputs)?;
        rank_of::<5>("input", inputs[0])?;
        rank_of::<5>("weight", inputs[1])?;
        self.attrs
            .resolve(&inputs[0].dims()[2..], &inputs[1].dims()[2..])
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let x = inputs[0].dims();
        let w = inputs[1].dims();
        let (f, _) = forward_channels(x[1], w)?;
        let [od, oh, ow] = self.attrs.out_dims(&x[2..], &w[2..])?;
        Ok(vec![Shape::new(vec![x[0], f, od, oh, ow])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let act = if self.act.is_some() {
            0.1 * io.out_size(0)
        } else {
            0.0
        };
        (Conv2d::base_ops(io) + act) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        Conv2d::base_memory(io, cx) * 1.2
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Conv2d::base_parallelism(io)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Conv3d);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.in_dims(1));
        self.attrs.push_key(&mut key);
        key.push(self.act.tag());
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Conv3d);
        self.attrs.push_key(&mut key);
        key.push(self.act.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        self.attrs.describe(f)
    }
}

/// Memory layout of a transposed convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConvLayout {
    /// Input `[n, f, h, w]`, weight `[f, c, r, s]`.
    #[default]
    Nchw,
    /// Input `[n, h, w, f]`, weight `[f, r, s, c]`.
    Nhwc,
}

/// Transposed 2D convolution, inputs `(x, w)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvTranspose2d {
    attrs: ConvAttrs<2>,
    pub output_padding: [usize; 2],
    pub group: usize,
    pub layout: ConvLayout,
    pub act: ActType,
}

impl Default for ConvTranspose2d {
    fn default() -> Self {
        ConvTranspose2d {
            attrs: ConvAttrs::default(),
            output_padding: [0, 0],
            group: 1,
            layout: ConvLayout::Nchw,
            act: ActType::None,
        }
    }
}

/// Layout-independent view of a transposed convolution problem.
struct TransposedDims {
    n: usize,
    f: usize,
    spatial: [usize; 2],
    c: usize,
    kernel: [usize; 2],
}

impl ConvTranspose2d {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nhwc() -> Self {
        ConvTranspose2d {
            layout: ConvLayout::Nhwc,
            ..Self::default()
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.attrs.padding = padding;
        self
    }

    pub fn with_strides(mut self, sh: usize, sw: usize) -> Self {
        self.attrs.strides = [sh, sw];
        self
    }

    pub fn with_dilations(mut self, dh: usize, dw: usize) -> Self {
        self.attrs.dilations = [dh, dw];
        self
    }

    pub fn with_output_padding(mut self, oph: usize, opw: usize) -> Self {
        self.output_padding = [oph, opw];
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    fn split_dims(&self, x: &[usize], w: &[usize]) -> TransposedDims {
        match self.layout {
            ConvLayout::Nchw => TransposedDims {
                n: x[0],
                f: x[1],
                spatial: [x[2], x[3]],
                c: w[1],
                kernel: [w[2], w[3]],
            },
            ConvLayout::Nhwc => TransposedDims {
                n: x[0],
                f: x[3],
                spatial: [x[1], x[2]],
                c: w[3],
                kernel: [w[1], w[2]],
            },
        }
    }

    fn out_spatial(&self, dims: &TransposedDims) -> Result<[usize; 2]> {
        let mut out = [0; 2];
        for axis in 0..2 {
            let full = dims.spatial[axis].saturating_sub(1) * self.attrs.strides[axis]
                + self.attrs.dilations[axis] * dims.kernel[axis].saturating_sub(1)
                + self.output_padding[axis]
                + 1;
            let trim = 2 * self.attrs.pads[axis];
            ensure!(
                full > trim,
                "padding {} consumes the whole output extent {}",
                self.attrs.pads[axis],
                full
            );
            out[axis] = full - trim;
        }
        Ok(out)
    }

    fn base_ops(&self, io: &OpIo<'_>) -> f64 {
        let dims = self.split_dims(io.in_dims(0), io.in_dims(1));
        let per_group = (dims.f / self.group.max(1)) as f64;
        io.out_size(0) * product(&dims.kernel) * per_group
    }
}

impl OpSemantics for ConvTranspose2d {
    fn kind(&self) -> OpKind {
        match self.layout {
            ConvLayout::Nchw => OpKind::ConvTranspose,
            ConvLayout::Nhwc => OpKind::ConvTransposeNhwc,
        }
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        reject_bias(inputs)?;
        rank_of::<4>("input", inputs[0])?;
        rank_of::<4>("weight", inputs[1])?;
        ensure!(self.group > 0, "group must be > 0");
        self.attrs.check_steps()?;
        let dims = self.split_dims(inputs[0].dims(), inputs[1].dims());
        self.attrs.pads = match &self.attrs.padding {
            Padding::Explicit(pads) => explicit_pads::<2>(pads)?,
            Padding::Valid => [0, 0],
            Padding::Same => {
                let mut pads = [0; 2];
                for axis in 0..2 {
                    let window = self.attrs.dilations[axis] * dims.kernel[axis].saturating_sub(1)
                        + 1
                        + self.output_padding[axis];
                    pads[axis] = window.saturating_sub(self.attrs.strides[axis]) / 2;
                }
                pads
            }
        };
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let w = inputs[1].dims();
        let dims = self.split_dims(inputs[0].dims(), w);
        ensure!(
            dims.f == w[0],
            "input channels {} must equal weight dim 0 ({})",
            dims.f,
            w[0]
        );
        ensure!(
            dims.f % self.group == 0,
            "input channels {} are not divisible by group {}",
            dims.f,
            self.group
        );
        let oc = dims.c * self.group;
        let [oh, ow] = self.out_spatial(&dims)?;
        let out = match self.layout {
            ConvLayout::Nchw => vec![dims.n, oc, oh, ow],
            ConvLayout::Nhwc => vec![dims.n, oh, ow, oc],
        };
        Ok(vec![Shape::new(out)])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let act = if self.act.is_some() {
            0.1 * io.out_size(0)
        } else {
            0.0
        };
        match self.layout {
            ConvLayout::Nchw => (self.base_ops(io) + act) / 0.9e9,
            ConvLayout::Nhwc => (self.base_ops(io) * 1.26 + act) / 1e9,
        }
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let factor = match self.layout {
            ConvLayout::Nchw => 1.3,
            ConvLayout::Nhwc => 1.235,
        };
        Conv2d::base_memory(io, cx) * factor
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Conv2d::base_parallelism(io) * 0.95
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(self.kind());
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.in_dims(1));
        key.extend(self.attr_vector().into_iter().skip(1));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(self.kind());
        self.attrs.push_key(&mut key);
        key.extend(self.output_padding.iter().map(|&v| v as i64));
        key.push(self.group as i64);
        key.push(self.act.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        self.attrs.describe(f)?;
        write_list(f, "output_padding", &self.output_padding)?;
        write!(f, "group={},", self.group)
    }
}

/// Gradient of a 2D convolution with respect to its filter, inputs `(x, dy)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConvBackwardFilter {
    attrs: ConvAttrs<2>,
    pub act: ActType,
}

impl ConvBackwardFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.attrs.padding = padding;
        self
    }

    pub fn with_strides(mut self, sh: usize, sw: usize) -> Self {
        self.attrs.strides = [sh, sw];
        self
    }

    pub fn with_dilations(mut self, dh: usize, dw: usize) -> Self {
        self.attrs.dilations = [dh, dw];
        self
    }
}

impl OpSemantics for ConvBackwardFilter {
    fn kind(&self) -> OpKind {
        OpKind::ConvBackwardFilter
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        reject_bias(inputs)?;
        rank_of::<4>("input", inputs[0])?;
        rank_of::<4>("output gradient", inputs[1])?;
        self.attrs
            .resolve(&inputs[0].dims()[2..], &inputs[1].dims()[2..])
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let x = inputs[0].dims();
        let dy = inputs[1].dims();
        let (f, _) = forward_channels(x[1], dy)?;
        let [oh, ow] = self.attrs.out_dims(&x[2..], &dy[2..])?;
        Ok(vec![Shape::new(vec![x[0], f, oh, ow])])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Conv2d::base_ops(io) / 1e9 * 2.5
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        Conv2d::base_memory(io, cx) * 2.0
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        Conv2d::base_parallelism(io) * 0.9
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::ConvBackwardFilter);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.in_dims(1));
        self.attrs.push_key(&mut key);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::ConvBackwardFilter);
        self.attrs.push_key(&mut key);
        key.push(self.act.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        self.attrs.describe(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_keeps_ceil_of_stride() {
        let mut attrs = ConvAttrs::<2> {
            padding: Padding::Same,
            strides: [2, 1],
            ..ConvAttrs::default()
        };
        attrs.resolve(&[7, 8], &[3, 3]).expect("resolve");
        assert_eq!(attrs.out_dims(&[7, 8], &[3, 3]).expect("out"), [4, 8]);
        assert_eq!(attrs.pads, [1, 1]);
    }

    #[test]
    fn dilated_window_larger_than_input_fails() {
        let err = conv_out_dim(4, 3, 1, 3, 0).expect_err("window too large");
        assert!(err.to_string().contains("exceeds"));
    }
}
