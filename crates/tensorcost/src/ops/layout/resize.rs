use std::fmt;

use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::error::Unsupported;
use crate::ops::cost::{capped, CostContext, OpIo};
use crate::ops::key::{key_with_kind, push_dims, KeyVector};
use crate::ops::{write_list, Arity, OpKind, OpSemantics};
use crate::tensor::{DType, HostContext, Shape, Tensor};

/// Whether the second input carries absolute output sizes or per-axis scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeTarget {
    /// int64 output extents
    Sizes,
    /// float32 multipliers
    Scales,
}

/// Interpolation coefficient mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeMode {
    #[default]
    Nearest,
    Linear,
    Cubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeNearestMode {
    #[default]
    RoundPreferFloor,
    RoundPreferCeil,
    Floor,
    Ceil,
    /// Used with non-nearest coefficient modes.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeCoordMode {
    #[default]
    HalfPixel,
    PytorchHalfPixel,
    AlignCorners,
    Asymmetric,
    TfCropAndResize,
}

/// How per-axis size ratios are reconciled when targeting explicit sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeRatioPolicy {
    #[default]
    Stretch,
    NotLarger,
    NotSmaller,
}

impl ResizeNearestMode {
    fn tag(self) -> i64 {
        match self {
            ResizeNearestMode::RoundPreferFloor => 0,
            ResizeNearestMode::RoundPreferCeil => 1,
            ResizeNearestMode::Floor => 2,
            ResizeNearestMode::Ceil => 3,
            ResizeNearestMode::None => 4,
        }
    }
}

impl ResizeCoordMode {
    fn tag(self) -> i64 {
        match self {
            ResizeCoordMode::HalfPixel => 0,
            ResizeCoordMode::PytorchHalfPixel => 1,
            ResizeCoordMode::AlignCorners => 2,
            ResizeCoordMode::Asymmetric => 3,
            ResizeCoordMode::TfCropAndResize => 4,
        }
    }
}

impl ResizeRatioPolicy {
    fn tag(self) -> i64 {
        match self {
            ResizeRatioPolicy::Stretch => 0,
            ResizeRatioPolicy::NotLarger => 1,
            ResizeRatioPolicy::NotSmaller => 2,
        }
    }
}

/// Resamples the input. Inputs are `(x, sizes | scales[, roi])`.
///
/// The sizes or scales tensor must be host-resident: output extents are derived from
/// its values through the graph's [`HostContext`]. `roi` is required exactly when the
/// coordinate mode is `TfCropAndResize`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resize {
    pub target: ResizeTarget,
    pub mode: ResizeMode,
    pub nearest_mode: ResizeNearestMode,
    pub coord_mode: ResizeCoordMode,
    pub ratio_policy: ResizeRatioPolicy,
    axes: Option<Vec<isize>>,
    resolved_axes: Vec<usize>,
    scales: Vec<f32>,
}

impl Resize {
    pub fn new(target: ResizeTarget, mode: ResizeMode) -> Self {
        Resize {
            target,
            mode,
            nearest_mode: if mode == ResizeMode::Nearest {
                ResizeNearestMode::RoundPreferFloor
            } else {
                ResizeNearestMode::None
            },
            coord_mode: ResizeCoordMode::HalfPixel,
            ratio_policy: ResizeRatioPolicy::Stretch,
            axes: None,
            resolved_axes: Vec::new(),
            scales: Vec::new(),
        }
    }

    pub fn sizes(mode: ResizeMode) -> Self {
        Self::new(ResizeTarget::Sizes, mode)
    }

    pub fn scales(mode: ResizeMode) -> Self {
        Self::new(ResizeTarget::Scales, mode)
    }

    pub fn with_axes(mut self, axes: Vec<isize>) -> Self {
        self.axes = Some(axes);
        self
    }

    pub fn with_nearest_mode(mut self, nearest_mode: ResizeNearestMode) -> Self {
        self.nearest_mode = nearest_mode;
        self
    }

    pub fn with_coord_mode(mut self, coord_mode: ResizeCoordMode) -> Self {
        self.coord_mode = coord_mode;
        self
    }

    pub fn with_ratio_policy(mut self, ratio_policy: ResizeRatioPolicy) -> Self {
        self.ratio_policy = ratio_policy;
        self
    }

    /// Per-axis scale factors resolved from the sizes or scales input.
    pub fn resolved_scales(&self) -> &[f32] {
        &self.scales
    }

    fn resolve_axes(&self, rank: usize, count: usize) -> Result<Vec<usize>> {
        match &self.axes {
            None => {
                ensure!(
                    count == rank,
                    "expected {} sizes or scales for rank {}, got {}",
                    rank,
                    rank,
                    count
                );
                Ok((0..rank).collect())
            }
            Some(axes) => {
                ensure!(
                    count == axes.len(),
                    "expected {} sizes or scales for axes {:?}, got {}",
                    axes.len(),
                    axes,
                    count
                );
                let mut out = Vec::with_capacity(axes.len());
                for &axis in axes {
                    if axis < 0 {
                        return Err(Unsupported::new("negative resize axes").into());
                    }
                    ensure!(
                        (axis as usize) < rank,
                        "axis {} out of range for rank {}",
                        axis,
                        rank
                    );
                    out.push(axis as usize);
                }
                Ok(out)
            }
        }
    }

    fn scales_from_sizes(&self, dims: &[usize], axes: &[usize], sizes: &[i64]) -> Vec<f32> {
        let ratios: Vec<f32> = axes
            .iter()
            .zip(sizes)
            .map(|(&axis, &size)| size as f32 / dims[axis] as f32)
            .collect();
        let shared = match self.ratio_policy {
            ResizeRatioPolicy::Stretch => None,
            ResizeRatioPolicy::NotLarger => ratios.iter().copied().reduce(f32::min),
            ResizeRatioPolicy::NotSmaller => ratios.iter().copied().reduce(f32::max),
        };
        let mut scales = vec![1.0; dims.len()];
        for (idx, &axis) in axes.iter().enumerate() {
            scales[axis] = shared.unwrap_or(ratios[idx]);
        }
        scales
    }

    fn interpolation_points(&self) -> f64 {
        let axes = self.resolved_axes.len() as i32;
        match self.mode {
            ResizeMode::Nearest => 2.0,
            ResizeMode::Linear => 2f64.powi(axes),
            ResizeMode::Cubic => 4f64.powi(axes),
        }
    }
}

impl OpSemantics for Resize {
    fn kind(&self) -> OpKind {
        OpKind::Resize
    }

    fn arity(&self) -> Arity {
        Arity::range(2, 3, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], host: &dyn HostContext) -> Result<()> {
        let (x, param) = (inputs[0], inputs[1]);
        let dims = x.dims();
        ensure!(param.rank() == 1, "{} must be rank 1", param.shape());
        let axes = self.resolve_axes(dims.len(), param.dims()[0])?;

        let crop = self.coord_mode == ResizeCoordMode::TfCropAndResize;
        ensure!(
            crop == (inputs.len() == 3),
            "roi input is required exactly for tf_crop_and_resize"
        );
        if let Some(roi) = inputs.get(2) {
            ensure!(
                roi.dims() == [2 * axes.len()],
                "roi must have shape [{}], got {}",
                2 * axes.len(),
                roi.shape()
            );
        }

        let scales = match self.target {
            ResizeTarget::Sizes => {
                let sizes = host
                    .read_i64(param)?
                    .ok_or_else(|| anyhow!("sizes tensor {} has no host data", param.guid()))?;
                ensure!(
                    sizes.iter().all(|&s| s > 0),
                    "sizes must be positive, got {:?}",
                    sizes
                );
                ensure!(
                    axes.iter().all(|&axis| dims[axis] > 0),
                    "cannot resize an empty axis by size"
                );
                self.scales_from_sizes(dims, &axes, &sizes)
            }
            ResizeTarget::Scales => {
                let values = host
                    .read_f32(param)?
                    .ok_or_else(|| anyhow!("scales tensor {} has no host data", param.guid()))?;
                ensure!(
                    values.iter().all(|&s| s > 0.0),
                    "scales must be positive, got {:?}",
                    values
                );
                let mut scales = vec![1.0; dims.len()];
                for (&axis, &scale) in axes.iter().zip(&values) {
                    scales[axis] = scale;
                }
                scales
            }
        };
        self.resolved_axes = axes;
        self.scales = scales;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        ensure!(
            self.scales.len() == dims.len(),
            "scales are unresolved for input {}",
            inputs[0].shape()
        );
        let out = dims
            .iter()
            .zip(&self.scales)
            .map(|(&d, &s)| (s * d as f32).round().max(0.0) as usize)
            .collect::<Vec<_>>();
        Ok(vec![Shape::new(out)])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        let expected = match self.target {
            ResizeTarget::Sizes => DType::Int64,
            ResizeTarget::Scales => DType::Float32,
        };
        ensure!(
            inputs[1].dtype() == expected,
            "{:?} input must be {}, got {}",
            self.target,
            expected,
            inputs[1].dtype()
        );
        if let Some(roi) = inputs.get(2) {
            ensure!(
                roi.dtype() == DType::Float32,
                "roi must be float32, got {}",
                roi.dtype()
            );
        }
        Ok(vec![inputs[0].dtype()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let operation = match self.mode {
            ResizeMode::Nearest => 1.0,
            ResizeMode::Linear => 2.5,
            ResizeMode::Cubic => 6.0,
        };
        let transform = match self.coord_mode {
            ResizeCoordMode::AlignCorners => 1.1,
            ResizeCoordMode::TfCropAndResize => 1.3,
            _ => 1.0,
        };
        let dims = 1.0 + 0.1 * self.resolved_axes.len() as f64;
        io.out_size(0) * operation * transform * dims / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let input = cx.traffic(io.input(0)) * self.interpolation_points() / 2.0;
        let params: f64 = io.inputs()[1..].iter().map(|t| cx.traffic(t)).sum();
        input + params + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let mut efficiency = 0.8;
        if self.mode != ResizeMode::Nearest {
            efficiency *= 0.9;
        }
        if self.coord_mode == ResizeCoordMode::TfCropAndResize {
            efficiency *= 0.95;
        }
        capped(io.out_size(0) * efficiency, 2048.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Resize);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.out_dims(0));
        key.push(self.coord_mode.tag());
        key.push(self.nearest_mode.tag());
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Resize);
        push_dims(&mut key, &self.resolved_axes);
        key.push(self.coord_mode.tag());
        key.push(self.nearest_mode.tag());
        key.push(self.ratio_policy.tag());
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write_list(f, "axes", &self.resolved_axes)?;
        write_list(f, "scales", &self.scales)?;
        write!(
            f,
            "mode={:?},nearest={:?},coord={:?},ratio={:?},",
            self.mode, self.nearest_mode, self.coord_mode, self.ratio_policy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{ResidentHost, TensorData, TensorId};

    fn tensor(id: u32, dims: &[usize], dtype: DType) -> Tensor {
        Tensor::new(TensorId(id), u64::from(id), Shape::new(dims.to_vec()), dtype)
    }

    #[test]
    fn not_larger_policy_keeps_aspect_ratio() {
        let x = tensor(0, &[1, 3, 10, 20], DType::Float32);
        let sizes = tensor(1, &[2], DType::Int64).with_data(TensorData::I64(vec![20, 20]));
        let mut op = Resize::sizes(ResizeMode::Linear)
            .with_axes(vec![2, 3])
            .with_ratio_policy(ResizeRatioPolicy::NotLarger);
        op.prepare(&[&x, &sizes], &ResidentHost).expect("prepare");
        let out = op.infer_shapes(&[&x, &sizes]).expect("shape");
        assert_eq!(out[0].dims(), &[1, 3, 10, 20]);
    }

    #[test]
    fn scales_round_half_away_from_zero() {
        let x = tensor(0, &[1, 1, 5, 5], DType::Float32);
        let scales = tensor(1, &[4], DType::Float32)
            .with_data(TensorData::F32(vec![1.0, 1.0, 0.5, 2.0]));
        let mut op = Resize::scales(ResizeMode::Nearest);
        op.prepare(&[&x, &scales], &ResidentHost).expect("prepare");
        let out = op.infer_shapes(&[&x, &scales]).expect("shape");
        assert_eq!(out[0].dims(), &[1, 1, 3, 10]);
    }

    #[test]
    fn negative_axes_are_unsupported() {
        let x = tensor(0, &[1, 1, 5, 5], DType::Float32);
        let sizes = tensor(1, &[1], DType::Int64).with_data(TensorData::I64(vec![10]));
        let mut op = Resize::sizes(ResizeMode::Nearest).with_axes(vec![-1]);
        let err = op
            .prepare(&[&x, &sizes], &ResidentHost)
            .expect_err("negative axis");
        assert!(err.downcast_ref::<Unsupported>().is_some());
    }

    #[test]
    fn crop_mode_requires_roi() {
        let x = tensor(0, &[4, 4], DType::Float32);
        let scales = tensor(1, &[2], DType::Float32).with_data(TensorData::F32(vec![2.0, 2.0]));
        let mut op =
            Resize::scales(ResizeMode::Linear).with_coord_mode(ResizeCoordMode::TfCropAndResize);
        op.prepare(&[&x, &scales], &ResidentHost)
            .expect_err("roi missing");
    }
}
