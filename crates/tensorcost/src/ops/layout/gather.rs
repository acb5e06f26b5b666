use std::fmt;

use anyhow::{ensure, Result};

use crate::ops::cost::{capped, log2, CostContext, OpIo};
use crate::ops::key::{key_with_kind, push_dims, KeyVector};
use crate::ops::{Arity, OpKind, OpSemantics};
use crate::tensor::shape::{normalize_axis, product};
use crate::tensor::{DType, HostContext, Shape, Tensor};

fn check_index_dtype(indices: &Tensor) -> Result<()> {
    ensure!(
        matches!(indices.dtype(), DType::Int32 | DType::Int64),
        "indices must be int32 or int64, got {}",
        indices.dtype()
    );
    Ok(())
}

/// Gathers slices of `data` along `axis` selected by `indices`.
///
/// When the indices are host-resident their values are checked against the axis extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gather {
    axis: isize,
    resolved: usize,
}

impl Gather {
    pub fn new(axis: isize) -> Self {
        Gather { axis, resolved: 0 }
    }

    pub fn axis(&self) -> usize {
        self.resolved
    }
}

impl OpSemantics for Gather {
    fn kind(&self) -> OpKind {
        OpKind::Gather
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], host: &dyn HostContext) -> Result<()> {
        let (data, indices) = (inputs[0], inputs[1]);
        self.resolved = normalize_axis(self.axis, data.rank())?;
        check_index_dtype(indices)?;
        if let Some(values) = host.read_i64(indices)? {
            let extent = data.dims()[self.resolved] as i64;
            if let Some(bad) = values.iter().find(|&&v| v < 0 || v >= extent) {
                anyhow::bail!(
                    "index {} out of range for axis {} of extent {}",
                    bad,
                    self.resolved,
                    extent
                );
            }
        }
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let data = inputs[0].dims();
        let axis = normalize_axis(self.axis, data.len())?;
        let mut out = Vec::with_capacity(data.len() + inputs[1].rank());
        out.extend_from_slice(&data[..axis]);
        out.extend_from_slice(inputs[1].dims());
        out.extend_from_slice(&data[axis + 1..]);
        Ok(vec![Shape::new(out)])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        check_index_dtype(inputs[1])?;
        Ok(vec![inputs[0].dtype()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let slice = product(&dims[self.resolved + 1..]).max(1.0);
        let discontinuity = if self.resolved > 0 {
            1.0 + log2(product(&dims[..self.resolved])) * 0.1
        } else {
            1.0
        };
        io.out_size(0) / slice * 2.0 * discontinuity / 8e8
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        let penalty = if self.resolved > 0 { 1.2 } else { 1.0 };
        let out = io.out_traffic(cx);
        cx.traffic(io.input(1)) + out * penalty + out
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let outer = product(&dims[..self.resolved]);
        let block = product(&dims[self.resolved + 1..]).min(32.0);
        capped(outer * io.in_size(1).sqrt() * block * 0.8, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Gather);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.in_dims(1));
        key.push(self.resolved as i64);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::Gather);
        key.push(self.resolved as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "axis={},", self.resolved)
    }
}

/// Element-wise gather: output has the shape of `indices`, which must match `data`
/// on every axis except `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherElements {
    axis: isize,
    resolved: usize,
}

impl GatherElements {
    pub fn new(axis: isize) -> Self {
        GatherElements { axis, resolved: 0 }
    }
}

impl OpSemantics for GatherElements {
    fn kind(&self) -> OpKind {
        OpKind::GatherElements
    }

    fn arity(&self) -> Arity {
        Arity::exact(2, 1)
    }

    fn prepare(&mut self, inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        self.resolved = normalize_axis(self.axis, inputs[0].rank())?;
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let (data, indices) = (inputs[0], inputs[1]);
        let axis = normalize_axis(self.axis, data.rank())?;
        ensure!(
            data.rank() == indices.rank(),
            "indices {} must have the rank of data {}",
            indices.shape(),
            data.shape()
        );
        for (dim, (&d, &i)) in data.dims().iter().zip(indices.dims()).enumerate() {
            ensure!(
                dim == axis || d == i,
                "indices {} differ from data {} on axis {}",
                indices.shape(),
                data.shape(),
                dim
            );
        }
        Ok(vec![indices.shape().clone()])
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        check_index_dtype(inputs[1])?;
        Ok(vec![inputs[0].dtype()])
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let discontinuity = if self.resolved + 1 < dims.len() {
            1.0 + log2(product(&dims[self.resolved + 1..])) * 0.2
        } else {
            1.0
        };
        io.in_size(1) * 3.0 * discontinuity / 5e8
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        // random access touches roughly a tenth of the data, twice
        cx.traffic(io.input(1)) + cx.traffic(io.input(0)) * 0.1 * 2.0 + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let rank = io.in_dims(0).len();
        let efficiency = if self.resolved + 1 == rank {
            0.9
        } else if self.resolved == 0 {
            0.6
        } else {
            0.75
        };
        capped(io.out_size(0) * efficiency, 1024.0)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::GatherElements);
        push_dims(&mut key, io.in_dims(0));
        push_dims(&mut key, io.in_dims(1));
        key.push(self.resolved as i64);
        key
    }

    fn attr_vector(&self) -> KeyVector {
        let mut key = key_with_kind(OpKind::GatherElements);
        key.push(self.resolved as i64);
        key
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "axis={},", self.resolved)
    }
}
