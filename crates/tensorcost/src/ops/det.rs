use std::fmt;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use super::cost::{CostContext, OpIo};
use super::key::{key_with_kind, push_dims, KeyVector};
use super::{Arity, OpKind, OpSemantics};
use crate::tensor::shape::product;
use crate::tensor::{Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetMode {
    #[default]
    Normal,
    LogDet,
}

/// Determinant of the trailing square matrices. Rank-2 input yields `[1]`, higher
/// ranks keep the leading batch dims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Det {
    pub mode: DetMode,
}

impl Det {
    pub fn new(mode: DetMode) -> Self {
        Det { mode }
    }

    fn batch(dims: &[usize]) -> f64 {
        product(&dims[..dims.len().saturating_sub(2)])
    }
}

impl OpSemantics for Det {
    fn kind(&self) -> OpKind {
        OpKind::Det
    }

    fn arity(&self) -> Arity {
        Arity::exact(1, 1)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        let dims = inputs[0].dims();
        let rank = dims.len();
        ensure!(rank >= 2, "input {} must have rank >= 2", inputs[0].shape());
        ensure!(
            dims[rank - 1] == dims[rank - 2],
            "trailing matrices of {} must be square",
            inputs[0].shape()
        );
        if rank == 2 {
            Ok(vec![Shape::new(vec![1])])
        } else {
            Ok(vec![Shape::new(dims[..rank - 2].to_vec())])
        }
    }

    fn compute_time(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        let n = dims[dims.len() - 1] as f64;
        let complexity = match self.mode {
            DetMode::Normal => 1.0,
            DetMode::LogDet => 2.0,
        };
        n.powi(3) * complexity * Self::batch(dims) / 1e9
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        // factorization scratch matches the input
        2.0 * io.in_traffic(cx) + io.out_traffic(cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, _cx: &CostContext) -> f64 {
        let dims = io.in_dims(0);
        if dims.len() <= 2 {
            1.0
        } else {
            Self::batch(dims)
        }
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        let mut key = key_with_kind(OpKind::Det);
        push_dims(&mut key, io.out_dims(0));
        key
    }

    fn attr_vector(&self) -> KeyVector {
        key_with_kind(OpKind::Det)
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "mode={:?},", self.mode)
    }
}
