//! Host-resident constant payloads and the capability used to read them.
//!
//! A few operators (Gather index validation, Resize sizes/scales/roi) fold constant
//! tensors at construction time. They never reach for a process-wide runtime; the
//! graph hands them the [`HostContext`] it was built with.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::{DType, Tensor};

/// Typed constant payload attached to a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::I32(values) => values.len(),
            TensorData::I64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type the payload is stored as.
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::Float32,
            TensorData::I32(_) => DType::Int32,
            TensorData::I64(_) => DType::Int64,
        }
    }
}

/// Capability to copy a tensor's contents into host memory.
///
/// Returning `Ok(None)` means the tensor has no data available (e.g. it is produced
/// at run time), which callers treat as "cannot validate yet".
pub trait HostContext: Send + Sync {
    fn copy_to_host(&self, tensor: &Tensor) -> Result<Option<TensorData>>;

    fn read_i64(&self, tensor: &Tensor) -> Result<Option<Vec<i64>>> {
        Ok(match self.copy_to_host(tensor)? {
            None => None,
            Some(TensorData::I64(values)) => Some(values),
            Some(TensorData::I32(values)) => Some(values.into_iter().map(i64::from).collect()),
            Some(TensorData::F32(_)) => {
                bail!("tensor {} holds floating point data, expected integers", tensor.guid())
            }
        })
    }

    fn read_f32(&self, tensor: &Tensor) -> Result<Option<Vec<f32>>> {
        Ok(match self.copy_to_host(tensor)? {
            None => None,
            Some(TensorData::F32(values)) => Some(values),
            Some(_) => bail!(
                "tensor {} holds integer data, expected float32",
                tensor.guid()
            ),
        })
    }
}

/// Reads the payload attached to the tensor inside the graph arena.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResidentHost;

impl HostContext for ResidentHost {
    fn copy_to_host(&self, tensor: &Tensor) -> Result<Option<TensorData>> {
        Ok(tensor.data().map(|data| data.as_ref().clone()))
    }
}

pub(crate) fn default_host() -> Arc<dyn HostContext> {
    Arc::new(ResidentHost)
}
