//! Tensor nodes stored in the graph arena.
//!
//! A tensor is an immutable-shape edge of the dataflow graph. Operators only ever read
//! its dims, element count, dtype and guid; the optional payload is consulted by the
//! few operators that fold host constants.

pub mod data;
pub mod dtype;
pub mod shape;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use data::{HostContext, ResidentHost, TensorData};
pub use dtype::DType;
pub use shape::Shape;

use crate::graph::OpId;

/// Arena handle for a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u32);

impl TensorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%t{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Tensor {
    id: TensorId,
    guid: u64,
    shape: Shape,
    dtype: DType,
    data: Option<Arc<TensorData>>,
    pub(crate) producer: Option<OpId>,
    pub(crate) consumers: Vec<OpId>,
}

impl Tensor {
    pub(crate) fn new(id: TensorId, guid: u64, shape: Shape, dtype: DType) -> Self {
        Tensor {
            id,
            guid,
            shape,
            dtype,
            data: None,
            producer: None,
            consumers: Vec::new(),
        }
    }

    pub(crate) fn with_data(mut self, data: TensorData) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Element count.
    pub fn size(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn bytes(&self) -> usize {
        self.size() * self.dtype.size_in_bytes()
    }

    pub fn data(&self) -> Option<&Arc<TensorData>> {
        self.data.as_ref()
    }

    /// Operator that produces this tensor, if any. Lookup only.
    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }

    pub fn consumers(&self) -> &[OpId] {
        &self.consumers
    }
}
