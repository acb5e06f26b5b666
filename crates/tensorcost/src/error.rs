use thiserror::Error;

use crate::graph::OpId;
use crate::ops::OpKind;
use crate::tensor::{DType, Shape, TensorId};

/// Construction-time failures surfaced by [`crate::Graph`].
///
/// The graph is left untouched whenever one of these is returned.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("tensor {0} does not belong to this graph")]
    UnknownTensor(TensorId),
    #[error("operator {0:?} does not belong to this graph")]
    UnknownOp(OpId),
    #[error("{kind} expects {expected} {what}, got {found}")]
    Arity {
        kind: OpKind,
        what: &'static str,
        expected: String,
        found: usize,
    },
    #[error("{kind} rejected inputs {inputs}: {source:#}")]
    InvalidOperator {
        kind: OpKind,
        inputs: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{kind}: {feature} is not supported")]
    Unsupported { kind: OpKind, feature: String },
    #[error("{kind} infers {expected} ({expected_dtype}) for output {tensor} but it is declared as {found} ({found_dtype})")]
    OutputMismatch {
        kind: OpKind,
        tensor: TensorId,
        expected: Shape,
        expected_dtype: DType,
        found: Shape,
        found_dtype: DType,
    },
    #[error("constant payload of {found} {found_dtype} value(s) does not fill {shape} ({dtype})")]
    InvalidConstant {
        shape: Shape,
        dtype: DType,
        found: usize,
        found_dtype: DType,
    },
    #[error("tensor {tensor} is already produced by operator {producer:?}")]
    AlreadyProduced { tensor: TensorId, producer: OpId },
    #[error("graph contains a cycle through {remaining} operator(s)")]
    Cycle { remaining: usize },
}

/// Marks an operator configuration that is recognised but deliberately not modelled.
///
/// Raised inside inference through `anyhow` and lifted into
/// [`GraphError::Unsupported`] by the graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{feature} is not supported")]
pub struct Unsupported {
    pub feature: String,
}

impl Unsupported {
    pub fn new(feature: impl Into<String>) -> Self {
        Unsupported {
            feature: feature.into(),
        }
    }
}

/// Configuration parse failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("world size must be at least 1")]
    ZeroWorldSize,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
