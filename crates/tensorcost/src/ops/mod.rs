//! Operator catalog.
//!
//! Each operator family is a plain attribute struct implementing [`OpSemantics`]; the
//! closed [`OpDef`] sum type wraps all of them so the graph can store heterogeneous
//! operators without inheritance. Construction runs in two steps: `prepare` resolves
//! attributes against the concrete inputs (negative axes, defaulted axis sets, host
//! constants) and `infer_shapes`/`infer_dtypes` then derive the outputs. Both steps
//! are pure with respect to the graph, so a failure never leaves partial state behind.

pub mod attention;
pub mod collective;
pub mod conv;
pub mod cost;
pub mod det;
pub mod elementwise;
pub mod key;
pub mod kind;
pub mod layout;
pub mod matmul;
pub mod norm;
pub mod pool;
pub mod reduce;
pub mod unary;

use std::fmt;

use anyhow::Result;

use crate::tensor::{DType, HostContext, Shape, Tensor};

pub use attention::{AttentionKvCache, Rope};
pub use collective::{AllGather, AllReduce, AllReduceOp, Broadcast, Recv, Send};
pub use conv::{Conv2d, Conv3d, ConvBackwardFilter, ConvLayout, ConvTranspose2d, Padding};
pub use cost::{CostContext, OpIo};
pub use det::{Det, DetMode};
pub use elementwise::{Elementwise, MseLoss, Reduction, Where};
pub use key::{hash_key, KeyVector, PerfKey};
pub use kind::{ActType, OpKind};
pub use layout::{
    Concat, DepthToSpace, DepthToSpaceMode, Expand, Extend, Flatten, Gather, GatherElements,
    Identity, Pad, Reshape, Resize, ResizeCoordMode, ResizeMode, ResizeNearestMode,
    ResizeRatioPolicy, ResizeTarget, Slice, Split, SplitSpec, Squeeze, Transpose, Unsqueeze,
};
pub use matmul::{ComputePrecision, G2bmm, Gbmm, MatMul};
pub use norm::{BatchNorm, InstanceNorm, LayerNorm, Lrn, RmsNorm, Softmax};
pub use pool::Pool;
pub use reduce::Reduce;
pub use unary::{
    ActivationBackward, Cast, CastType, Clip, Dropout, Elu, Fill, Hardtanh, L2Loss, LeakyRelu,
    Log, LogBase, PRelu, ShapeOf, Unary,
};

/// Number of inputs and outputs an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min_inputs: usize,
    pub max_inputs: usize,
    pub outputs: usize,
}

impl Arity {
    pub const fn exact(inputs: usize, outputs: usize) -> Self {
        Arity {
            min_inputs: inputs,
            max_inputs: inputs,
            outputs,
        }
    }

    pub const fn range(min_inputs: usize, max_inputs: usize, outputs: usize) -> Self {
        Arity {
            min_inputs,
            max_inputs,
            outputs,
        }
    }

    pub const fn variadic(min_inputs: usize, outputs: usize) -> Self {
        Arity {
            min_inputs,
            max_inputs: usize::MAX,
            outputs,
        }
    }

    pub fn accepts(&self, inputs: usize) -> bool {
        (self.min_inputs..=self.max_inputs).contains(&inputs)
    }

    pub(crate) fn describe_inputs(&self) -> String {
        if self.min_inputs == self.max_inputs {
            self.min_inputs.to_string()
        } else if self.max_inputs == usize::MAX {
            format!("at least {}", self.min_inputs)
        } else {
            format!("{} to {}", self.min_inputs, self.max_inputs)
        }
    }
}

/// Contract shared by every operator family.
///
/// Shape and dtype inference must be deterministic: calling them twice with the same
/// inputs yields the same result. The three cost queries are closed-form estimates and
/// never fail; degenerate sizes are clamped instead.
pub trait OpSemantics {
    fn kind(&self) -> OpKind;

    fn arity(&self) -> Arity;

    /// Resolves attributes against the concrete inputs before inference.
    fn prepare(&mut self, _inputs: &[&Tensor], _host: &dyn HostContext) -> Result<()> {
        Ok(())
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>>;

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        let dtype = inputs.first().map(|t| t.dtype()).unwrap_or(DType::Float32);
        Ok(vec![dtype; self.arity().outputs])
    }

    /// Estimated wall-clock seconds.
    fn compute_time(&self, io: &OpIo<'_>, cx: &CostContext) -> f64;

    /// Estimated memory traffic in the unit selected by `cx`.
    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64;

    /// Estimated number of independent parallel work units.
    fn parallelism(&self, io: &OpIo<'_>, cx: &CostContext) -> f64;

    /// Kind tag, shapes and attributes.
    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector;

    /// Kind tag and attributes only.
    fn attr_vector(&self) -> KeyVector;

    /// Writes `name=value,` pieces for the textual form of the operator.
    fn describe(&self, _f: &mut dyn fmt::Write) -> fmt::Result {
        Ok(())
    }
}

macro_rules! op_defs {
    ($($variant:ident($ty:ty),)*) => {
        /// Closed set of operator definitions.
        #[derive(Debug, Clone, PartialEq)]
        pub enum OpDef {
            $($variant($ty),)*
        }

        $(
            impl From<$ty> for OpDef {
                fn from(op: $ty) -> Self {
                    OpDef::$variant(op)
                }
            }
        )*

        impl OpDef {
            fn semantics(&self) -> &dyn OpSemantics {
                match self {
                    $(OpDef::$variant(op) => op,)*
                }
            }

            fn semantics_mut(&mut self) -> &mut dyn OpSemantics {
                match self {
                    $(OpDef::$variant(op) => op,)*
                }
            }
        }
    };
}

op_defs! {
    Elementwise(Elementwise),
    MseLoss(MseLoss),
    Where(Where),
    Unary(Unary),
    Clip(Clip),
    Hardtanh(Hardtanh),
    Fill(Fill),
    L2Loss(L2Loss),
    Cast(Cast),
    ShapeOf(ShapeOf),
    PRelu(PRelu),
    LeakyRelu(LeakyRelu),
    Log(Log),
    Elu(Elu),
    ActivationBackward(ActivationBackward),
    Dropout(Dropout),
    MatMul(MatMul),
    Gbmm(Gbmm),
    G2bmm(G2bmm),
    Conv2d(Conv2d),
    Conv3d(Conv3d),
    ConvTranspose2d(ConvTranspose2d),
    ConvBackwardFilter(ConvBackwardFilter),
    Pool(Pool),
    Reduce(Reduce),
    Softmax(Softmax),
    LayerNorm(LayerNorm),
    RmsNorm(RmsNorm),
    BatchNorm(BatchNorm),
    InstanceNorm(InstanceNorm),
    Lrn(Lrn),
    Reshape(Reshape),
    Flatten(Flatten),
    Identity(Identity),
    Squeeze(Squeeze),
    Unsqueeze(Unsqueeze),
    Transpose(Transpose),
    DepthToSpace(DepthToSpace),
    Expand(Expand),
    Concat(Concat),
    Split(Split),
    Slice(Slice),
    Pad(Pad),
    Extend(Extend),
    Gather(Gather),
    GatherElements(GatherElements),
    Resize(Resize),
    AttentionKvCache(AttentionKvCache),
    Rope(Rope),
    Det(Det),
    AllReduce(AllReduce),
    AllGather(AllGather),
    Broadcast(Broadcast),
    Send(Send),
    Recv(Recv),
}

impl OpSemantics for OpDef {
    fn kind(&self) -> OpKind {
        self.semantics().kind()
    }

    fn arity(&self) -> Arity {
        self.semantics().arity()
    }

    fn prepare(&mut self, inputs: &[&Tensor], host: &dyn HostContext) -> Result<()> {
        self.semantics_mut().prepare(inputs, host)
    }

    fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        self.semantics().infer_shapes(inputs)
    }

    fn infer_dtypes(&self, inputs: &[&Tensor]) -> Result<Vec<DType>> {
        self.semantics().infer_dtypes(inputs)
    }

    fn compute_time(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        self.semantics().compute_time(io, cx)
    }

    fn memory_cost(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        self.semantics().memory_cost(io, cx)
    }

    fn parallelism(&self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        self.semantics().parallelism(io, cx)
    }

    fn workload_vector(&self, io: &OpIo<'_>) -> KeyVector {
        self.semantics().workload_vector(io)
    }

    fn attr_vector(&self) -> KeyVector {
        self.semantics().attr_vector()
    }

    fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        self.semantics().describe(f)
    }
}

/// Writes `name=[a,b,..],`.
pub(crate) fn write_list<T: fmt::Display>(
    f: &mut dyn fmt::Write,
    name: &str,
    values: &[T],
) -> fmt::Result {
    write!(f, "{name}=[")?;
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            f.write_char(',')?;
        }
        write!(f, "{value}")?;
    }
    f.write_str("],")
}
