//! Closed enumeration of operator kinds and their stable integer tags.
//!
//! The tag is the first entry of every workload/attribute key vector, so it must never
//! be renumbered. Tags are grouped by family in blocks of 100.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! op_kinds {
    ($($variant:ident = $tag:literal => $name:literal,)*) => {
        /// Tag identifying an operator kind.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum OpKind {
            $($variant,)*
        }

        impl OpKind {
            pub const ALL: &'static [OpKind] = &[$(OpKind::$variant,)*];

            pub fn tag(self) -> i64 {
                match self {
                    $(OpKind::$variant => $tag,)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(OpKind::$variant => $name,)*
                }
            }

            pub fn from_tag(tag: i64) -> Option<Self> {
                match tag {
                    $($tag => Some(OpKind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

op_kinds! {
    Add = 1 => "Add",
    Sub = 2 => "Sub",
    Mul = 3 => "Mul",
    Div = 4 => "Div",
    Pow = 5 => "Pow",
    Max = 6 => "Max",
    Min = 7 => "Min",
    Equal = 8 => "Equal",
    Greater = 9 => "Greater",
    GreaterEqual = 10 => "GreaterEqual",
    Less = 11 => "Less",
    LessEqual = 12 => "LessEqual",
    And = 13 => "And",
    Or = 14 => "Or",
    Xor = 15 => "Xor",
    MseLoss = 20 => "MSELoss",
    Where = 21 => "Where",

    Relu = 100 => "Relu",
    Gelu = 101 => "Gelu",
    Silu = 102 => "Silu",
    Sigmoid = 103 => "Sigmoid",
    HardSigmoid = 104 => "HardSigmoid",
    HardSwish = 105 => "HardSwish",
    Tanh = 106 => "Tanh",
    Abs = 107 => "Abs",
    Neg = 108 => "Neg",
    Sign = 109 => "Sign",
    Not = 110 => "Not",
    Sqrt = 111 => "Sqrt",
    Exp = 112 => "Exp",
    Erf = 113 => "Erf",
    Sin = 114 => "Sin",
    Cos = 115 => "Cos",
    Tan = 116 => "Tan",
    Asin = 117 => "Asin",
    Acos = 118 => "Acos",
    Atan = 119 => "Atan",
    Sinh = 120 => "Sinh",
    Cosh = 121 => "Cosh",
    Asinh = 122 => "Asinh",
    Acosh = 123 => "Acosh",
    Atanh = 124 => "Atanh",
    Ceil = 125 => "Ceil",
    Floor = 126 => "Floor",
    Round = 127 => "Round",
    Reciprocal = 128 => "Reciprocal",
    Softplus = 129 => "Softplus",
    Clip = 140 => "Clip",
    Hardtanh = 141 => "Hardtanh",
    Fill = 142 => "Fill",
    L2Loss = 143 => "L2Loss",
    Cast = 144 => "Cast",
    Shape = 145 => "Shape",
    PRelu = 146 => "PRelu",
    LeakyRelu = 147 => "LeakyRelu",
    Log = 148 => "Log",
    Elu = 149 => "Elu",
    ReluBackward = 150 => "ReluBackward",
    SigmoidBackward = 151 => "SigmoidBackward",
    TanhBackward = 152 => "TanhBackward",
    Dropout = 153 => "Dropout",

    MatMul = 200 => "MatMul",
    Gbmm = 201 => "GBMM",
    G2bmm = 202 => "G2BMM",

    Conv = 300 => "Conv",
    Conv3d = 301 => "Conv3d",
    ConvTranspose = 302 => "ConvTranspose",
    ConvTransposeNhwc = 303 => "ConvTransposeNHWC",
    ConvBackwardFilter = 304 => "ConvBackwardFilter",
    MaxPool = 310 => "MaxPool",
    AveragePool = 311 => "AveragePool",

    ReduceSum = 400 => "ReduceSum",
    ReduceMean = 401 => "ReduceMean",
    ReduceMax = 402 => "ReduceMax",
    ReduceMin = 403 => "ReduceMin",
    ReduceProd = 404 => "ReduceProd",
    Softmax = 410 => "Softmax",
    LayerNorm = 411 => "LayerNormalization",
    RmsNorm = 412 => "RMSNorm",
    BatchNorm = 413 => "BatchNormalization",
    InstanceNorm = 414 => "InstanceNormalization",
    Lrn = 415 => "LRN",

    Reshape = 500 => "Reshape",
    Flatten = 501 => "Flatten",
    Identity = 502 => "Identity",
    Squeeze = 503 => "Squeeze",
    Unsqueeze = 504 => "Unsqueeze",
    Transpose = 505 => "Transpose",
    DepthToSpace = 506 => "DepthToSpace",
    Expand = 507 => "Expand",
    Concat = 508 => "Concat",
    Split = 509 => "Split",
    Slice = 510 => "Slice",
    Pad = 511 => "Pad",
    Extend = 512 => "Extend",
    Gather = 513 => "Gather",
    GatherElements = 514 => "GatherElements",
    Resize = 515 => "Resize",

    AttentionKvCache = 600 => "AttentionKVCache",
    Rope = 601 => "RoPE",
    Det = 602 => "Det",

    AllReduceSum = 700 => "AllReduceSum",
    AllReduceProd = 701 => "AllReduceProd",
    AllReduceMin = 702 => "AllReduceMin",
    AllReduceMax = 703 => "AllReduceMax",
    AllReduceAvg = 704 => "AllReduceAvg",
    AllGather = 705 => "AllGather",
    Broadcast = 706 => "Broadcast",
    Send = 707 => "Send",
    Recv = 708 => "Recv",
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Activation optionally fused into a producing operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActType {
    #[default]
    None,
    Relu,
    Sigmoid,
    Tanh,
}

impl ActType {
    pub fn tag(self) -> i64 {
        match self {
            ActType::None => 0,
            ActType::Relu => 1,
            ActType::Sigmoid => 2,
            ActType::Tanh => 3,
        }
    }

    pub fn is_some(self) -> bool {
        self != ActType::None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::OpKind;

    #[test]
    fn tags_are_unique_and_round_trip() {
        let mut seen = HashSet::new();
        for &kind in OpKind::ALL {
            assert!(seen.insert(kind.tag()), "duplicate tag for {kind}");
            assert_eq!(OpKind::from_tag(kind.tag()), Some(kind));
        }
    }
}
