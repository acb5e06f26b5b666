//! Enumerates the scalar element types a graph tensor may carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical element type of a graph tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE-754 floating point.
    Float32,
    /// 16-bit IEEE-754 half precision.
    Float16,
    /// 16-bit bfloat16.
    BFloat16,
    /// 64-bit IEEE-754 floating point.
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// One byte per element boolean.
    Bool,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Float64 | DType::Int64 | DType::UInt64 => 8,
            DType::Float32 | DType::Int32 | DType::UInt32 => 4,
            DType::Float16 | DType::BFloat16 | DType::Int16 | DType::UInt16 => 2,
            DType::Int8 | DType::UInt8 | DType::Bool => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DType::Float32 | DType::Float16 | DType::BFloat16 | DType::Float64
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::UInt8
                | DType::UInt16
                | DType::UInt32
                | DType::UInt64
        )
    }

    /// Produces a stable tag used inside workload vectors.
    pub fn tag(self) -> u32 {
        match self {
            DType::Float32 => 1,
            DType::UInt8 => 2,
            DType::Int8 => 3,
            DType::UInt16 => 4,
            DType::Int16 => 5,
            DType::Int32 => 6,
            DType::Int64 => 7,
            DType::Bool => 9,
            DType::Float16 => 10,
            DType::Float64 => 11,
            DType::UInt32 => 12,
            DType::UInt64 => 13,
            DType::BFloat16 => 16,
        }
    }

    /// Reconstructs a `DType` from its tag representation.
    pub fn from_tag(tag: u32) -> Option<Self> {
        let dtype = match tag {
            1 => DType::Float32,
            2 => DType::UInt8,
            3 => DType::Int8,
            4 => DType::UInt16,
            5 => DType::Int16,
            6 => DType::Int32,
            7 => DType::Int64,
            9 => DType::Bool,
            10 => DType::Float16,
            11 => DType::Float64,
            12 => DType::UInt32,
            13 => DType::UInt64,
            16 => DType::BFloat16,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::DType;

    #[test]
    fn tags_round_trip_for_every_dtype() {
        let all = [
            DType::Float32,
            DType::Float16,
            DType::BFloat16,
            DType::Float64,
            DType::Int8,
            DType::Int16,
            DType::Int32,
            DType::Int64,
            DType::UInt8,
            DType::UInt16,
            DType::UInt32,
            DType::UInt64,
            DType::Bool,
        ];
        for dtype in all {
            assert_eq!(DType::from_tag(dtype.tag()), Some(dtype));
        }
        assert_eq!(DType::from_tag(0), None);
    }

    #[test]
    fn byte_sizes_follow_bit_width() {
        assert_eq!(DType::Float32.size_in_bytes(), 4);
        assert_eq!(DType::BFloat16.size_in_bytes(), 2);
        assert_eq!(DType::Int64.size_in_bytes(), 8);
        assert_eq!(DType::Bool.size_in_bytes(), 1);
    }
}
