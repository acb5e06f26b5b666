//! Data-movement operators: reshapes, permutations, slicing, gathers and resizing.
//!
//! Pure view changes (a reshape that keeps the row-major layout, squeezing an outer unit
//! axis) are modelled as free; anything that forces a copy is charged as a streaming pass.

mod concat;
mod gather;
mod reshape;
mod resize;
mod slice;
mod transpose;

pub use concat::{Concat, Extend, Split, SplitSpec};
pub use gather::{Gather, GatherElements};
pub use reshape::{Expand, Flatten, Identity, Reshape, Squeeze, Unsqueeze};
pub use resize::{
    Resize, ResizeCoordMode, ResizeMode, ResizeNearestMode, ResizeRatioPolicy, ResizeTarget,
};
pub use slice::{Pad, Slice};
pub use transpose::{DepthToSpace, DepthToSpaceMode, Transpose};

use super::cost::{capped, CostContext, OpIo, NEGLIGIBLE_TIME};

/// Cost triple of a layout change that either aliases its input or copies it.
#[derive(Debug, Clone, Copy)]
struct Relayout {
    copies: bool,
    rate: f64,
}

impl Relayout {
    fn new(copies: bool, rate: f64) -> Self {
        Relayout { copies, rate }
    }

    fn compute_time(self, io: &OpIo<'_>) -> f64 {
        if self.copies {
            io.in_size(0) / self.rate
        } else {
            NEGLIGIBLE_TIME
        }
    }

    fn memory_cost(self, io: &OpIo<'_>, cx: &CostContext) -> f64 {
        if self.copies {
            io.in_traffic(cx) + io.out_traffic(cx)
        } else {
            0.0
        }
    }

    fn parallelism(self, io: &OpIo<'_>) -> f64 {
        if self.copies {
            capped(io.in_size(0) / 128.0, 512.0)
        } else {
            1.0
        }
    }
}
