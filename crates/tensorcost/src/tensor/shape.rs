//! Tensor shapes and the shape algebra shared by operator inference.

use std::collections::HashSet;
use std::fmt;

use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};

/// Stores the logical dimensions of a tensor. Rank 0 denotes a scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn into_dims(self) -> Vec<usize> {
        self.dims
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dims(f, &self.dims)
    }
}

pub(crate) fn write_dims(f: &mut dyn fmt::Write, dims: &[usize]) -> fmt::Result {
    f.write_char('[')?;
    for (idx, dim) in dims.iter().enumerate() {
        if idx > 0 {
            f.write_char(',')?;
        }
        write!(f, "{dim}")?;
    }
    f.write_char(']')
}

/// Numpy-style broadcast of two shapes aligned on their trailing dimensions.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0usize; rank];
    for idx in 0..rank {
        let l = dim_from_back(lhs, rank - 1 - idx);
        let r = dim_from_back(rhs, rank - 1 - idx);
        out[idx] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            (a, b) => {
                return Err(anyhow!(
                    "shapes {:?} and {:?} are not broadcast compatible ({} vs {})",
                    lhs,
                    rhs,
                    a,
                    b
                ))
            }
        };
    }
    Ok(out)
}

fn dim_from_back(dims: &[usize], offset_from_back: usize) -> usize {
    if offset_from_back < dims.len() {
        dims[dims.len() - 1 - offset_from_back]
    } else {
        1
    }
}

/// Broadcasts an arbitrary number of shapes left to right.
pub fn broadcast_all<'a, I>(shapes: I) -> Result<Vec<usize>>
where
    I: IntoIterator<Item = &'a [usize]>,
{
    let mut acc: Vec<usize> = Vec::new();
    for shape in shapes {
        acc = broadcast_shapes(&acc, shape)?;
    }
    Ok(acc)
}

/// True when `small` can be broadcast into `target` without changing `target`.
pub fn is_unidirectional_broadcast(target: &[usize], small: &[usize]) -> bool {
    match broadcast_shapes(target, small) {
        Ok(out) => out == target,
        Err(_) => false,
    }
}

/// Resolves a possibly negative axis against `rank`.
pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
    let rank_i = rank as isize;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    ensure!(
        (0..rank_i).contains(&resolved),
        "axis {} out of range for rank {}",
        axis,
        rank
    );
    Ok(resolved as usize)
}

/// Normalizes, de-duplicates (rejecting repeats) and sorts a list of axes.
pub fn normalize_axes(axes: &[isize], rank: usize) -> Result<Vec<usize>> {
    let mut seen = HashSet::with_capacity(axes.len());
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let resolved = normalize_axis(axis, rank)?;
        ensure!(seen.insert(resolved), "duplicate axis {} in {:?}", axis, axes);
        out.push(resolved);
    }
    out.sort_unstable();
    Ok(out)
}

/// Product of a dimension range as `f64`, used by the cost formulas.
pub fn product(dims: &[usize]) -> f64 {
    dims.iter().map(|&d| d as f64).product()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_stretches_unit_dimensions() {
        let out = broadcast_shapes(&[4, 1, 3], &[5, 1]).expect("broadcast");
        assert_eq!(out, vec![4, 5, 3]);
    }

    #[test]
    fn broadcast_rejects_conflicting_dimensions() {
        broadcast_shapes(&[2, 3], &[4, 3]).expect_err("2 vs 4 must fail");
    }

    #[test]
    fn normalize_axes_rejects_duplicates() {
        normalize_axes(&[1, -1], 2).expect_err("1 and -1 alias on rank 2");
        assert_eq!(normalize_axes(&[-1, 0], 3).expect("axes"), vec![0, 2]);
    }

    #[test]
    fn unidirectional_broadcast_keeps_target() {
        assert!(is_unidirectional_broadcast(&[2, 3, 4], &[4]));
        assert!(!is_unidirectional_broadcast(&[3, 4], &[2, 3, 4]));
    }
}
