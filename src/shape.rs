use serde::{Serialize, Deserialize};

use crate::internal::*;


/// The shape of a contiguous, row-major [Tensor](crate::Tensor).

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
  pub dims: Vec<usize>,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Self {
    Self { dims: dims.to_vec() }
  }

  pub fn scalar() -> Self {
    Self { dims: vec![] }
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn strides(&self) -> Vec<usize> {
    let mut strides = vec![1; self.rank()];
    for i in (1..self.rank()).rev() {
      strides[i - 1] = self.dims[i] * strides[i];
    }
    strides
  }

  pub fn is_scalar(&self) -> bool {
    self.rank() == 0
  }

  pub fn is_vector(&self) -> bool {
    self.rank() == 1
  }

  pub fn is_col_vec(&self) -> bool {
    self.rank() == 2 && self.dims[1] == 1
  }

  /// Shape without its leading dimension, if that dimension is exactly one.

  pub fn squeeze_leading(&self) -> Self {
    match self.dims.first() {
      Some(1) if self.rank() > 1 => Self::new(&self.dims[1..]),
      _ => self.clone(),
    }
  }

  /// Shape with a dimension of size one inserted at `axis`.

  pub fn unsqueeze(&self, axis: usize) -> Self {
    let mut dims = self.dims.clone();
    dims.insert(axis.min(dims.len()), 1);
    Self { dims }
  }

  /// Numpy-style broadcast of two shapes, aligned at their trailing dimensions.

  pub fn broadcast(&self, other: &Self) -> Option<Self> {
    let rank = self.rank().max(other.rank());
    let mut dims = vec![0; rank];
    for i in 0..rank {
      let a = self.dim_from_back(i);
      let b = other.dim_from_back(i);
      dims[rank - 1 - i] = match (a, b) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        _ => return None,
      };
    }
    Some(Self { dims })
  }

  fn dim_from_back(&self, i: usize) -> usize {
    if i < self.rank() { self.dims[self.rank() - 1 - i] } else { 1 }
  }

  /// For every element of `target`, the linear index of the element of `self`
  /// it gets broadcast from.

  pub fn broadcast_map(&self, target: &Self) -> Vec<usize> {
    let offset = target.rank() - self.rank();
    let own = self.strides();
    let strides: Vec<usize> = (0..target.rank()).map(|d| {
      if d < offset || self.dims[d - offset] == 1 { 0 } else { own[d - offset] }
    }).collect();
    let mut map = Vec::with_capacity(target.size());
    let mut index = vec![0; target.rank()];
    for _ in 0..target.size() {
      map.push(index.iter().zip(&strides).map(|(i, s)| i * s ).sum());
      // Advance multi-dimensional index
      for d in (0..target.rank()).rev() {
        index[d] += 1;
        if index[d] < target.dims[d] { break }
        index[d] = 0;
      }
    }
    map
  }
}

impl std::ops::Index<isize> for Shape {
  type Output = usize;

  fn index(&self, idx: isize) -> &Self::Output {
    &self.dims[negative_index(idx, self.rank())]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{:?}", self.dims)
  }
}

impl From<&[usize]> for Shape {
  fn from(dims: &[usize]) -> Self {
    Self::new(dims)
  }
}
