use crate::{
  error::{ Error, Result },
  shape::Shape,
  scalar::Real,
  tensor::Tensor,
};


// Layout operations

impl<T: Real> Tensor<T> {
  /// View the same storage with different dimensions.

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    let shape = Shape::new(dims);
    if shape.size() != self.size() {
      return Err(Error::shape(format!("cannot reshape {} into {}", self.shape, shape)))
    }
    Ok(Self { shape, data: self.data.clone() })
  }

  /// Sum along `axis`, removing that dimension.

  pub fn sum_over(&self, axis: usize) -> Result<Self> {
    if axis >= self.rank() {
      return Err(Error::shape(format!("axis {axis} out of range for {}", self.shape)))
    }
    let dims = &self.shape.dims;
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    let n = dims[axis];
    let data = self.raw();
    let mut out = vec![T::zero(); outer * inner];
    for o in 0..outer {
      for k in 0..n {
        let base = (o * n + k) * inner;
        for i in 0..inner {
          out[o * inner + i] += data[base + i];
        }
      }
    }
    let mut out_dims = dims.clone();
    out_dims.remove(axis);
    Ok(Self::new(&out_dims, out))
  }

  /// Materialize this tensor broadcast to `dims`.

  pub fn broadcast_to(&self, dims: &[usize]) -> Result<Self> {
    let target = Shape::new(dims);
    if self.shape == target { return Ok(self.detach()) }
    if self.shape.broadcast(&target).as_ref() != Some(&target) {
      return Err(Error::shape(format!("cannot broadcast {} to {}", self.shape, target)))
    }
    let data = self.raw();
    let out = self.shape.broadcast_map(&target).into_iter().map(|i| data[i] ).collect();
    Ok(Self::from_shape(target, out))
  }

  /// Reduce a tensor that was produced by broadcasting back to `dims`,
  /// summing over every broadcast element.

  pub fn sum_to(&self, dims: &[usize]) -> Result<Self> {
    let target = Shape::new(dims);
    if self.shape == target { return Ok(self.clone()) }
    if target.broadcast(&self.shape).as_ref() != Some(&self.shape) {
      return Err(Error::shape(format!("cannot reduce {} to {}", self.shape, target)))
    }
    let data = self.raw();
    let mut out = vec![T::zero(); target.size()];
    for (i, j) in target.broadcast_map(&self.shape).into_iter().enumerate() {
      out[j] += data[i];
    }
    Ok(Self::from_shape(target, out))
  }

  /// Transpose a matrix.

  pub fn transpose(&self) -> Result<Self> {
    if self.rank() != 2 {
      return Err(Error::shape(format!("cannot transpose {} tensor", self.shape)))
    }
    let (rows, cols) = (self.shape.dims[0], self.shape.dims[1]);
    let data = self.raw();
    let mut out = vec![T::zero(); rows * cols];
    for r in 0..rows {
      for c in 0..cols {
        out[c * rows + r] = data[r * cols + c];
      }
    }
    Ok(Self::new(&[cols, rows], out))
  }
}
