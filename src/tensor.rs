use std::rc::Rc;
use std::cell::{Ref, RefCell};

use rand::Rng;
use serde::{Serialize, Deserialize, Deserializer, de};

mod cops;
mod lops;

pub use cops::{ Conv2dParams, Pool2dParams };

use crate::{
  internal::*,
  error::{ Error, Result },
  shape::Shape,
  scalar::Real,
};


/// Multidimensional array of [Real] values.
///
/// Storage is shared between clones. Use [detach](Tensor::detach)
/// to obtain an independent copy.

#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = ""))]
pub struct Tensor<T: Real> {
  shape: Shape,
  data: Rc<RefCell<Vec<T>>>,
}

impl<'de, T: Real> Deserialize<'de> for Tensor<T> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(rename = "Tensor", bound(deserialize = ""))]
    struct Raw<T: Real> {
      shape: Shape,
      data: Vec<T>,
    }

    let raw = Raw::<T>::deserialize(deserializer)?;
    if raw.shape.size() != raw.data.len() {
      return Err(de::Error::custom(format!("{} doesn't match data length {}", raw.shape, raw.data.len())))
    }
    Ok(Self::from_shape(raw.shape, raw.data))
  }
}

impl<T: Real> PartialEq for Tensor<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.shape == rhs.shape && *self.data.borrow() == *rhs.data.borrow()
  }
}

impl<T: Real> Tensor<T> {
  /// # Panics
  /// If the shape's size doesn't match the data length.

  pub fn from_shape(shape: Shape, data: Vec<T>) -> Self {
    assert_eq!(shape.size(), data.len(),
      "{} doesn't match data length {}", shape, data.len());
    Self { shape, data: Rc::new(RefCell::new(data)) }
  }

  pub fn new(shape: &[usize], data: Vec<T>) -> Self {
    Self::from_shape(Shape::new(shape), data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::new(&[vec.len()], vec.to_vec())
  }

  pub fn scalar(item: T) -> Self {
    Self::from_shape(Shape::scalar(), vec![item])
  }

  pub fn fill(shape: &[usize], filler: T) -> Self {
    Self::new(shape, vec![filler; shape.iter().product()])
  }

  pub fn zeros(shape: &[usize]) -> Self {
    Self::fill(shape, T::zero())
  }

  pub fn ones(shape: &[usize]) -> Self {
    Self::fill(shape, T::one())
  }

  pub fn arrange(shape: &[usize], start: T, step: T) -> Self {
    let size: usize = shape.iter().product();
    let data = (0..size).map(|i| start + step * T::cast(i as f64) ).collect();
    Self::new(shape, data)
  }

  pub fn init(shape: &[usize], mut cb: impl FnMut() -> T) -> Self {
    let size: usize = shape.iter().product();
    Self::new(shape, (0..size).map(|_| cb() ).collect())
  }

  /// Uniformly distributed values in `[low, high)`.

  pub fn rand(shape: &[usize], low: T, high: T) -> Self {
    let mut rng = rand::thread_rng();
    Self::init(shape, || rng.gen_range(low, high) )
  }

  /// Standard normal distributed values.

  pub fn randn(shape: &[usize]) -> Self {
    let size: usize = shape.iter().product();
    let mut data = Vec::with_capacity(size + 1);
    while data.len() < size {
      let (a, b) = randn();
      data.push(a);
      data.push(b);
    }
    data.truncate(size);
    Self::new(shape, data)
  }

  pub fn glorot_normal(shape: &[usize], gain: T) -> Self {
    let (fan_in, fan_out) = fans(shape);
    let std = gain * (T::cast(2.0) / T::cast((fan_in + fan_out) as f64)).sqrt();
    Self::randn(shape).scale(std)
  }

  pub fn glorot_uniform(shape: &[usize], gain: T) -> Self {
    let (fan_in, fan_out) = fans(shape);
    let limit = gain * (T::cast(6.0) / T::cast((fan_in + fan_out) as f64)).sqrt();
    Self::rand(shape, -limit, limit)
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub fn raw(&self) -> Ref<Vec<T>> {
    self.data.borrow()
  }

  pub fn to_vec(&self) -> Vec<T> {
    self.data.borrow().clone()
  }

  pub fn get(&self, index: usize) -> Option<T> {
    self.data.borrow().get(index).copied()
  }

  /// # Panics
  /// If the tensor holds more than one value.

  pub fn item(&self) -> T {
    assert_eq!(self.size(), 1, "Tensor{} is not a scalar", self.shape);
    self.data.borrow()[0]
  }

  pub fn shared_with(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.data, &other.data)
  }

  pub fn detach(&self) -> Self {
    Self::from_shape(self.shape.clone(), self.to_vec())
  }

  /// Overwrite this tensor's values in place with those of `other`.

  pub fn assign(&self, other: &Self) -> Result<()> {
    if self.shape != other.shape {
      return Err(Error::shape(format!("cannot assign {} values to {} tensor", other.shape, self.shape)))
    }
    if self.shared_with(other) { return Ok(()) }
    self.data.borrow_mut().copy_from_slice(&other.data.borrow());
    Ok(())
  }

  pub fn refill(&self, filler: T) {
    for value in self.data.borrow_mut().iter_mut() {
      *value = filler;
    }
  }

  pub(crate) fn add_assign(&self, other: &Self) -> Result<()> {
    if self.shape != other.shape {
      return Err(Error::shape(format!("cannot accumulate {} into {}", other.shape, self.shape)))
    }
    // Avoid clashing borrow when tensors share storage
    let other = if self.shared_with(other) { other.detach() } else { other.clone() };
    let other = other.raw();
    for (a, &b) in self.data.borrow_mut().iter_mut().zip(other.iter()) {
      *a += b;
    }
    Ok(())
  }

  pub fn map(&self, cb: impl Fn(T) -> T) -> Self {
    let data = self.data.borrow().iter().map(|&a| cb(a) ).collect();
    Self::from_shape(self.shape.clone(), data)
  }

  /// Combine two tensors elementwise, broadcasting them to a common shape.

  pub fn zip(&self, rhs: &Self, cb: impl Fn(T, T) -> T) -> Result<Self> {
    let lhs_data = self.data.borrow();
    let rhs_data = rhs.data.borrow();
    if self.shape == rhs.shape {
      let data = lhs_data.iter().zip(rhs_data.iter()).map(|(&a, &b)| cb(a, b) ).collect();
      return Ok(Self::from_shape(self.shape.clone(), data))
    }
    let shape = self.shape.broadcast(&rhs.shape)
      .ok_or_else(|| Error::shape(format!("could not broadcast {} and {}", self.shape, rhs.shape)) )?;
    let map_l = self.shape.broadcast_map(&shape);
    let map_r = rhs.shape.broadcast_map(&shape);
    let data = map_l.iter().zip(&map_r).map(|(&i, &j)| cb(lhs_data[i], rhs_data[j]) ).collect();
    Ok(Self::from_shape(shape, data))
  }

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a * b )
  }

  pub fn div(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a / b )
  }

  pub fn scale(&self, factor: T) -> Self {
    self.map(|a| a * factor )
  }

  pub fn sum_all(&self) -> Self {
    Self::scalar(self.data.borrow().iter().copied().sum())
  }

  pub fn mean_all(&self) -> Self {
    let n = T::cast(self.size().max(1) as f64);
    Self::scalar(self.sum_all().item() / n)
  }

  pub fn all_finite(&self) -> bool {
    self.data.borrow().iter().all(|a| a.is_finite() )
  }

  /// Largest absolute elementwise difference, or `None` for differing shapes.

  pub fn max_abs_diff(&self, other: &Self) -> Option<T> {
    if self.shape != other.shape { return None }
    let other = other.raw();
    Some(self.data.borrow().iter().zip(other.iter())
      .map(|(&a, &b)| (a - b).abs() )
      .fold(T::zero(), |acc, d| acc.max(d) ))
  }
}

/// Fan-in and fan-out of a parameter with the given dims.
/// Trailing dimensions beyond the first two count as receptive field.

fn fans(dims: &[usize]) -> (usize, usize) {
  match dims.len() {
    0 => (1, 1),
    1 => (dims[0], dims[0]),
    2 => (dims[0], dims[1]),
    _ => {
      let receptive: usize = dims[2..].iter().product();
      (dims[1] * receptive, dims[0] * receptive)
    },
  }
}

impl<T: Real> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{} ", self.shape)?;
    print_chunks(0, &self.shape, &self.raw(), f)?;
    Ok(())
  }
}

fn print_chunks<T: std::fmt::Debug>(idx: usize, shape: &Shape, vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = (0..idx * 2).map(|_| " ").collect::<String>();
  if shape.rank() == 0 {
    write!(f, "{indent}{:?}", vec[0])?;
  } else if idx == shape.rank() - 1 {
    write!(f, "{indent}{:?}\n", vec)?;
  } else {
    let chunks = vec.chunks((vec.len() / shape.dims[idx]).max(1));
    write!(f, "{indent}[\n")?;
    for chunk in chunks {
      print_chunks(idx + 1, shape, chunk, f)?;
    }
    write!(f, "{indent}]\n")?;
  }
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deserialize_checks_length() {
    let x = Tensor::new(&[2,2], vec![1.0f32, 2.0, 3.0, 4.0]);
    let bytes = postcard::to_allocvec(&x).unwrap();
    assert_eq!(postcard::from_bytes::<Tensor<f32>>(&bytes).unwrap(), x);

    let corrupt = postcard::to_allocvec(&(vec![2usize, 1], vec![0.5f32])).unwrap();
    assert!(postcard::from_bytes::<Tensor<f32>>(&corrupt).is_err());
    assert!(serde_json::from_str::<Tensor<f64>>(r#"{"shape":{"dims":[3]},"data":[1.0]}"#).is_err());
  }

  #[test]
  fn broadcast() {
    let x = Tensor::new(&[1,2,3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let y = Tensor::new(&[1], vec![1.0]);
    assert_eq!(x.add(&y).unwrap(), Tensor::new(&[1,2,3], vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0]));

    let y = Tensor::vec(&[1.0, 2.0, 3.0]);
    assert_eq!(x.add(&y).unwrap(), Tensor::new(&[1,2,3], vec![2.0, 4.0, 6.0, 5.0, 7.0, 9.0]));

    let y = Tensor::new(&[2,1], vec![1.0, 2.0]);
    assert_eq!(x.add(&y).unwrap(), Tensor::new(&[1,2,3], vec![2.0, 3.0, 4.0, 6.0, 7.0, 8.0]));

    assert!(x.add(&Tensor::zeros(&[4])).is_err());
  }

  #[test]
  fn assign_checks_shape() {
    let a = Tensor::<f32>::zeros(&[1,4]);
    assert!(a.assign(&Tensor::ones(&[2,4])).is_err());
    a.assign(&Tensor::ones(&[1,4])).unwrap();
    assert_eq!(a.to_vec(), vec![1.0; 4]);
  }

  #[test]
  fn clones_share_storage() {
    let a = Tensor::<f64>::zeros(&[3]);
    let b = a.clone();
    let c = a.detach();
    a.refill(2.0);
    assert_eq!(b.to_vec(), vec![2.0; 3]);
    assert_eq!(c.to_vec(), vec![0.0; 3]);
    assert!(a.shared_with(&b) && !a.shared_with(&c));
  }

  #[test]
  fn glorot_bounds() {
    let w = Tensor::<f64>::glorot_uniform(&[4,2], 1.0);
    let limit = (6.0f64 / 6.0).sqrt();
    assert!(w.raw().iter().all(|v| v.abs() <= limit ));
    assert_eq!(fans(&[8,3,5,5]), (75, 200));
  }

  #[test]
  fn randn_statistics() {
    let x = Tensor::<f64>::randn(&[10_001]);
    let mean = x.mean_all().item();
    assert!(mean.abs() < 0.1);
  }
}
