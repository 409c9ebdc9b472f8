use std::fmt::{Debug, Display};

use rand::distributions::uniform::SampleUniform;
use num_traits::{Float, NumAssignOps};
use serde::{Serialize, Deserialize, de::DeserializeOwned};


/// Runtime tag for the element type of a [Tensor](crate::Tensor).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
  Float32,
  Float64,
}

impl Default for DType {
  fn default() -> Self {
    Self::Float32
  }
}

impl Display for DType {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self {
      Self::Float32 => write!(f, "float32"),
      Self::Float64 => write!(f, "float64"),
    }
  }
}


/// All continuous numeric types that may be stored in a
/// [Tensor](crate::Tensor) and differentiated through.
///
/// Implemented for `f32` and `f64`.

pub trait Real:
  Float + NumAssignOps + std::iter::Sum + Default + Debug + Display
  + SampleUniform + Serialize + DeserializeOwned + Send + Sync + 'static
{
  const DTYPE: DType;

  fn cast(value: f64) -> Self;

  fn as_f64(self) -> f64;

  /// Row-major `c = a * b` for an `m x k` by `k x n` product.
  fn gemm(m: usize, k: usize, n: usize, a: &[Self], b: &[Self], c: &mut [Self]);
}

macro_rules! impl_real {
  ($t:ty, $dtype:expr, $gemm:ident) => {
    impl Real for $t {
      const DTYPE: DType = $dtype;

      fn cast(value: f64) -> Self {
        value as $t
      }

      fn as_f64(self) -> f64 {
        self as f64
      }

      #[cfg(feature = "unsafe")]
      fn gemm(m: usize, k: usize, n: usize, a: &[Self], b: &[Self], c: &mut [Self]) {
        assert!(a.len() >= m * k && b.len() >= k * n && c.len() >= m * n);
        unsafe {
          matrixmultiply::$gemm(
            m, k, n,
            1.0,
            a.as_ptr(), k as isize, 1,
            b.as_ptr(), n as isize, 1,
            0.0,
            c.as_mut_ptr(), n as isize, 1,
          );
        }
      }

      #[cfg(not(feature = "unsafe"))]
      fn gemm(m: usize, k: usize, n: usize, a: &[Self], b: &[Self], c: &mut [Self]) {
        naive_gemm(m, k, n, a, b, c)
      }
    }
  };
}

impl_real!(f32, DType::Float32, sgemm);
impl_real!(f64, DType::Float64, dgemm);


#[allow(dead_code)]
pub(crate) fn naive_gemm<T: Real>(m: usize, k: usize, n: usize, a: &[T], b: &[T], c: &mut [T]) {
  for i in 0..m {
    for j in 0..n {
      let mut acc = T::zero();
      for l in 0..k {
        acc += a[i * k + l] * b[l * n + j];
      }
      c[i * n + j] = acc;
    }
  }
}
