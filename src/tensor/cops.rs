#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
};


/// Padding, stride and dilation of a 2-D convolution, as `[height, width]`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dParams {
  pub pad: [usize; 2],
  pub stride: [usize; 2],
  pub dilation: [usize; 2],
}

impl Default for Conv2dParams {
  fn default() -> Self {
    Self { pad: [1, 1], stride: [1, 1], dilation: [1, 1] }
  }
}


/// Kernel, padding and stride of a 2-D pooling window, as `[height, width]`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool2dParams {
  pub kernel: [usize; 2],
  pub pad: [usize; 2],
  pub stride: [usize; 2],
}

impl Default for Pool2dParams {
  fn default() -> Self {
    Self { kernel: [2, 2], pad: [0, 0], stride: [2, 2] }
  }
}


fn output_extent(input: usize, pad: usize, window: usize, stride: usize) -> Option<usize> {
  let padded = input + 2 * pad;
  if window == 0 || stride == 0 || padded < window { return None }
  Some((padded - window) / stride + 1)
}

fn dims4(tensor: &Tensor<impl Real>, what: &str) -> Result<[usize; 4]> {
  match tensor.dims() {
    &[a, b, c, d] => Ok([a, b, c, d]),
    dims => Err(Error::shape(format!("{what} must be of rank 4, got {dims:?}"))),
  }
}


// Compute operations

impl<T: Real> Tensor<T> {
  /// Matrix product of two rank 2 tensors.

  pub fn mm(&self, rhs: &Self) -> Result<Self> {
    match (self.dims(), rhs.dims()) {
      (&[m, k], &[k2, n]) if k == k2 => {
        let mut out = vec![T::zero(); m * n];
        T::gemm(m, k, n, &self.raw(), &rhs.raw(), &mut out);
        Ok(Self::new(&[m, n], out))
      },
      (l, r) => Err(Error::shape(format!("cannot multiply {l:?} by {r:?} matrices"))),
    }
  }

  /// Output dimensions of convolving an `[n, c, h, w]` input with an `[o, c, kh, kw]` filter.

  pub fn conv2d_dims(input: &[usize; 4], filter: &[usize; 4], params: &Conv2dParams) -> Result<[usize; 4]> {
    let [n, c, h, w] = *input;
    let [o, fc, kh, kw] = *filter;
    if c != fc {
      return Err(Error::shape(format!("input has {c} channels but filter expects {fc}")))
    }
    let span_h = params.dilation[0] * (kh.max(1) - 1) + 1;
    let span_w = params.dilation[1] * (kw.max(1) - 1) + 1;
    let oh = output_extent(h, params.pad[0], span_h, params.stride[0]);
    let ow = output_extent(w, params.pad[1], span_w, params.stride[1]);
    match (oh, ow) {
      (Some(oh), Some(ow)) if kh > 0 && kw > 0 => Ok([n, o, oh, ow]),
      _ => Err(Error::shape(format!("filter {filter:?} does not fit input {input:?} with {params:?}"))),
    }
  }

  pub fn conv2d(&self, filter: &Self, params: &Conv2dParams) -> Result<Self> {
    let input = dims4(self, "convolution input")?;
    let fdims = dims4(filter, "convolution filter")?;
    let out_dims = Self::conv2d_dims(&input, &fdims, params)?;
    let [_, c, h, w] = input;
    let [o, _, kh, kw] = fdims;
    let [_, _, oh, ow] = out_dims;
    let xs = self.raw();
    let fs = filter.raw();
    let xs: &[T] = &xs;
    let fs: &[T] = &fs;

    let sample = |n: usize, chunk: &mut [T]| {
      for oc in 0..o {
        for oy in 0..oh {
          for ox in 0..ow {
            let mut acc = T::zero();
            for ic in 0..c {
              for ky in 0..kh {
                let iy = (oy * params.stride[0] + ky * params.dilation[0]) as isize - params.pad[0] as isize;
                if iy < 0 || iy >= h as isize { continue }
                for kx in 0..kw {
                  let ix = (ox * params.stride[1] + kx * params.dilation[1]) as isize - params.pad[1] as isize;
                  if ix < 0 || ix >= w as isize { continue }
                  acc += xs[((n * c + ic) * h + iy as usize) * w + ix as usize]
                    * fs[((oc * c + ic) * kh + ky) * kw + kx];
                }
              }
            }
            chunk[(oc * oh + oy) * ow + ox] = acc;
          }
        }
      }
    };

    let per_sample = o * oh * ow;
    let mut out = vec![T::zero(); out_dims.iter().product()];
    if per_sample > 0 {
      #[cfg(feature = "rayon")]
      out.par_chunks_mut(per_sample).enumerate().for_each(|(n, chunk)| sample(n, chunk) );
      #[cfg(not(feature = "rayon"))]
      out.chunks_mut(per_sample).enumerate().for_each(|(n, chunk)| sample(n, chunk) );
    }
    Ok(Self::new(&out_dims, out))
  }

  /// Gradients of a convolution with respect to its input and its filter.

  pub fn conv2d_backward(&self, filter: &Self, grad: &Self, params: &Conv2dParams) -> Result<(Self, Self)> {
    let input = dims4(self, "convolution input")?;
    let fdims = dims4(filter, "convolution filter")?;
    let out_dims = Self::conv2d_dims(&input, &fdims, params)?;
    if grad.dims() != out_dims {
      return Err(Error::shape(format!("gradient {:?} doesn't match convolution output {out_dims:?}", grad.dims())))
    }
    let [batch, c, h, w] = input;
    let [o, _, kh, kw] = fdims;
    let [_, _, oh, ow] = out_dims;
    let xs = self.raw();
    let fs = filter.raw();
    let gs = grad.raw();
    let mut gx = vec![T::zero(); self.size()];
    let mut gf = vec![T::zero(); filter.size()];
    for n in 0..batch {
      for oc in 0..o {
        for oy in 0..oh {
          for ox in 0..ow {
            let g = gs[((n * o + oc) * oh + oy) * ow + ox];
            for ic in 0..c {
              for ky in 0..kh {
                let iy = (oy * params.stride[0] + ky * params.dilation[0]) as isize - params.pad[0] as isize;
                if iy < 0 || iy >= h as isize { continue }
                for kx in 0..kw {
                  let ix = (ox * params.stride[1] + kx * params.dilation[1]) as isize - params.pad[1] as isize;
                  if ix < 0 || ix >= w as isize { continue }
                  let xi = ((n * c + ic) * h + iy as usize) * w + ix as usize;
                  let fi = ((oc * c + ic) * kh + ky) * kw + kx;
                  gx[xi] += g * fs[fi];
                  gf[fi] += g * xs[xi];
                }
              }
            }
          }
        }
      }
    }
    Ok((Self::new(&input, gx), Self::new(&fdims, gf)))
  }

  /// Max pooling over the two trailing dimensions of an `[n, c, h, w]` tensor.
  /// Also returns, for every output element, the linear index of the input it was taken from.

  pub fn max_pool2d(&self, params: &Pool2dParams) -> Result<(Self, Vec<usize>)> {
    let [n, c, h, w] = dims4(self, "pooling input")?;
    let oh = output_extent(h, params.pad[0], params.kernel[0], params.stride[0]);
    let ow = output_extent(w, params.pad[1], params.kernel[1], params.stride[1]);
    let (oh, ow) = match (oh, ow) {
      (Some(oh), Some(ow)) => (oh, ow),
      _ => return Err(Error::shape(format!("pooling window {params:?} does not fit input {:?}", self.dims()))),
    };
    let xs = self.raw();
    let mut out = Vec::with_capacity(n * c * oh * ow);
    let mut argmax = Vec::with_capacity(n * c * oh * ow);
    for plane in 0..n * c {
      for oy in 0..oh {
        for ox in 0..ow {
          let mut best: Option<(T, usize)> = None;
          for ky in 0..params.kernel[0] {
            let iy = (oy * params.stride[0] + ky) as isize - params.pad[0] as isize;
            if iy < 0 || iy >= h as isize { continue }
            for kx in 0..params.kernel[1] {
              let ix = (ox * params.stride[1] + kx) as isize - params.pad[1] as isize;
              if ix < 0 || ix >= w as isize { continue }
              let idx = (plane * h + iy as usize) * w + ix as usize;
              if best.map_or(true, |(value, _)| xs[idx] > value ) {
                best = Some((xs[idx], idx));
              }
            }
          }
          // A window lying entirely in the padding contributes zero
          let (value, idx) = best.unwrap_or((T::zero(), usize::MAX));
          out.push(value);
          argmax.push(idx);
        }
      }
    }
    Ok((Self::new(&[n, c, oh, ow], out), argmax))
  }

  /// Route a pooling gradient back to the input elements recorded in `argmax`.

  pub fn max_pool2d_backward(input_dims: &[usize], argmax: &[usize], grad: &Self) -> Result<Self> {
    if argmax.len() != grad.size() {
      return Err(Error::shape(format!("gradient {:?} doesn't match pooling output", grad.dims())))
    }
    let mut gx = vec![T::zero(); input_dims.iter().product()];
    for (&idx, &g) in argmax.iter().zip(grad.raw().iter()) {
      if let Some(slot) = gx.get_mut(idx) {
        *slot += g;
      }
    }
    Ok(Self::new(input_dims, gx))
  }
}
