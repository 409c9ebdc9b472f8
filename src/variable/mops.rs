use std::cell::RefCell;

use rand::Rng;

use crate::{
  error::{ Error, Result },
  tensor::{ Tensor, Conv2dParams, Pool2dParams },
  variable::{ BinaryOp, UnaryOp },
  scalar::Real,
};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithKind {
  Add,
  Sub,
  Mul,
  Div,
}


/// Elementwise arithmetic. Strict variants require identical shapes,
/// broadcasting variants follow numpy rules.

#[derive(Debug, Clone, Copy)]
pub struct Arith {
  kind: ArithKind,
  broadcast: bool,
}

impl Arith {
  pub fn strict(kind: ArithKind) -> Self {
    Self { kind, broadcast: false }
  }

  pub fn broadcast(kind: ArithKind) -> Self {
    Self { kind, broadcast: true }
  }
}

impl<T: Real> BinaryOp<T> for Arith {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>> {
    if !self.broadcast && lhs.shape() != rhs.shape() {
      return Err(Error::shape(format!("{:?} expects equal shapes, got {} and {}", self.kind, lhs.shape(), rhs.shape())))
    }
    match self.kind {
      ArithKind::Add => lhs.add(rhs),
      ArithKind::Sub => lhs.sub(rhs),
      ArithKind::Mul => lhs.mul(rhs),
      ArithKind::Div => lhs.div(rhs),
    }
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    let (l, r) = match self.kind {
      ArithKind::Add => (grad.clone(), grad.clone()),
      ArithKind::Sub => (grad.clone(), grad.map(|g| -g )),
      ArithKind::Mul => (grad.mul(rhs)?, grad.mul(lhs)?),
      ArithKind::Div => (grad.div(rhs)?, grad.mul(out)?.div(rhs)?.map(|g| -g )),
    };
    Ok((l.sum_to(lhs.dims())?, r.sum_to(rhs.dims())?))
  }
}


#[derive(Debug, Clone, Copy)]
pub struct MatMul;

impl<T: Real> BinaryOp<T> for MatMul {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>> {
    lhs.mm(rhs)
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    Ok((grad.mm(&rhs.transpose()?)?, lhs.transpose()?.mm(grad)?))
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Neg;

impl<T: Real> UnaryOp<T> for Neg {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| -a ))
  }

  fn derive(&self, _lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(grad.map(|g| -g ))
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Exp;

impl<T: Real> UnaryOp<T> for Exp {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| a.exp() ))
  }

  fn derive(&self, _lhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    grad.mul(out)
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Log;

impl<T: Real> UnaryOp<T> for Log {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| a.ln() ))
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    grad.div(lhs)
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Sqrt;

impl<T: Real> UnaryOp<T> for Sqrt {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| a.sqrt() ))
  }

  fn derive(&self, _lhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    let half = T::cast(0.5);
    grad.zip(out, |g, o| g * half / o )
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Square;

impl<T: Real> UnaryOp<T> for Square {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| a * a ))
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    let two = T::cast(2.0);
    grad.zip(lhs, |g, l| g * two * l )
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Sigmoid;

impl<T: Real> UnaryOp<T> for Sigmoid {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| T::one() / (T::one() + (-a).exp()) ))
  }

  fn derive(&self, _lhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    grad.zip(out, |g, o| g * o * (T::one() - o) )
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Tanh;

impl<T: Real> UnaryOp<T> for Tanh {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| a.tanh() ))
  }

  fn derive(&self, _lhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    grad.zip(out, |g, o| g * (T::one() - o * o) )
  }
}


/// Rectifier with slope `alpha` for negative inputs. Plain ReLU has `alpha == 0`.

#[derive(Debug, Clone, Copy)]
pub struct LeakyReLU<T: Real> {
  pub alpha: T,
}

impl<T: Real> UnaryOp<T> for LeakyReLU<T> {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.map(|a| if a > T::zero() { a } else { a * self.alpha } ))
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    grad.zip(lhs, |g, l| if l > T::zero() { g } else { g * self.alpha } )
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Sum {
  pub axis: usize,
}

impl<T: Real> UnaryOp<T> for Sum {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    lhs.sum_over(self.axis)
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    let kept = grad.shape().unsqueeze(self.axis);
    grad.reshape(&kept.dims)?.broadcast_to(lhs.dims())
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Mean;

impl<T: Real> UnaryOp<T> for Mean {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(lhs.mean_all())
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    let n = T::cast(lhs.size().max(1) as f64);
    let g = grad.get(0).unwrap_or_else(T::zero);
    Ok(Tensor::fill(lhs.dims(), g / n))
  }
}


#[derive(Debug, Clone)]
pub struct Reshape {
  pub dims: Vec<usize>,
}

impl<T: Real> UnaryOp<T> for Reshape {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    lhs.detach().reshape(&self.dims)
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    grad.detach().reshape(lhs.dims())
  }
}


#[derive(Debug, Clone, Copy)]
pub struct Conv2d {
  pub params: Conv2dParams,
}

impl<T: Real> BinaryOp<T> for Conv2d {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>> {
    lhs.conv2d(rhs, &self.params)
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    lhs.conv2d_backward(rhs, grad, &self.params)
  }
}


/// Max pooling. Remembers where each maximum came from during the last run.

#[derive(Debug)]
pub struct MaxPool2d {
  params: Pool2dParams,
  argmax: RefCell<Vec<usize>>,
}

impl MaxPool2d {
  pub fn new(params: Pool2dParams) -> Self {
    Self { params, argmax: RefCell::new(vec![]) }
  }
}

impl<T: Real> UnaryOp<T> for MaxPool2d {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    let (out, argmax) = lhs.max_pool2d(&self.params)?;
    *self.argmax.borrow_mut() = argmax;
    Ok(out)
  }

  fn derive(&self, lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Tensor::max_pool2d_backward(lhs.dims(), &self.argmax.borrow(), grad)
  }
}


/// Inverted dropout. Draws a new mask on every run.

#[derive(Debug)]
pub struct Dropout<T: Real> {
  probability: T,
  mask: RefCell<Option<Tensor<T>>>,
}

impl<T: Real> Dropout<T> {
  pub fn new(probability: T) -> Self {
    Self { probability, mask: RefCell::new(None) }
  }
}

impl<T: Real> UnaryOp<T> for Dropout<T> {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>> {
    let keep = T::one() - self.probability;
    let mut rng = rand::thread_rng();
    let mask = Tensor::init(lhs.dims(), || {
      if keep > T::zero() && T::cast(rng.gen::<f64>()) < keep { T::one() / keep } else { T::zero() }
    });
    let out = lhs.mul(&mask)?;
    *self.mask.borrow_mut() = Some(mask);
    Ok(out)
  }

  fn derive(&self, _lhs: &Tensor<T>, _out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    match &*self.mask.borrow() {
      Some(mask) => grad.mul(mask),
      None => Err(Error::Execution("dropout derived before it ran".to_string())),
    }
  }
}
