use std::fmt::Debug;

use crate::{
  error::Result,
  scalar::Real,
  variable::{ Graph, Variable },
  model::{ Inputs, InputNodes },
};


/// Loss of a model, reduced to a scalar.
///
/// A loss may declare extra [Inputs] of its own. They get compiled into
/// the training graphs next to the model's inputs and are handed back to
/// [compute](Loss::compute) as nodes.

pub trait Loss<T: Real>: Debug {
  fn compute(&self, graph: &Graph<T>, y_hat: &Variable<T>, y: &Variable<T>, inputs: &InputNodes<T>) -> Result<Variable<T>>;

  fn inputs(&self) -> Inputs {
    Inputs::default()
  }
}


/// Mean squared error.

#[derive(Debug, Clone, Copy, Default)]
pub struct MSE;

impl<T: Real> Loss<T> for MSE {
  fn compute(&self, _graph: &Graph<T>, y_hat: &Variable<T>, y: &Variable<T>, _inputs: &InputNodes<T>) -> Result<Variable<T>> {
    y_hat.sub(y)?.square()?.mean()
  }
}


/// Cross entropy of predicted probabilities `y_hat` against targets `y`.

#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl<T: Real> Loss<T> for CrossEntropy {
  fn compute(&self, _graph: &Graph<T>, y_hat: &Variable<T>, y: &Variable<T>, _inputs: &InputNodes<T>) -> Result<Variable<T>> {
    y.mul(&y_hat.log()?)?.neg()?.mean()
  }
}


/// Smooth approximation of the Huber loss.
///
/// Quadratic for errors small compared to `delta`, linear for large
/// ones. A larger `delta` gives a steeper loss.

#[derive(Debug, Clone, Copy)]
pub struct PseudoHuber {
  pub delta: f64,
}

impl PseudoHuber {
  pub fn new(delta: f64) -> Self {
    Self { delta }
  }
}

impl Default for PseudoHuber {
  fn default() -> Self {
    Self { delta: 1.0 }
  }
}

impl<T: Real> Loss<T> for PseudoHuber {
  fn compute(&self, graph: &Graph<T>, y_hat: &Variable<T>, y: &Variable<T>, _inputs: &InputNodes<T>) -> Result<Variable<T>> {
    let delta = T::cast(self.delta);
    let one = graph.scalar(T::one());
    y_hat.sub(y)?
      .broadcast_div(&graph.scalar(delta))?
      .square()?
      .broadcast_add(&one)?
      .sqrt()?
      .broadcast_sub(&one)?
      .broadcast_mul(&graph.scalar(delta * delta))?
      .mean()
  }
}


/// Negated mean of `y_hat * y`, for targets that weight raw outputs.

#[derive(Debug, Clone, Copy, Default)]
pub struct PseudoCrossEntropy;

impl<T: Real> Loss<T> for PseudoCrossEntropy {
  fn compute(&self, _graph: &Graph<T>, y_hat: &Variable<T>, y: &Variable<T>, _inputs: &InputNodes<T>) -> Result<Variable<T>> {
    y_hat.mul(y)?.mean()?.neg()
  }
}
