use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  shape::Shape,
  variable::{ Graph, Variable },
  layer::{ Config, Layer, LayerOpts },
};


/// Activation function.
///
/// Can be set on parameterized layers or added to a chain on its own.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Activation {
  Sigmoid,
  Tanh,
  ReLU,
  LeakyReLU { alpha: f64 },
  /// Normalized exponential along `axis`. Inputs are not shifted by their
  /// maximum first, so large values overflow.
  Softmax { axis: Option<usize> },
  Linear,
}

impl Default for Activation {
  fn default() -> Self {
    Self::ReLU
  }
}

impl Activation {
  pub fn leaky_relu() -> Self {
    Self::LeakyReLU { alpha: 0.01 }
  }

  pub fn softmax() -> Self {
    Self::Softmax { axis: None }
  }

  pub fn fwd<T: Real>(&self, x: &Variable<T>) -> Result<Variable<T>> {
    match *self {
      Self::Sigmoid => x.sigmoid(),
      Self::Tanh => x.tanh(),
      Self::ReLU => x.relu(),
      Self::LeakyReLU { alpha } => x.leaky_relu(T::cast(alpha)),
      Self::Softmax { axis } => softmax(x, axis),
      Self::Linear => Ok(x.clone()),
    }
  }
}

fn softmax<T: Real>(x: &Variable<T>, axis: Option<usize>) -> Result<Variable<T>> {
  let dims = x.dims().to_vec();
  let shape = Shape::new(&dims).squeeze_leading();
  let default_axis = if shape.is_vector() || shape.is_col_vec() { 0 } else { shape.rank().saturating_sub(1) };
  let axis = axis.unwrap_or(default_axis);
  if axis >= shape.rank() {
    return Err(Error::compile(format!("cannot perform softmax on axis {axis} of {shape}")))
  }
  let exp = x.reshape(&shape.dims)?.exp()?;
  let sum = exp.sum(axis)?;
  let sum = if sum.dims().is_empty() {
    sum
  } else {
    let kept = Shape::new(sum.dims()).unsqueeze(axis);
    sum.reshape(&kept.dims)?
  };
  exp.broadcast_div(&sum)?.reshape(&dims)
}

impl Config for Activation {
  fn validate(&self) -> Result<()> {
    match *self {
      Self::LeakyReLU { alpha } if !alpha.is_finite() => {
        Err(Error::config(format!("leaky relu slope must be finite, got {alpha}")))
      },
      _ => Ok(()),
    }
  }

  fn apply_defaults(&self) -> Self {
    *self
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, _opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    Ok(Box::new(ActivationLayer { activation: *self, graph: graph.id() }))
  }
}


#[derive(Debug, Clone)]
struct ActivationLayer {
  activation: Activation,
  graph: usize,
}

impl<T: Real> Layer<T> for ActivationLayer {
  fn kind(&self) -> &'static str {
    "activation"
  }

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    let out = self.activation.fwd(x)?;
    debug!("{:?} {:?} -> {:?}", self.activation, x.dims(), out.dims());
    Ok(out)
  }

  fn graph_id(&self) -> usize {
    self.graph
  }
}
