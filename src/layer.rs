//! Declarative layer configs and the layers they compile into.
//!
//! A config is validated and filled with defaults when it is added to a
//! [Chain]. Compiling it into a [Graph] yields a [Layer] that owns that
//! graph's parameter nodes and maps an input node to an output node.

use std::fmt::Debug;

use serde::{Serialize, Deserialize};

mod activation;
mod chain;
mod conv2d;
mod dropout;
mod fc;
mod pooling;
mod reshape;

pub use activation::Activation;
pub use chain::{ Chain, ChainOpts, CompiledChain };
pub use conv2d::{ Conv2D, Convolution };
pub use dropout::{ Dropout, DropoutLayer };
pub use fc::{ FC, FullyConnected };
pub use pooling::{ MaxPooling2D, MaxPooling };
pub use reshape::{ Flatten, Reshape, Reshaping };

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
  variable::{ Graph, Variable },
};


/// Options a layer is compiled with.
///
/// Layers consult only the options they understand: parameterized
/// layers honor `shared`, layers whose forward pass differs across a
/// batch honor `batched`, dropout honors `training`.

#[derive(Debug, Clone, Copy)]
pub struct LayerOpts<'a, T: Real> {
  /// Same-position layer of an already compiled chain to copy parameter values from.
  pub shared: Option<&'a dyn Layer<T>>,
  /// Inputs carry a leading batch dimension larger than one.
  pub batched: bool,
  /// The graph is used for training.
  pub training: bool,
}

impl<'a, T: Real> Default for LayerOpts<'a, T> {
  fn default() -> Self {
    Self { shared: None, batched: false, training: false }
  }
}


/// A layer realized inside one specific [Graph].

pub trait Layer<T: Real>: Debug {
  fn kind(&self) -> &'static str;

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>>;

  /// Parameter nodes, in a fixed order.
  fn learnables(&self) -> Vec<Variable<T>> { vec![] }

  fn graph_id(&self) -> usize;
}


/// Static description of a layer.

pub trait Config: Clone + Debug {
  fn validate(&self) -> Result<()>;

  /// Copy of this config with unset optional fields filled in. Idempotent.
  fn apply_defaults(&self) -> Self;

  fn compile<T: Real>(&self, graph: &Graph<T>, opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>>;
}


/// Parameter initializer.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Init {
  GlorotNormal { gain: f64 },
  GlorotUniform { gain: f64 },
  Zeros,
  Constant(f64),
}

impl Init {
  pub fn glorot_normal() -> Self {
    Self::GlorotNormal { gain: 1.0 }
  }

  pub fn glorot_uniform() -> Self {
    Self::GlorotUniform { gain: 1.0 }
  }

  pub fn tensor<T: Real>(&self, dims: &[usize]) -> Tensor<T> {
    match *self {
      Self::GlorotNormal { gain } => Tensor::glorot_normal(dims, T::cast(gain)),
      Self::GlorotUniform { gain } => Tensor::glorot_uniform(dims, T::cast(gain)),
      Self::Zeros => Tensor::zeros(dims),
      Self::Constant(value) => Tensor::fill(dims, T::cast(value)),
    }
  }
}


/// Any of the supported layer configs.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerConfig {
  FC(FC),
  Conv2D(Conv2D),
  MaxPooling2D(MaxPooling2D),
  Flatten(Flatten),
  Reshape(Reshape),
  Dropout(Dropout),
  Activation(Activation),
}

impl LayerConfig {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::FC(_) => "fc",
      Self::Conv2D(_) => "conv2d",
      Self::MaxPooling2D(_) => "maxpooling2d",
      Self::Flatten(_) => "flatten",
      Self::Reshape(_) => "reshape",
      Self::Dropout(_) => "dropout",
      Self::Activation(_) => "activation",
    }
  }
}

impl Config for LayerConfig {
  fn validate(&self) -> Result<()> {
    match self {
      Self::FC(config) => config.validate(),
      Self::Conv2D(config) => config.validate(),
      Self::MaxPooling2D(config) => config.validate(),
      Self::Flatten(config) => config.validate(),
      Self::Reshape(config) => config.validate(),
      Self::Dropout(config) => config.validate(),
      Self::Activation(config) => config.validate(),
    }
  }

  fn apply_defaults(&self) -> Self {
    match self {
      Self::FC(config) => Self::FC(config.apply_defaults()),
      Self::Conv2D(config) => Self::Conv2D(config.apply_defaults()),
      Self::MaxPooling2D(config) => Self::MaxPooling2D(config.apply_defaults()),
      Self::Flatten(config) => Self::Flatten(config.apply_defaults()),
      Self::Reshape(config) => Self::Reshape(config.apply_defaults()),
      Self::Dropout(config) => Self::Dropout(config.apply_defaults()),
      Self::Activation(config) => Self::Activation(config.apply_defaults()),
    }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    if let Some(shared) = opts.shared {
      if shared.kind() != self.kind() {
        return Err(Error::compile(format!("cannot share a {} layer with a {} layer", self.kind(), shared.kind())))
      }
    }
    match self {
      Self::FC(config) => config.compile(graph, opts),
      Self::Conv2D(config) => config.compile(graph, opts),
      Self::MaxPooling2D(config) => config.compile(graph, opts),
      Self::Flatten(config) => config.compile(graph, opts),
      Self::Reshape(config) => config.compile(graph, opts),
      Self::Dropout(config) => config.compile(graph, opts),
      Self::Activation(config) => config.compile(graph, opts),
    }
  }
}

macro_rules! impl_from_config {
  ($($variant:ident),*) => {
    $(
      impl From<$variant> for LayerConfig {
        fn from(config: $variant) -> Self {
          Self::$variant(config)
        }
      }
    )*
  };
}

impl_from_config!(FC, Conv2D, MaxPooling2D, Flatten, Reshape, Dropout, Activation);


/// Create a parameter node, either freshly initialized or copied from
/// the same slot of the shared layer.

pub(crate) fn learnable<T: Real>(
  graph: &Graph<T>,
  opts: &LayerOpts<T>,
  slot: usize,
  name: &str,
  dims: &[usize],
  init: Init,
) -> Result<Variable<T>> {
  let value = match opts.shared {
    Some(shared) => {
      let source = shared.learnables().into_iter().nth(slot)
        .ok_or_else(|| Error::compile(format!("shared {} layer has no learnable for {name}", shared.kind())) )?;
      if source.dims() != dims {
        return Err(Error::compile(format!("cannot share {:?} learnable as {name} of {dims:?}", source.dims())))
      }
      source.tensor().detach()
    },
    None => init.tensor(dims),
  };
  Ok(graph.learnable(name, value))
}

pub(crate) fn layer_name(name: &str, kind: &str) -> String {
  if name.is_empty() { kind.to_string() } else { name.to_string() }
}
