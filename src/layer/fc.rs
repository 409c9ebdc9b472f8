use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  variable::{ Graph, Variable },
  layer::{ self, Activation, Config, Init, Layer, LayerOpts },
};


/// Fully connected layer config.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FC {
  pub input: usize,
  pub output: usize,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub activation: Option<Activation>,
  #[serde(default)]
  pub init: Option<Init>,
  #[serde(default)]
  pub no_bias: bool,
  #[serde(default)]
  pub bias_init: Option<Init>,
}

impl Config for FC {
  fn validate(&self) -> Result<()> {
    if self.input == 0 {
      return Err(Error::config(format!("fc layer {:?} requires an input size", self.name)))
    }
    if self.output == 0 {
      return Err(Error::config(format!("fc layer {:?} requires an output size", self.name)))
    }
    self.activation.map_or(Ok(()), |activation| activation.validate() )
  }

  fn apply_defaults(&self) -> Self {
    Self {
      name: layer::layer_name(&self.name, "fc"),
      activation: self.activation.or(Some(Activation::ReLU)),
      init: self.init.or(Some(Init::glorot_normal())),
      bias_init: self.bias_init.or(Some(Init::Zeros)),
      ..self.clone()
    }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    let config = self.apply_defaults();
    let weights = layer::learnable(
      graph, opts, 0,
      &format!("{}_weights", config.name),
      &[config.input, config.output],
      config.init.unwrap_or_else(Init::glorot_normal),
    )?;
    let bias = if config.no_bias { None } else {
      Some(layer::learnable(
        graph, opts, 1,
        &format!("{}_bias", config.name),
        &[1, config.output],
        config.bias_init.unwrap_or(Init::Zeros),
      )?)
    };
    Ok(Box::new(FullyConnected {
      config,
      weights,
      bias,
      batched: opts.batched,
      graph: graph.id(),
    }))
  }
}


/// Compiled [FC] layer.

#[derive(Debug, Clone)]
pub struct FullyConnected<T: Real> {
  config: FC,
  weights: Variable<T>,
  bias: Option<Variable<T>>,
  batched: bool,
  graph: usize,
}

impl<T: Real> FullyConnected<T> {
  pub fn config(&self) -> &FC {
    &self.config
  }

  pub fn weights(&self) -> &Variable<T> {
    &self.weights
  }

  pub fn bias(&self) -> Option<&Variable<T>> {
    self.bias.as_ref()
  }
}

impl<T: Real> Layer<T> for FullyConnected<T> {
  fn kind(&self) -> &'static str {
    "fc"
  }

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    let x = match *x.dims() {
      [n] => x.reshape(&[1, n])?,
      _ => x.clone(),
    };
    let mut out = x.mm(&self.weights)?;
    if let Some(bias) = &self.bias {
      out = if self.batched { out.broadcast_add(bias)? } else { out.add(bias)? };
    }
    let out = self.config.activation.unwrap_or_default().fwd(&out)?;
    debug!("fc {} {:?} -> {:?}", self.config.name, x.dims(), out.dims());
    Ok(out)
  }

  fn learnables(&self) -> Vec<Variable<T>> {
    let mut learnables = vec![self.weights.clone()];
    learnables.extend(self.bias.clone());
    learnables
  }

  fn graph_id(&self) -> usize {
    self.graph
  }
}
