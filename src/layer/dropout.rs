use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  variable::{ Graph, Variable },
  layer::{ self, Config, Layer, LayerOpts },
};


/// Randomly zero activations while training.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dropout {
  /// Chance of dropping each element.
  #[serde(default)]
  pub probability: Option<f64>,
  #[serde(default)]
  pub name: String,
}

impl Config for Dropout {
  fn validate(&self) -> Result<()> {
    match self.probability {
      Some(p) if !(0.0..=1.0).contains(&p) => {
        Err(Error::config(format!("dropout probability must lie in [0, 1], got {p}")))
      },
      _ => Ok(()),
    }
  }

  fn apply_defaults(&self) -> Self {
    Self {
      probability: self.probability.or(Some(0.6)),
      name: layer::layer_name(&self.name, "dropout"),
    }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    Ok(Box::new(DropoutLayer {
      config: self.apply_defaults(),
      active: opts.training,
      graph: graph.id(),
    }))
  }
}


/// Compiled [Dropout] layer. The identity outside of training graphs.

#[derive(Debug, Clone)]
pub struct DropoutLayer {
  config: Dropout,
  active: bool,
  graph: usize,
}

impl DropoutLayer {
  pub fn is_active(&self) -> bool {
    self.active
  }
}

impl<T: Real> Layer<T> for DropoutLayer {
  fn kind(&self) -> &'static str {
    "dropout"
  }

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    if !self.active { return Ok(x.clone()) }
    let probability = self.config.probability.unwrap_or(0.6);
    debug!("{} dropping with p={probability} on {:?}", self.config.name, x.dims());
    x.dropout(T::cast(probability))
  }

  fn graph_id(&self) -> usize {
    self.graph
  }
}
