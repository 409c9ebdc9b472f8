use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Pool2dParams,
  variable::{ Graph, Variable },
  layer::{ self, Config, Layer, LayerOpts },
};


/// 2-D max pooling over `[batch, channels, rows, cols]` inputs.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaxPooling2D {
  #[serde(default)]
  pub kernel: Option<[usize; 2]>,
  #[serde(default)]
  pub pad: Option<[usize; 2]>,
  #[serde(default)]
  pub stride: Option<[usize; 2]>,
  #[serde(default)]
  pub name: String,
}

impl MaxPooling2D {
  pub fn params(&self) -> Pool2dParams {
    let defaults = Pool2dParams::default();
    Pool2dParams {
      kernel: self.kernel.unwrap_or(defaults.kernel),
      pad: self.pad.unwrap_or(defaults.pad),
      stride: self.stride.unwrap_or(defaults.stride),
    }
  }
}

impl Config for MaxPooling2D {
  fn validate(&self) -> Result<()> {
    for (field, value) in [("kernel", self.kernel), ("stride", self.stride)] {
      if value.map_or(false, |v| v.contains(&0)) {
        return Err(Error::config(format!("pooling layer {:?} has a zero {field}", self.name)))
      }
    }
    Ok(())
  }

  fn apply_defaults(&self) -> Self {
    let params = self.params();
    Self {
      kernel: Some(params.kernel),
      pad: Some(params.pad),
      stride: Some(params.stride),
      name: layer::layer_name(&self.name, "maxpooling2d"),
    }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, _opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    Ok(Box::new(MaxPooling { config: self.apply_defaults(), graph: graph.id() }))
  }
}


/// Compiled [MaxPooling2D] layer.

#[derive(Debug, Clone)]
pub struct MaxPooling {
  config: MaxPooling2D,
  graph: usize,
}

impl MaxPooling {
  pub fn config(&self) -> &MaxPooling2D {
    &self.config
  }
}

impl<T: Real> Layer<T> for MaxPooling {
  fn kind(&self) -> &'static str {
    "maxpooling2d"
  }

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    let out = x.max_pool2d(self.config.params())?;
    debug!("maxpooling2d {} {:?} -> {:?}", self.config.name, x.dims(), out.dims());
    Ok(out)
  }

  fn graph_id(&self) -> usize {
    self.graph
  }
}
