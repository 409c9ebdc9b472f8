use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Conv2dParams,
  variable::{ Graph, Variable },
  layer::{ self, Activation, Config, Init, Layer, LayerOpts },
};


/// 2-D convolution config. Filters have shape `[output, input, height, width]`
/// and are applied to `[batch, input, rows, cols]` inputs.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Conv2D {
  pub input: usize,
  pub output: usize,
  pub height: usize,
  pub width: usize,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub activation: Option<Activation>,
  #[serde(default)]
  pub pad: Option<[usize; 2]>,
  #[serde(default)]
  pub stride: Option<[usize; 2]>,
  #[serde(default)]
  pub dilation: Option<[usize; 2]>,
  #[serde(default)]
  pub init: Option<Init>,
}

impl Conv2D {
  pub fn params(&self) -> Conv2dParams {
    let defaults = Conv2dParams::default();
    Conv2dParams {
      pad: self.pad.unwrap_or(defaults.pad),
      stride: self.stride.unwrap_or(defaults.stride),
      dilation: self.dilation.unwrap_or(defaults.dilation),
    }
  }
}

impl Config for Conv2D {
  fn validate(&self) -> Result<()> {
    let required = [
      ("input", self.input),
      ("output", self.output),
      ("height", self.height),
      ("width", self.width),
    ];
    for (field, value) in required {
      if value == 0 {
        return Err(Error::config(format!("conv2d layer {:?} requires a non-zero {field}", self.name)))
      }
    }
    for (field, value) in [("stride", self.stride), ("dilation", self.dilation)] {
      if value.map_or(false, |v| v.contains(&0)) {
        return Err(Error::config(format!("conv2d layer {:?} has a zero {field}", self.name)))
      }
    }
    self.activation.map_or(Ok(()), |activation| activation.validate() )
  }

  fn apply_defaults(&self) -> Self {
    let params = self.params();
    Self {
      name: layer::layer_name(&self.name, "conv2d"),
      activation: self.activation.or(Some(Activation::ReLU)),
      pad: Some(params.pad),
      stride: Some(params.stride),
      dilation: Some(params.dilation),
      init: self.init.or(Some(Init::glorot_uniform())),
      ..self.clone()
    }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    let config = self.apply_defaults();
    let filter = layer::learnable(
      graph, opts, 0,
      &format!("{}_filter", config.name),
      &[config.output, config.input, config.height, config.width],
      config.init.unwrap_or_else(Init::glorot_uniform),
    )?;
    Ok(Box::new(Convolution { config, filter, graph: graph.id() }))
  }
}


/// Compiled [Conv2D] layer.

#[derive(Debug, Clone)]
pub struct Convolution<T: Real> {
  config: Conv2D,
  filter: Variable<T>,
  graph: usize,
}

impl<T: Real> Convolution<T> {
  pub fn config(&self) -> &Conv2D {
    &self.config
  }

  pub fn filter(&self) -> &Variable<T> {
    &self.filter
  }
}

impl<T: Real> Layer<T> for Convolution<T> {
  fn kind(&self) -> &'static str {
    "conv2d"
  }

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    let conv = x.conv2d(&self.filter, self.config.params())?;
    let out = self.config.activation.unwrap_or_default().fwd(&conv)?;
    debug!("conv2d {} {:?} -> {:?}", self.config.name, x.dims(), out.dims());
    Ok(out)
  }

  fn learnables(&self) -> Vec<Variable<T>> {
    vec![self.filter.clone()]
  }

  fn graph_id(&self) -> usize {
    self.graph
  }
}
