use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  variable::{ Graph, Variable },
  layer::{ self, Config, Layer, LayerOpts },
};


/// Collapse every dimension after the leading one.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Flatten {
  #[serde(default)]
  pub name: String,
}

impl Config for Flatten {
  fn validate(&self) -> Result<()> {
    Ok(())
  }

  fn apply_defaults(&self) -> Self {
    Self { name: layer::layer_name(&self.name, "flatten") }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, _opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    let config = self.apply_defaults();
    Ok(Box::new(Reshaping { name: config.name, to: None, graph: graph.id() }))
  }
}


/// Reshape everything after the leading dimension to `to`.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reshape {
  pub to: Vec<usize>,
  #[serde(default)]
  pub name: String,
}

impl Config for Reshape {
  fn validate(&self) -> Result<()> {
    if self.to.is_empty() || self.to.contains(&0) {
      return Err(Error::config(format!("reshape layer {:?} needs a non-empty target without zeros, got {:?}", self.name, self.to)))
    }
    Ok(())
  }

  fn apply_defaults(&self) -> Self {
    Self { name: layer::layer_name(&self.name, "reshape"), ..self.clone() }
  }

  fn compile<T: Real>(&self, graph: &Graph<T>, _opts: &LayerOpts<T>) -> Result<Box<dyn Layer<T>>> {
    let config = self.apply_defaults();
    Ok(Box::new(Reshaping { name: config.name, to: Some(config.to), graph: graph.id() }))
  }
}


/// Compiled [Flatten] or [Reshape] layer. Keeps the leading dimension.

#[derive(Debug, Clone)]
pub struct Reshaping {
  name: String,
  to: Option<Vec<usize>>,
  graph: usize,
}

impl<T: Real> Layer<T> for Reshaping {
  fn kind(&self) -> &'static str {
    if self.to.is_some() { "reshape" } else { "flatten" }
  }

  fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    let dims = x.dims();
    let out = match &self.to {
      None => {
        if dims.len() < 2 {
          return Err(Error::compile(format!("cannot flatten {dims:?}, need at least two dimensions")))
        }
        x.reshape(&[dims[0], dims[1..].iter().product()])?
      },
      Some(to) => {
        let batch = dims.first().copied().unwrap_or(1);
        let target: Vec<usize> = std::iter::once(batch).chain(to.iter().copied()).collect();
        if target.iter().product::<usize>() != x.tensor().size() {
          return Err(Error::compile(format!("cannot reshape {dims:?} into {target:?}")))
        }
        x.reshape(&target)?
      },
    };
    debug!("{} {:?} -> {:?}", self.name, dims, out.dims());
    Ok(out)
  }

  fn graph_id(&self) -> usize {
    self.graph
  }
}
