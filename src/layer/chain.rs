use log::{ debug, warn };
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  variable::{ Graph, Variable },
  layer::{ Config, Layer, LayerConfig, LayerOpts },
};


/// Ordered list of layer configs, in forward pass order.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Chain {
  layers: Vec<LayerConfig>,
}

impl Chain {
  pub fn new() -> Self {
    Self::default()
  }

  /// Validate `config`, fill in its defaults and append it.

  pub fn add(&mut self, config: impl Into<LayerConfig>) -> Result<&mut Self> {
    let config = config.into();
    config.validate()?;
    self.layers.push(config.apply_defaults());
    Ok(self)
  }

  /// Add several configs. Nothing is appended if any of them is invalid.

  pub fn add_all(&mut self, configs: impl IntoIterator<Item = LayerConfig>) -> Result<&mut Self> {
    let configs = configs.into_iter()
      .map(|config| config.validate().map(|_| config.apply_defaults() ) )
      .collect::<Result<Vec<_>>>()?;
    self.layers.extend(configs);
    Ok(self)
  }

  pub fn layers(&self) -> &[LayerConfig] {
    &self.layers
  }

  pub fn len(&self) -> usize {
    self.layers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }

  /// Realize every layer inside `graph`.

  pub fn compile<'a, T: Real>(&self, graph: &Graph<T>, opts: &ChainOpts<'a, T>) -> Result<CompiledChain<T>> {
    if self.is_empty() {
      warn!("Compiling empty chain into {}", graph.name());
    }
    if let Some(shared) = opts.shared {
      if shared.len() != self.len() {
        return Err(Error::compile(format!("cannot share learnables of a {} layer chain with a {} layer chain", shared.len(), self.len())))
      }
    }
    let layers = self.layers.iter()
      .enumerate()
      .map(|(i, config)| {
        // Deserialized chains skip `add`
        config.validate()?;
        let layer_opts = LayerOpts {
          shared: opts.shared.map(|chain| chain.layers[i].as_ref() ),
          batched: opts.batched,
          training: opts.training,
        };
        config.compile(graph, &layer_opts)
      })
      .collect::<Result<Vec<_>>>()?;
    debug!("Compiled {} layers into {}", layers.len(), graph.name());
    Ok(CompiledChain { layers })
  }
}

impl FromIterator<LayerConfig> for Chain {
  fn from_iter<I: IntoIterator<Item = LayerConfig>>(iter: I) -> Self {
    Self { layers: iter.into_iter().map(|config| config.apply_defaults() ).collect() }
  }
}


/// Options a [Chain] is compiled with. Forwarded to every layer.

#[derive(Debug, Clone, Copy)]
pub struct ChainOpts<'a, T: Real> {
  /// Chain to copy learnable values from, position by position.
  pub shared: Option<&'a CompiledChain<T>>,
  pub batched: bool,
  pub training: bool,
}

impl<'a, T: Real> Default for ChainOpts<'a, T> {
  fn default() -> Self {
    Self { shared: None, batched: false, training: false }
  }
}


/// A [Chain] realized inside one graph.

#[derive(Debug)]
pub struct CompiledChain<T: Real> {
  layers: Vec<Box<dyn Layer<T>>>,
}

impl<T: Real> CompiledChain<T> {
  /// Feed `x` through every layer, stopping at the first failure.

  pub fn fwd(&self, x: &Variable<T>) -> Result<Variable<T>> {
    self.layers.iter().try_fold(x.clone(), |x, layer| layer.fwd(&x) )
  }

  /// Learnables of all layers, concatenated in chain order.
  ///
  /// Positions in this list identify the same parameter across every
  /// graph compiled from one chain.

  pub fn learnables(&self) -> Vec<Variable<T>> {
    self.layers.iter().flat_map(|layer| layer.learnables() ).collect()
  }

  pub fn layers(&self) -> &[Box<dyn Layer<T>>] {
    &self.layers
  }

  pub fn len(&self) -> usize {
    self.layers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }
}
