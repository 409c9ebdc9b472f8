//! Sequential models compiled into four graphs.
//!
//! A [Sequential] model turns one [Chain] into a graph for training on
//! single examples, one for training on batches and two matching graphs
//! for prediction. Only [Variant::TrainSingle] owns its learnables; the
//! other variants copy their values from it when they are built and
//! afterwards whenever learnables get synchronized.
//!
//! ```
//! use microseq::{ Tensor, Sequential, CompileOpts, model::Input, layer::{ FC, Activation } };
//!
//! let mut model = Sequential::<f32>::new("regression");
//! model
//!   .add(FC { input: 4, output: 8, activation: Some(Activation::Tanh), ..Default::default() }).unwrap()
//!   .add(FC { input: 8, output: 1, activation: Some(Activation::Linear), ..Default::default() }).unwrap();
//!
//! let x = Input::new("x", &[1, 4]);
//! let y = Input::new("y", &[1, 1]);
//! model.compile(x, y, CompileOpts::default().without_tracker().with_batch_size(16)).unwrap();
//!
//! model.fit_batch(&Tensor::randn(&[16, 4]), &Tensor::zeros(&[16, 1])).unwrap();
//! model.sync_learnables_from(microseq::model::Variant::TrainBatch).unwrap();
//! let prediction = model.predict(&Tensor::randn(&[1, 4])).unwrap();
//! assert_eq!(prediction.dims(), &[1, 1]);
//! ```

use std::fs;
use std::path::Path;

use log::info;
use serde::{Serialize, Deserialize};

mod io;
mod loss;
mod sharing;
mod variant;

pub use io::{ Input, InputNode, InputNodes, Inputs, Values, name_as_batch };
pub use loss::{ Loss, MSE, CrossEntropy, PseudoHuber, PseudoCrossEntropy };
pub use variant::{ Variant, VariantGraph };

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
  variable::{ Graph, Variable },
  optimize::Optimizer,
  layer::{ Chain, LayerConfig },
  track::{ self, SharedTracker, Tracker },
};
use variant::Blueprint;


/// Values a model reports to its tracker.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
  /// Loss of the single example training graph.
  TrainLoss,
  /// Loss of the batch training graph.
  TrainBatchLoss,
}

impl Metric {
  pub const ALL: [Self; 2] = [Self::TrainLoss, Self::TrainBatchLoss];

  pub fn name(&self) -> &'static str {
    match self {
      Self::TrainLoss => "train_loss",
      Self::TrainBatchLoss => "train_batch_loss",
    }
  }

  fn variant(&self) -> Variant {
    match self {
      Self::TrainLoss => Variant::TrainSingle,
      Self::TrainBatchLoss => Variant::TrainBatch,
    }
  }
}


/// When learnable values get copied between variants.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
  /// Only when [Sequential::sync_learnables] and friends are called.
  Manual,
  /// After every [fit](Sequential::fit) and [fit_batch](Sequential::fit_batch),
  /// from the variant that was trained.
  AfterStep,
}

impl Default for SyncPolicy {
  fn default() -> Self {
    Self::Manual
  }
}


#[derive(Debug)]
enum TrackerChoice {
  Default,
  Given(SharedTracker),
  Disabled,
}


/// Options for [Sequential::compile].

#[derive(Debug)]
pub struct CompileOpts<T: Real> {
  loss: Option<Box<dyn Loss<T>>>,
  optimizer: Option<Optimizer<T>>,
  tracker: TrackerChoice,
  batch_size: usize,
  metrics: Vec<Metric>,
  sync: SyncPolicy,
}

impl<T: Real> Default for CompileOpts<T> {
  fn default() -> Self {
    Self {
      loss: None,
      optimizer: None,
      tracker: TrackerChoice::Default,
      batch_size: 32,
      metrics: Metric::ALL.to_vec(),
      sync: SyncPolicy::default(),
    }
  }
}

impl<T: Real> CompileOpts<T> {
  /// Defaults to [MSE].

  pub fn with_loss(mut self, loss: impl Loss<T> + 'static) -> Self {
    self.loss = Some(Box::new(loss));
    self
  }

  /// Defaults to Adam with a learning rate of 0.001.

  pub fn with_optimizer(mut self, optimizer: Optimizer<T>) -> Self {
    self.optimizer = Some(optimizer);
    self
  }

  /// Report metrics to `tracker` instead of a new one.

  pub fn with_tracker(mut self, tracker: SharedTracker) -> Self {
    self.tracker = TrackerChoice::Given(tracker);
    self
  }

  pub fn without_tracker(mut self) -> Self {
    self.tracker = TrackerChoice::Disabled;
    self
  }

  /// Defaults to 32.

  pub fn with_batch_size(mut self, size: usize) -> Self {
    self.batch_size = size;
    self
  }

  pub fn with_metrics(mut self, metrics: &[Metric]) -> Self {
    self.metrics = metrics.to_vec();
    self
  }

  pub fn with_sync(mut self, sync: SyncPolicy) -> Self {
    self.sync = sync;
    self
  }
}


#[derive(Debug)]
struct Compiled<T: Real> {
  x: Inputs,
  y: Input,
  fwd: String,
  loss: Box<dyn Loss<T>>,
  optimizer: Optimizer<T>,
  tracker: Option<SharedTracker>,
  metrics: Vec<Metric>,
  batch_size: usize,
  sync: SyncPolicy,
  train: VariantGraph<T>,
  train_batch: VariantGraph<T>,
  online: VariantGraph<T>,
  online_batch: VariantGraph<T>,
}

impl<T: Real> Compiled<T> {
  fn blueprint<'a>(&'a self, model: &'a str, chain: &'a Chain, batch_size: usize) -> Blueprint<'a, T> {
    Blueprint {
      model,
      chain,
      x: &self.x,
      y: &self.y,
      fwd: &self.fwd,
      loss: self.loss.as_ref(),
      batch_size,
    }
  }

  fn graph(&self, variant: Variant) -> &VariantGraph<T> {
    match variant {
      Variant::TrainSingle => &self.train,
      Variant::TrainBatch => &self.train_batch,
      Variant::OnlineSingle => &self.online,
      Variant::OnlineBatch => &self.online_batch,
    }
  }

  fn track_metrics(&self, model: &str) {
    if let Some(tracker) = &self.tracker {
      let mut tracker = tracker.borrow_mut();
      for metric in &self.metrics {
        if let Some(hook) = self.graph(metric.variant()).loss_hook() {
          tracker.track_hook(&track::namespaced(model, metric.name()), hook.clone());
        }
      }
    }
  }
}


/// A model whose layers are applied one after another.

#[derive(Debug)]
pub struct Sequential<T: Real = f32> {
  name: String,
  chain: Chain,
  fwd: Option<String>,
  compiled: Option<Compiled<T>>,
  timestep: usize,
  episode: usize,
}

impl<T: Real> Sequential<T> {
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_chain(name, Chain::new())
  }

  pub fn with_chain(name: impl Into<String>, chain: Chain) -> Self {
    Self {
      name: name.into(),
      chain,
      fwd: None,
      compiled: None,
      timestep: 0,
      episode: 0,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn chain(&self) -> &Chain {
    &self.chain
  }

  /// Append a layer. Takes effect at the next compile.

  pub fn add(&mut self, config: impl Into<LayerConfig>) -> Result<&mut Self> {
    self.chain.add(config)?;
    Ok(self)
  }

  pub fn add_all(&mut self, configs: impl IntoIterator<Item = LayerConfig>) -> Result<&mut Self> {
    self.chain.add_all(configs)?;
    Ok(self)
  }

  /// Feed `input` through the layers. Defaults to the first input.

  pub fn fwd(&mut self, input: &Input) -> &mut Self {
    self.fwd = Some(input.name().to_string());
    self
  }

  pub fn is_compiled(&self) -> bool {
    self.compiled.is_some()
  }

  /// Build all four graphs. A model that fails to compile keeps its
  /// previous graphs, if it had any.

  pub fn compile(&mut self, x: impl Into<Inputs>, y: Input, opts: CompileOpts<T>) -> Result<()> {
    let x = x.into();
    y.validate()?;
    x.check_unique()?;
    let fwd = match &self.fwd {
      Some(name) => x.get(name)
        .ok_or_else(|| Error::compile(format!("forward input {name:?} is not an input of {}", self.name)) )?,
      None => x.first()
        .ok_or_else(|| Error::compile(format!("{} needs at least one input", self.name)) )?,
    };
    fwd.validate()?;
    let fwd = fwd.name().to_string();
    if opts.batch_size == 0 {
      return Err(Error::config("batch size must be positive"))
    }
    info!("Compiling {} with forward input {fwd:?} and batch size {}", self.name, opts.batch_size);

    let loss = opts.loss.unwrap_or_else(|| Box::new(MSE) as Box<dyn Loss<T>> );
    let blueprint = Blueprint {
      model: &self.name,
      chain: &self.chain,
      x: &x,
      y: &y,
      fwd: &fwd,
      loss: loss.as_ref(),
      batch_size: opts.batch_size,
    };
    let train = VariantGraph::build(&blueprint, Variant::TrainSingle, None)?;
    let shared = Some(train.chain());
    let train_batch = VariantGraph::build(&blueprint, Variant::TrainBatch, shared)?;
    let online = VariantGraph::build(&blueprint, Variant::OnlineSingle, shared)?;
    let online_batch = VariantGraph::build(&blueprint, Variant::OnlineBatch, shared)?;

    let tracker = match opts.tracker {
      TrackerChoice::Default => Some(Tracker::new()?.shared()),
      TrackerChoice::Given(tracker) => Some(tracker),
      TrackerChoice::Disabled => None,
    };

    let compiled = Compiled {
      x,
      y,
      fwd,
      loss,
      optimizer: opts.optimizer.unwrap_or_default(),
      tracker,
      metrics: opts.metrics,
      batch_size: opts.batch_size,
      sync: opts.sync,
      train,
      train_batch,
      online,
      online_batch,
    };
    compiled.track_metrics(&self.name);
    self.compiled = Some(compiled);
    self.timestep = 0;
    Ok(())
  }

  /// Rebuild the batch graphs for batches of `size`. Their learnables
  /// are copied from [Variant::TrainSingle] again.
  ///
  /// Rebuilds whole graphs, so avoid calling this on a hot path.

  pub fn resize_batch(&mut self, size: usize) -> Result<()> {
    if size == 0 {
      return Err(Error::config("batch size must be positive"))
    }
    let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
    info!("Resizing batch graphs of {} to {size}", self.name);
    let blueprint = compiled.blueprint(&self.name, &self.chain, size);
    let shared = Some(compiled.train.chain());
    let train_batch = VariantGraph::build(&blueprint, Variant::TrainBatch, shared)?;
    let online_batch = VariantGraph::build(&blueprint, Variant::OnlineBatch, shared)?;
    compiled.train_batch = train_batch;
    compiled.online_batch = online_batch;
    compiled.batch_size = size;
    compiled.track_metrics(&self.name);
    Ok(())
  }

  /// Train on a single example.

  pub fn fit(&mut self, x: impl Into<Values<T>>, y: &Tensor<T>) -> Result<()> {
    self.step(Variant::TrainSingle, &x.into(), y)
  }

  /// Train on a batch whose leading dimension is the batch size.

  pub fn fit_batch(&mut self, x: impl Into<Values<T>>, y: &Tensor<T>) -> Result<()> {
    self.step(Variant::TrainBatch, &x.into(), y)
  }

  fn step(&mut self, variant: Variant, x: &Values<T>, y: &Tensor<T>) -> Result<()> {
    let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
    let graph = match variant {
      Variant::TrainBatch => &mut compiled.train_batch,
      _ => &mut compiled.train,
    };
    graph.train(x, y)?;
    let result = compiled.optimizer.step(&graph.learnables());
    graph.reset();
    result?;

    if let Some(tracker) = &compiled.tracker {
      tracker.borrow_mut().log_step(self.episode, self.timestep)?;
    }
    self.timestep += 1;

    if compiled.sync == SyncPolicy::AfterStep {
      compiled.sync_from(variant)?;
    }
    Ok(())
  }

  /// Predict a single example.

  pub fn predict(&mut self, x: &Tensor<T>) -> Result<Tensor<T>> {
    self.compiled_mut()?.online.predict(x)
  }

  /// Predict a batch whose leading dimension is the batch size.

  pub fn predict_batch(&mut self, x: &Tensor<T>) -> Result<Tensor<T>> {
    self.compiled_mut()?.online_batch.predict(x)
  }

  fn compiled(&self) -> Result<&Compiled<T>> {
    self.compiled.as_ref().ok_or(Error::NotCompiled)
  }

  fn compiled_mut(&mut self) -> Result<&mut Compiled<T>> {
    self.compiled.as_mut().ok_or(Error::NotCompiled)
  }

  pub fn x(&self) -> Result<&Inputs> {
    Ok(&self.compiled()?.x)
  }

  pub fn y(&self) -> Result<&Input> {
    Ok(&self.compiled()?.y)
  }

  pub fn batch_size(&self) -> Result<usize> {
    Ok(self.compiled()?.batch_size)
  }

  pub fn sync_policy(&self) -> Result<SyncPolicy> {
    Ok(self.compiled()?.sync)
  }

  pub fn loss(&self) -> Result<&dyn Loss<T>> {
    Ok(self.compiled()?.loss.as_ref())
  }

  pub fn variant(&self, variant: Variant) -> Result<&VariantGraph<T>> {
    Ok(self.compiled()?.graph(variant))
  }

  pub fn graph(&self, variant: Variant) -> Result<&Graph<T>> {
    Ok(self.variant(variant)?.graph())
  }

  /// All four graphs, in [Variant::ALL] order.

  pub fn graphs(&self) -> Result<Vec<&Graph<T>>> {
    let compiled = self.compiled()?;
    Ok(Variant::ALL.iter().map(|&variant| compiled.graph(variant).graph() ).collect())
  }

  /// Learnables of [Variant::TrainSingle].

  pub fn learnables(&self) -> Result<Vec<Variable<T>>> {
    self.variant_learnables(Variant::TrainSingle)
  }

  pub fn variant_learnables(&self, variant: Variant) -> Result<Vec<Variable<T>>> {
    Ok(self.variant(variant)?.learnables())
  }

  /// Shared by both training variants.

  pub fn optimizer(&self) -> Result<&Optimizer<T>> {
    Ok(&self.compiled()?.optimizer)
  }

  pub fn optimizer_mut(&mut self) -> Result<&mut Optimizer<T>> {
    Ok(&mut self.compiled_mut()?.optimizer)
  }

  pub fn tracker(&self) -> Option<&SharedTracker> {
    self.compiled.as_ref().and_then(|compiled| compiled.tracker.as_ref() )
  }

  pub fn timestep(&self) -> usize {
    self.timestep
  }

  pub fn episode(&self) -> usize {
    self.episode
  }

  /// Episode reported with every logged step.

  pub fn set_episode(&mut self, episode: usize) {
    self.episode = episode;
  }

  /// Write the values of [Variant::TrainSingle]'s learnables to `path`.

  pub fn save_learnables(&self, path: impl AsRef<Path>) -> Result<()> {
    let values = self.compiled()?.train.learnable_values();
    fs::write(path.as_ref(), postcard::to_allocvec(&values)?)?;
    info!("Saved {} learnables of {} to {}", values.len(), self.name, path.as_ref().display());
    Ok(())
  }

  /// Load learnable values written by [save_learnables](Self::save_learnables)
  /// into every variant.

  pub fn load_learnables(&self, path: impl AsRef<Path>) -> Result<()> {
    let compiled = self.compiled()?;
    let values: Vec<Tensor<T>> = postcard::from_bytes(&fs::read(path.as_ref())?)?;
    compiled.train.assign_learnables(&values)?;
    compiled.sync_from(Variant::TrainSingle)?;
    info!("Loaded {} learnables into {} from {}", values.len(), self.name, path.as_ref().display());
    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::{ Activation, FC };

  fn model() -> Sequential<f32> {
    let mut model = Sequential::new("test");
    model
      .add(FC { input: 5, output: 3, activation: Some(Activation::Sigmoid), ..Default::default() }).unwrap()
      .add(FC { input: 3, output: 1, activation: Some(Activation::Linear), ..Default::default() }).unwrap();
    model
  }

  fn opts() -> CompileOpts<f32> {
    CompileOpts::default().without_tracker().with_batch_size(4)
  }

  #[test]
  fn not_compiled() {
    let mut model = model();
    assert!(matches!(model.fit(&Tensor::zeros(&[1,5]), &Tensor::zeros(&[1,1])), Err(Error::NotCompiled)));
    assert!(matches!(model.predict(&Tensor::zeros(&[1,5])), Err(Error::NotCompiled)));
    assert!(matches!(model.resize_batch(8), Err(Error::NotCompiled)));
    assert!(model.learnables().is_err());
    assert!(model.tracker().is_none());
  }

  #[test]
  fn compile_validates_target() {
    let mut model = model();
    let err = model.compile(Input::new("x", &[1,5]), Input::new("y", &[4,1]), opts());
    assert!(matches!(err, Err(Error::Compile(_))));
    assert!(!model.is_compiled());
  }

  #[test]
  fn compile_rejects_zero_batch() {
    let mut model = model();
    let err = model.compile(Input::new("x", &[1,5]), Input::new("y", &[1,1]), opts().with_batch_size(0));
    assert!(matches!(err, Err(Error::InvalidConfig(_))));
  }

  #[test]
  fn failed_compile_keeps_previous_graphs() {
    let mut model = model();
    model.compile(Input::new("x", &[1,5]), Input::new("y", &[1,1]), opts()).unwrap();
    let before = model.variant(Variant::TrainSingle).unwrap().learnable_values();
    assert!(model.compile(Input::new("x", &[1,6]), Input::new("y", &[1,1]), opts()).is_err());
    assert_eq!(model.variant(Variant::TrainSingle).unwrap().learnable_values(), before);
    assert_eq!(model.x().unwrap().first().unwrap().dims(), &[1,5]);
  }

  #[test]
  fn forward_input_by_name() {
    let mut model = model();
    let a = Input::new("a", &[1,2]);
    let b = Input::new("b", &[1,5]);
    model.fwd(&b);
    model.compile(vec![a.clone(), b], Input::new("y", &[1,1]), opts()).unwrap();
    assert_eq!(model.variant(Variant::OnlineSingle).unwrap().fwd().name(), "b");
    assert_eq!(model.variant(Variant::OnlineBatch).unwrap().fwd().name(), "b_batch");
    let values = vec![Tensor::zeros(&[1,2]), Tensor::ones(&[1,5])];
    model.fit(values, &Tensor::zeros(&[1,1])).unwrap();

    let mut missing = model_with_fwd(&Input::new("c", &[1,5]));
    assert!(matches!(missing.compile(a, Input::new("y", &[1,1]), opts()), Err(Error::Compile(_))));
  }

  fn model_with_fwd(input: &Input) -> Sequential<f32> {
    let mut model = model();
    model.fwd(input);
    model
  }

  #[test]
  fn duplicate_inputs() {
    let mut model = model();
    let x = vec![Input::new("x", &[1,5]), Input::new("x", &[1,5])];
    assert!(matches!(model.compile(x, Input::new("y", &[1,1]), opts()), Err(Error::Compile(_))));
  }

  #[test]
  fn timestep_advances() {
    let mut model = model();
    model.compile(Input::new("x", &[1,5]), Input::new("y", &[1,1]), opts()).unwrap();
    model.fit(&Tensor::ones(&[1,5]), &Tensor::zeros(&[1,1])).unwrap();
    model.fit_batch(&Tensor::ones(&[4,5]), &Tensor::zeros(&[4,1])).unwrap();
    assert_eq!(model.timestep(), 2);
    assert_eq!(model.optimizer().unwrap().steps(), 2);
    assert!(model.fit(&Tensor::ones(&[4,5]), &Tensor::zeros(&[1,1])).is_err());
    assert_eq!(model.timestep(), 2);
  }

  #[test]
  fn metrics() {
    assert_eq!(Metric::TrainBatchLoss.name(), "train_batch_loss");
    assert_eq!(track::namespaced("m", Metric::TrainLoss.name()), "m_train_loss");
  }
}
