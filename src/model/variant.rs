use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
  variable::{ Graph, ReadHook, TapeMachine, Variable },
  layer::{ Chain, ChainOpts, CompiledChain },
  model::{ Input, InputNode, InputNodes, Inputs, Loss, Values, name_as_batch },
};


/// One of the four graphs a model is compiled into.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variant {
  TrainSingle,
  TrainBatch,
  OnlineSingle,
  OnlineBatch,
}

impl Variant {
  pub const ALL: [Self; 4] = [Self::TrainSingle, Self::TrainBatch, Self::OnlineSingle, Self::OnlineBatch];

  pub fn name(&self) -> &'static str {
    match self {
      Self::TrainSingle => "train",
      Self::TrainBatch => "trainBatch",
      Self::OnlineSingle => "online",
      Self::OnlineBatch => "onlineBatch",
    }
  }

  /// Attaches a loss and computes gradients.

  pub fn has_loss(&self) -> bool {
    matches!(self, Self::TrainSingle | Self::TrainBatch)
  }

  pub fn is_batched(&self) -> bool {
    matches!(self, Self::TrainBatch | Self::OnlineBatch)
  }

  /// Copies its initial learnable values from [TrainSingle](Self::TrainSingle).

  pub fn shares_learnables(&self) -> bool {
    *self != Self::TrainSingle
  }
}

impl std::fmt::Display for Variant {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}", self.name())
  }
}


/// Everything a variant is built from.

pub(crate) struct Blueprint<'a, T: Real> {
  pub model: &'a str,
  pub chain: &'a Chain,
  pub x: &'a Inputs,
  pub y: &'a Input,
  pub fwd: &'a str,
  pub loss: &'a dyn Loss<T>,
  pub batch_size: usize,
}


/// A fully wired graph of one [Variant], with its execution engine.

#[derive(Debug)]
pub struct VariantGraph<T: Real> {
  variant: Variant,
  graph: Graph<T>,
  chain: CompiledChain<T>,
  x: InputNodes<T>,
  fwd: InputNode<T>,
  y: Option<InputNode<T>>,
  loss: Option<(Variable<T>, ReadHook<T>)>,
  prediction: ReadHook<T>,
  machine: TapeMachine<T>,
}

impl<T: Real> VariantGraph<T> {
  /// Build `variant` from `blueprint`. All variants but
  /// [TrainSingle](Variant::TrainSingle) need the compiled TrainSingle
  /// chain as `shared` to copy learnable values from.

  pub(crate) fn build(blueprint: &Blueprint<T>, variant: Variant, shared: Option<&CompiledChain<T>>) -> Result<Self> {
    Self::wire(blueprint, variant, shared).map_err(Error::during_compile)
  }

  fn wire(blueprint: &Blueprint<T>, variant: Variant, shared: Option<&CompiledChain<T>>) -> Result<Self> {
    let graph = Graph::new(format!("{}_{}", blueprint.model, variant.name()));
    let batched = variant.is_batched();
    let batch = |input: &Input| if batched { input.as_batch(blueprint.batch_size) } else { input.clone() };

    if variant.shares_learnables() && shared.is_none() {
      return Err(Error::compile(format!("{variant} graph needs learnables to share")))
    }

    // Loss inputs take precedence over model inputs of the same name
    let mut loss_inputs = InputNodes::default();
    if variant.has_loss() {
      for input in &blueprint.loss.inputs() {
        loss_inputs.push(batch(input).compile(&graph)?);
      }
    }

    let mut x = InputNodes::default();
    for input in blueprint.x {
      let name = if batched { name_as_batch(input.name()) } else { input.name().to_string() };
      match loss_inputs.get(&name) {
        Some(node) => x.push(node.clone()),
        None => {
          // Only the forward input is batched for online prediction
          let input = if variant == Variant::OnlineBatch && input.name() != blueprint.fwd {
            input.clone()
          } else {
            batch(input)
          };
          x.push(input.compile(&graph)?);
        },
      }
    }

    let fwd_name = if batched { name_as_batch(blueprint.fwd) } else { blueprint.fwd.to_string() };
    let fwd = x.get(&fwd_name)
      .cloned()
      .ok_or_else(|| Error::compile(format!("forward input {fwd_name:?} not found in {}", graph.name())) )?;

    let y = if variant.has_loss() {
      Some(batch(blueprint.y).compile(&graph)?)
    } else {
      None
    };

    let chain = blueprint.chain.compile(&graph, &ChainOpts {
      shared: if variant.shares_learnables() { shared } else { None },
      batched,
      training: variant.has_loss(),
    })?;

    let prediction = chain.fwd(fwd.node())?;
    let prediction_hook = graph.read(&prediction)?;

    let learnables = chain.learnables();
    let (loss, machine) = match &y {
      Some(y) => {
        let loss = blueprint.loss.compute(&graph, &prediction, y.node(), &loss_inputs)?;
        let hook = graph.read(&loss)?;
        graph.grad(&loss, &learnables)?;
        let machine = TapeMachine::new(&graph).bind_dual_values(&learnables)?;
        (Some((loss, hook)), machine)
      },
      None => (None, TapeMachine::new(&graph)),
    };

    debug!("Built {} graph {} with {} learnables and {} taped nodes", variant, graph.name(), learnables.len(), machine.len());

    Ok(Self {
      variant,
      graph,
      chain,
      x,
      fwd,
      y,
      loss,
      prediction: prediction_hook,
      machine,
    })
  }

  pub fn variant(&self) -> Variant {
    self.variant
  }

  pub fn graph(&self) -> &Graph<T> {
    &self.graph
  }

  pub fn chain(&self) -> &CompiledChain<T> {
    &self.chain
  }

  pub fn learnables(&self) -> Vec<Variable<T>> {
    self.chain.learnables()
  }

  pub fn inputs(&self) -> &InputNodes<T> {
    &self.x
  }

  pub fn fwd(&self) -> &InputNode<T> {
    &self.fwd
  }

  pub fn target(&self) -> Option<&InputNode<T>> {
    self.y.as_ref()
  }

  pub fn loss(&self) -> Option<&Variable<T>> {
    self.loss.as_ref().map(|(loss, _)| loss )
  }

  pub(crate) fn loss_hook(&self) -> Option<&ReadHook<T>> {
    self.loss.as_ref().map(|(_, hook)| hook )
  }

  /// Prediction of the most recent run.

  pub fn prediction(&self) -> Option<Tensor<T>> {
    self.prediction.get()
  }

  /// Assign inputs and target, then run forward and backward.
  /// Gradients stay on the learnables until [reset](Self::reset).

  pub(crate) fn train(&mut self, x: &Values<T>, y: &Tensor<T>) -> Result<()> {
    let target = self.y.as_ref()
      .ok_or_else(|| Error::Execution(format!("{} graph cannot be trained", self.variant)) )?;
    target.set(y)?;
    self.x.set(&x.0)?;
    self.run()
  }

  /// Assign the forward input and return the prediction.

  pub(crate) fn predict(&mut self, x: &Tensor<T>) -> Result<Tensor<T>> {
    self.fwd.set(x)?;
    self.run()?;
    let prediction = self.prediction()
      .ok_or_else(|| Error::Execution(format!("{} graph produced no prediction", self.variant)) );
    self.reset();
    prediction
  }

  fn run(&mut self) -> Result<()> {
    let result = self.machine.run_all();
    if result.is_err() {
      self.machine.reset();
    }
    result
  }

  pub(crate) fn reset(&mut self) {
    self.machine.reset();
  }

  /// Overwrite learnable values by position.

  pub(crate) fn assign_learnables(&self, values: &[Tensor<T>]) -> Result<()> {
    let learnables = self.learnables();
    if learnables.len() != values.len() {
      return Err(Error::shape(format!("{} graph has {} learnables, got {} values", self.variant, learnables.len(), values.len())))
    }
    for (learnable, value) in learnables.iter().zip(values) {
      if learnable.dims() != value.dims() {
        return Err(Error::shape(format!("learnable {learnable} cannot hold {}", value.shape())))
      }
    }
    for (learnable, value) in learnables.iter().zip(values) {
      learnable.tensor().assign(value)?;
    }
    Ok(())
  }

  /// Detached copies of the current learnable values.

  pub(crate) fn learnable_values(&self) -> Vec<Tensor<T>> {
    self.learnables().iter().map(|learnable| learnable.tensor().detach() ).collect()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    layer::{ Activation, FC },
    model::MSE,
  };

  fn chain() -> Chain {
    let mut chain = Chain::new();
    chain
      .add(FC { input: 4, output: 3, activation: Some(Activation::Tanh), ..Default::default() }).unwrap()
      .add(FC { input: 3, output: 2, activation: Some(Activation::Linear), ..Default::default() }).unwrap();
    chain
  }

  #[derive(Debug)]
  struct Weighted;

  impl Loss<f32> for Weighted {
    fn compute(&self, _graph: &Graph<f32>, y_hat: &Variable<f32>, y: &Variable<f32>, inputs: &InputNodes<f32>) -> Result<Variable<f32>> {
      let weights = inputs.iter().next().unwrap().node();
      y_hat.sub(y)?.square()?.broadcast_mul(weights)?.mean()
    }

    fn inputs(&self) -> Inputs {
      Inputs::from(Input::new("weights", &[1,2]))
    }
  }

  fn build(blueprint: &Blueprint<f32>) -> Vec<VariantGraph<f32>> {
    let train = VariantGraph::build(blueprint, Variant::TrainSingle, None).unwrap();
    let mut graphs = vec![];
    for variant in &Variant::ALL[1..] {
      graphs.push(VariantGraph::build(blueprint, *variant, Some(train.chain())).unwrap());
    }
    graphs.insert(0, train);
    graphs
  }

  #[test]
  fn four_variants() {
    let chain = chain();
    let x = Inputs::from(Input::new("x", &[1,4]));
    let y = Input::new("y", &[1,2]);
    let blueprint = Blueprint { model: "m", chain: &chain, x: &x, y: &y, fwd: "x", loss: &MSE, batch_size: 5 };
    let graphs = build(&blueprint);
    let names: Vec<_> = graphs.iter().map(|g| g.graph().name().to_string() ).collect();
    assert_eq!(names, vec!["m_train", "m_trainBatch", "m_online", "m_onlineBatch"]);
    assert_eq!(graphs[1].fwd().name(), "x_batch");
    assert_eq!(graphs[1].fwd().input().dims(), &[5,4]);
    assert_eq!(graphs[1].target().unwrap().input().dims(), &[5,2]);
    assert!(graphs[2].loss().is_none() && graphs[3].target().is_none());
    for graph in &graphs {
      assert_eq!(graph.learnable_values(), graphs[0].learnable_values());
    }
  }

  #[test]
  fn missing_forward_input() {
    let chain = chain();
    let x = Inputs::from(Input::new("x", &[1,4]));
    let y = Input::new("y", &[1,2]);
    let blueprint = Blueprint::<f32> { model: "m", chain: &chain, x: &x, y: &y, fwd: "z", loss: &MSE, batch_size: 5 };
    assert!(matches!(VariantGraph::build(&blueprint, Variant::TrainSingle, None), Err(Error::Compile(_))));
  }

  #[test]
  fn layer_failures_are_compile_errors() {
    let chain = chain();
    let x = Inputs::from(Input::new("x", &[1,5]));
    let y = Input::new("y", &[1,2]);
    let blueprint = Blueprint::<f32> { model: "m", chain: &chain, x: &x, y: &y, fwd: "x", loss: &MSE, batch_size: 5 };
    assert!(matches!(VariantGraph::build(&blueprint, Variant::TrainSingle, None), Err(Error::Compile(_))));
  }

  #[test]
  fn loss_inputs_are_deduplicated() {
    let chain = chain();
    let x = Inputs::new(vec![Input::new("x", &[1,4]), Input::new("weights", &[1,2])]);
    let y = Input::new("y", &[1,2]);
    let blueprint = Blueprint { model: "w", chain: &chain, x: &x, y: &y, fwd: "x", loss: &Weighted, batch_size: 3 };
    let mut graphs = build(&blueprint);

    let train = &graphs[0];
    assert_eq!(train.inputs().len(), 2);
    let weights = train.inputs().get("weights").unwrap().node().clone();
    assert!(train.loss().unwrap().tensor().size() == 1);

    // Zero weights zero the loss
    let x = Values(vec![Tensor::ones(&[1,4]), Tensor::zeros(&[1,2])]);
    graphs[0].train(&x, &Tensor::ones(&[1,2])).unwrap();
    assert_eq!(graphs[0].loss_hook().unwrap().get().unwrap().item(), 0.0);
    assert_eq!(weights.tensor(), &Tensor::zeros(&[1,2]));

    let batch = &graphs[1];
    assert_eq!(batch.inputs().get("weights_batch").unwrap().input().dims(), &[3,2]);
  }

  #[test]
  fn predict_resets() {
    let chain = chain();
    let x = Inputs::from(Input::new("x", &[1,4]));
    let y = Input::new("y", &[1,2]);
    let blueprint = Blueprint { model: "m", chain: &chain, x: &x, y: &y, fwd: "x", loss: &MSE, batch_size: 2 };
    let mut graphs = build(&blueprint);
    let single = graphs[2].predict(&Tensor::ones(&[1,4])).unwrap();
    let batch = graphs[3].predict(&Tensor::ones(&[2,4])).unwrap();
    assert_eq!(single.dims(), &[1,2]);
    assert_eq!(batch.dims(), &[2,2]);
    assert!(single.max_abs_diff(&Tensor::new(&[1,2], batch.to_vec()[..2].to_vec())).unwrap() < 1e-6);
    assert!(graphs[2].predict(&Tensor::ones(&[2,4])).is_err());
  }
}
