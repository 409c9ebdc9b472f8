use std::rc::Rc;

use itertools::Itertools;
use log::debug;

use crate::{
  error::{ Error, Result },
  scalar::Real,
  variable::{ Graph, ReadHook, Variable, Node },
};


/// Executes a [Graph] by replaying its operations in creation order.
///
/// The tape holds every node needed to produce the graph's reads and
/// its cost. When dual values are bound, each run is followed by a
/// backward pass that leaves gradients on the bound learnables until
/// [reset](TapeMachine::reset) is called.

#[derive(Debug)]
pub struct TapeMachine<T: Real> {
  name: String,
  tape: Vec<Rc<Node<T>>>,
  reads: Vec<(Variable<T>, ReadHook<T>)>,
  cost: Option<Variable<T>>,
  wrt: Vec<usize>,
  duals: Vec<Variable<T>>,
}

impl<T: Real> TapeMachine<T> {
  pub fn new(graph: &Graph<T>) -> Self {
    let reads = graph.reads();
    let (cost, wrt) = match graph.cost() {
      Some(cost) => (Some(cost.node), cost.wrt.iter().map(|node| node.id() ).collect()),
      None => (None, vec![]),
    };
    let mut tape = reads.iter()
      .map(|(node, _)| node )
      .chain(cost.iter())
      .map(|node| node.history() )
      .collect::<Vec<_>>()
      .concat();
    tape.sort_by_key(|node| node.id );
    let tape: Vec<_> = tape.into_iter().unique_by(|node| node.id ).collect();
    debug!("Taped {} nodes of graph {}", tape.len(), graph.name());
    Self {
      name: graph.name().to_string(),
      tape,
      reads,
      cost,
      wrt,
      duals: vec![],
    }
  }

  /// Back-propagate into `nodes` after every run.
  /// The graph must have a gradient request covering them.

  pub fn bind_dual_values(mut self, nodes: &[Variable<T>]) -> Result<Self> {
    if nodes.is_empty() { return Ok(self) }
    if self.cost.is_none() {
      return Err(Error::compile(format!("graph {} has no cost to differentiate", self.name)))
    }
    for node in nodes {
      if !self.wrt.contains(&node.id()) {
        return Err(Error::compile(format!("no gradient of the cost of {} was requested for {node}", self.name)))
      }
      if !node.is_learnable() || !self.tape.iter().any(|taped| taped.id == node.id() ) {
        return Err(Error::compile(format!("cannot bind dual value for {node} in graph {}", self.name)))
      }
    }
    self.duals = nodes.to_vec();
    Ok(self)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn len(&self) -> usize {
    self.tape.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tape.is_empty()
  }

  /// Evaluate every taped node, back-propagate if dual values are bound
  /// and capture all read hooks.

  pub fn run_all(&mut self) -> Result<()> {
    self.execute().map_err(Error::during_run)
  }

  fn execute(&mut self) -> Result<()> {
    for node in &self.tape {
      node.forward()?;
    }
    if let Some(cost) = &self.cost {
      if !self.duals.is_empty() && cost.grad().is_some() {
        if !cost.tensor().all_finite() {
          return Err(Error::Execution(format!("cost of {} is not finite", self.name)))
        }
        for node in &self.tape {
          node.reset_gradient();
        }
        if let Some(grad) = cost.grad() {
          grad.refill(T::one());
        }
        for node in self.tape.iter().rev() {
          node.backward()?;
        }
      }
    }
    for (node, hook) in &self.reads {
      hook.set(node.tensor().detach());
    }
    Ok(())
  }

  /// Clear gradients so the next run starts clean. Read values are kept.

  pub fn reset(&mut self) {
    for node in &self.tape {
      node.reset_gradient();
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::Tensor;

  #[test]
  fn reads_follow_inputs() {
    let graph = Graph::<f32>::new("g");
    let x = graph.input("x", &[1,2]);
    let y = x.square().unwrap();
    let hook = graph.read(&y).unwrap();
    let mut machine = TapeMachine::new(&graph);
    assert!(hook.get().is_none());
    x.tensor().assign(&Tensor::new(&[1,2], vec![2.0, 3.0])).unwrap();
    machine.run_all().unwrap();
    assert_eq!(hook.get().unwrap().to_vec(), vec![4.0, 9.0]);
    machine.reset();
    assert_eq!(hook.get().unwrap().to_vec(), vec![4.0, 9.0]);
  }

  #[test]
  fn gradients_do_not_accumulate_across_runs() {
    let graph = Graph::<f64>::new("g");
    let w = graph.learnable("w", Tensor::vec(&[2.0]));
    let cost = w.square().unwrap().sum(0).unwrap();
    graph.grad(&cost, &[w.clone()]).unwrap();
    let mut machine = TapeMachine::new(&graph).bind_dual_values(&[w.clone()]).unwrap();
    machine.run_all().unwrap();
    machine.run_all().unwrap();
    assert_eq!(w.grad().unwrap().to_vec(), vec![4.0]);
    machine.reset();
    assert_eq!(w.grad().unwrap().to_vec(), vec![0.0]);
  }

  #[test]
  fn binding_requires_cost() {
    let graph = Graph::<f32>::new("g");
    let w = graph.learnable("w", Tensor::vec(&[2.0]));
    let _ = graph.read(&w).unwrap();
    assert!(TapeMachine::new(&graph).bind_dual_values(&[w]).is_err());
  }

  #[test]
  fn binding_requires_gradient_request() {
    let graph = Graph::<f32>::new("g");
    let w = graph.learnable("w", Tensor::vec(&[2.0]));
    let v = graph.learnable("v", Tensor::vec(&[1.0]));
    let cost = w.mul(&v).unwrap().sum(0).unwrap();
    graph.grad(&cost, &[w.clone()]).unwrap();
    let err = TapeMachine::new(&graph).bind_dual_values(&[w.clone(), v]);
    assert!(matches!(err, Err(Error::Compile(_))));
    assert!(TapeMachine::new(&graph).bind_dual_values(&[w]).is_ok());
  }

  #[test]
  fn non_finite_cost_is_an_execution_error() {
    let graph = Graph::<f32>::new("g");
    let x = graph.input("x", &[1]);
    let w = graph.learnable("w", Tensor::vec(&[1.0]));
    let cost = w.div(&x).unwrap().sum(0).unwrap();
    graph.grad(&cost, &[w.clone()]).unwrap();
    let mut machine = TapeMachine::new(&graph).bind_dual_values(&[w]).unwrap();
    assert!(matches!(machine.run_all(), Err(Error::Execution(_))));
  }
}
