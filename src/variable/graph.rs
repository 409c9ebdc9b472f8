use std::rc::Rc;
use std::cell::RefCell;

use crate::{
  internal::*,
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
  variable::{ Variable, NodeKind },
};


/// Captures a node's value every time its graph is executed.

#[derive(Debug, Clone)]
pub struct ReadHook<T: Real> {
  value: Rc<RefCell<Option<Tensor<T>>>>,
}

impl<T: Real> ReadHook<T> {
  fn new() -> Self {
    Self { value: Rc::new(RefCell::new(None)) }
  }

  /// Value from the most recent run, if there was one.

  pub fn get(&self) -> Option<Tensor<T>> {
    self.value.borrow().clone()
  }

  pub(crate) fn set(&self, value: Tensor<T>) {
    *self.value.borrow_mut() = Some(value);
  }
}


#[derive(Debug, Clone)]
pub(crate) struct Cost<T: Real> {
  pub node: Variable<T>,
  pub wrt: Vec<Variable<T>>,
}


/// A computation graph.
///
/// Creates the leaves of the graph and records what an execution
/// engine should read and differentiate. Nodes derived from these
/// leaves belong to the same graph and may not be mixed with nodes
/// of another one.

#[derive(Debug)]
pub struct Graph<T: Real> {
  id: usize,
  name: String,
  reads: RefCell<Vec<(Variable<T>, ReadHook<T>)>>,
  cost: RefCell<Option<Cost<T>>>,
}

impl<T: Real> Graph<T> {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      id: make_id(),
      name: name.into(),
      reads: RefCell::new(vec![]),
      cost: RefCell::new(None),
    }
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Placeholder of the given dims, filled with zeros until it gets assigned.

  pub fn input(&self, name: &str, dims: &[usize]) -> Variable<T> {
    Variable::leaf(self.id, Some(name.to_string()), NodeKind::Input, Tensor::zeros(dims))
  }

  pub fn learnable(&self, name: &str, value: Tensor<T>) -> Variable<T> {
    Variable::leaf(self.id, Some(name.to_string()), NodeKind::Learnable, value)
  }

  pub fn constant(&self, value: Tensor<T>) -> Variable<T> {
    Variable::leaf(self.id, None, NodeKind::Constant, value)
  }

  pub fn scalar(&self, value: T) -> Variable<T> {
    self.constant(Tensor::scalar(value))
  }

  /// Register a hook that captures `node`'s value after every execution.

  pub fn read(&self, node: &Variable<T>) -> Result<ReadHook<T>> {
    self.check_owned(node)?;
    let hook = ReadHook::new();
    self.reads.borrow_mut().push((node.clone(), hook.clone()));
    Ok(hook)
  }

  /// Request gradients of the scalar `cost` with respect to `wrt`.

  pub fn grad(&self, cost: &Variable<T>, wrt: &[Variable<T>]) -> Result<()> {
    self.check_owned(cost)?;
    if cost.tensor().size() != 1 {
      return Err(Error::compile(format!("cost must be a scalar, got {}", cost.tensor().shape())))
    }
    for node in wrt {
      self.check_owned(node)?;
      if !node.is_learnable() {
        return Err(Error::compile(format!("cannot differentiate with respect to non-learnable {node}")))
      }
    }
    *self.cost.borrow_mut() = Some(Cost { node: cost.clone(), wrt: wrt.to_vec() });
    Ok(())
  }

  pub(crate) fn cost(&self) -> Option<Cost<T>> {
    self.cost.borrow().clone()
  }

  pub(crate) fn reads(&self) -> Vec<(Variable<T>, ReadHook<T>)> {
    self.reads.borrow().clone()
  }

  fn check_owned(&self, node: &Variable<T>) -> Result<()> {
    if node.graph_id() != self.id {
      return Err(Error::compile(format!("node does not belong to graph {}", self.name)))
    }
    Ok(())
  }
}
