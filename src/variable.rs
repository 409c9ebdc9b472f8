use std::rc::Rc;
use std::collections::HashSet;
use std::fmt::Debug;

mod mops;
mod graph;
mod machine;

pub use graph::{ Graph, ReadHook };
pub use machine::TapeMachine;

use crate::{
  internal::*,
  error::{ Error, Result },
  tensor::{ Tensor, Conv2dParams, Pool2dParams },
  scalar::Real,
};


/// Unary computational operation that can also compute its derivative.

pub trait UnaryOp<T: Real>: Debug {
  fn run(&self, lhs: &Tensor<T>) -> Result<Tensor<T>>;
  fn derive(&self, lhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>>;
}


/// Binary computational operation that can also compute its derivative.

pub trait BinaryOp<T: Real>: Debug {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>>;
  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, out: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)>;
}


#[derive(Debug)]
enum Op<T: Real> {
  Unary(Box<dyn UnaryOp<T>>),
  Binary(Box<dyn BinaryOp<T>>),
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
  Input,
  Learnable,
  Constant,
  Operation,
}


/// Node in a computation graph, containing a [Variable]'s data and gradient,
/// as well as the operation used to create it.

#[derive(Debug)]
struct Node<T: Real> {
  id: usize,
  graph: usize,
  name: Option<String>,
  kind: NodeKind,
  data: Tensor<T>,
  grad: Option<Tensor<T>>,
  op: Option<Op<T>>,
  previous: Vec<Rc<Node<T>>>,
}

impl<T: Real> Node<T> {
  fn reset_gradient(&self) {
    if let Some(grad) = &self.grad {
      grad.refill(T::zero());
    }
  }

  fn forward(&self) -> Result<()> {
    if let Some(op) = &self.op {
      let lhs = &self.previous[0].data;
      let value = match op {
        Op::Unary(op) => op.run(lhs)?,
        Op::Binary(op) => op.run(lhs, &self.previous[1].data)?,
      };
      self.data.assign(&value)?;
    }
    Ok(())
  }

  fn backward(&self) -> Result<()> {
    if let (Some(op), Some(grad)) = (&self.op, &self.grad) {
      let lhs = &self.previous[0];
      let changes = match op {
        Op::Unary(op) => vec![op.derive(&lhs.data, &self.data, grad)?],
        Op::Binary(op) => {
          let (l, r) = op.derive(&lhs.data, &self.previous[1].data, &self.data, grad)?;
          vec![l, r]
        },
      };
      for (change, prev) in changes.iter().zip(self.previous.iter()) {
        if let Some(grad) = &prev.grad {
          grad.add_assign(change)?;
        }
      }
    }
    Ok(())
  }
}


/// Handle to a node of a [Graph].
///
/// Every operation evaluates eagerly when it is created, which
/// checks shapes while the graph is built. A [TapeMachine] later
/// re-evaluates the recorded operations with new input data.

#[derive(Debug, Clone)]
pub struct Variable<T: Real> {
  node: Rc<Node<T>>,
}

impl<T: Real> Variable<T> {
  pub(crate) fn leaf(graph: usize, name: Option<String>, kind: NodeKind, data: Tensor<T>) -> Self {
    let grad = (kind == NodeKind::Learnable).then(|| Tensor::zeros(data.dims()) );
    Self {
      node: Rc::new(Node {
        id: make_id(),
        graph,
        name,
        kind,
        data,
        grad,
        op: None,
        previous: vec![],
      }),
    }
  }

  fn operation(&self, op: Op<T>, data: Tensor<T>, previous: Vec<Rc<Node<T>>>) -> Self {
    let grad = previous.iter().any(|prev| prev.grad.is_some() )
      .then(|| Tensor::zeros(data.dims()) );
    Self {
      node: Rc::new(Node {
        id: make_id(),
        graph: self.node.graph,
        name: None,
        kind: NodeKind::Operation,
        data,
        grad,
        op: Some(op),
        previous,
      }),
    }
  }

  pub fn id(&self) -> usize {
    self.node.id
  }

  pub fn graph_id(&self) -> usize {
    self.node.graph
  }

  pub fn name(&self) -> Option<&str> {
    self.node.name.as_deref()
  }

  pub fn kind(&self) -> NodeKind {
    self.node.kind
  }

  pub fn tensor(&self) -> &Tensor<T> {
    &self.node.data
  }

  pub fn dims(&self) -> &[usize] {
    self.node.data.dims()
  }

  pub fn grad(&self) -> Option<&Tensor<T>> {
    self.node.grad.as_ref()
  }

  pub fn is_learnable(&self) -> bool {
    self.node.kind == NodeKind::Learnable
  }

  pub fn unary_op(&self, op: impl UnaryOp<T> + 'static) -> Result<Self> {
    let data = op.run(&self.node.data)?;
    Ok(self.operation(Op::Unary(Box::new(op)), data, vec![self.node.clone()]))
  }

  pub fn binary_op(&self, op: impl BinaryOp<T> + 'static, rhs: &Self) -> Result<Self> {
    if self.node.graph != rhs.node.graph {
      return Err(Error::compile(format!("nodes of graphs {} and {} cannot be combined", self.node.graph, rhs.node.graph)))
    }
    let data = op.run(&self.node.data, &rhs.node.data)?;
    Ok(self.operation(Op::Binary(Box::new(op)), data, vec![self.node.clone(), rhs.node.clone()]))
  }

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::strict(mops::ArithKind::Add), rhs)
  }

  pub fn sub(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::strict(mops::ArithKind::Sub), rhs)
  }

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::strict(mops::ArithKind::Mul), rhs)
  }

  pub fn div(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::strict(mops::ArithKind::Div), rhs)
  }

  pub fn broadcast_add(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::broadcast(mops::ArithKind::Add), rhs)
  }

  pub fn broadcast_sub(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::broadcast(mops::ArithKind::Sub), rhs)
  }

  pub fn broadcast_mul(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::broadcast(mops::ArithKind::Mul), rhs)
  }

  pub fn broadcast_div(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::Arith::broadcast(mops::ArithKind::Div), rhs)
  }

  pub fn mm(&self, rhs: &Self) -> Result<Self> {
    self.binary_op(mops::MatMul, rhs)
  }

  pub fn neg(&self) -> Result<Self> {
    self.unary_op(mops::Neg)
  }

  pub fn exp(&self) -> Result<Self> {
    self.unary_op(mops::Exp)
  }

  pub fn log(&self) -> Result<Self> {
    self.unary_op(mops::Log)
  }

  pub fn sqrt(&self) -> Result<Self> {
    self.unary_op(mops::Sqrt)
  }

  pub fn square(&self) -> Result<Self> {
    self.unary_op(mops::Square)
  }

  pub fn sigmoid(&self) -> Result<Self> {
    self.unary_op(mops::Sigmoid)
  }

  pub fn tanh(&self) -> Result<Self> {
    self.unary_op(mops::Tanh)
  }

  pub fn relu(&self) -> Result<Self> {
    self.unary_op(mops::LeakyReLU { alpha: T::zero() })
  }

  pub fn leaky_relu(&self, alpha: T) -> Result<Self> {
    self.unary_op(mops::LeakyReLU { alpha })
  }

  /// Sum along `axis`, removing that dimension.

  pub fn sum(&self, axis: usize) -> Result<Self> {
    self.unary_op(mops::Sum { axis })
  }

  /// Mean of all elements, as a scalar.

  pub fn mean(&self) -> Result<Self> {
    self.unary_op(mops::Mean)
  }

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    if dims == self.dims() { return Ok(self.clone()) }
    self.unary_op(mops::Reshape { dims: dims.to_vec() })
  }

  pub fn conv2d(&self, filter: &Self, params: Conv2dParams) -> Result<Self> {
    self.binary_op(mops::Conv2d { params }, filter)
  }

  pub fn max_pool2d(&self, params: Pool2dParams) -> Result<Self> {
    self.unary_op(mops::MaxPool2d::new(params))
  }

  /// Zero each element with `probability`, scaling survivors to keep the expectation.
  /// A fresh mask is drawn on every evaluation.

  pub fn dropout(&self, probability: T) -> Result<Self> {
    self.unary_op(mops::Dropout::new(probability))
  }

  /// Reevaluate this Variable's graph to produce a new output.

  pub fn forward(&self) -> Result<()> {
    for node in self.history() {
      node.forward()?;
    }
    Ok(())
  }

  /// List all learnable parameters this Variable depends on.

  pub fn parameters(&self) -> Vec<Self> {
    self.history()
      .into_iter()
      .filter(|node| node.kind == NodeKind::Learnable )
      .map(|node| Self { node } )
      .collect()
  }

  fn history(&self) -> Vec<Rc<Node<T>>> {
    let mut history = vec![];
    Self::history_recurse(&self.node, &mut history, &mut HashSet::new());
    history
  }

  fn history_recurse(node: &Rc<Node<T>>, history: &mut Vec<Rc<Node<T>>>, visited: &mut HashSet<usize>) {
    if visited.contains(&node.id) { return }
    visited.insert(node.id);
    for prev in &node.previous {
      Self::history_recurse(prev, history, visited);
    }
    history.push(node.clone());
  }
}

impl<T: Real> PartialEq for Variable<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.node.id == rhs.node.id
  }
}

impl<T: Real> std::fmt::Display for Variable<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let title = match self.node.kind {
      NodeKind::Input => "Input",
      NodeKind::Learnable => "Learnable",
      NodeKind::Constant => "Constant",
      NodeKind::Operation => if self.node.grad.is_some() { "Computed" } else { "Derived" },
    };
    match &self.node.name {
      Some(name) => write!(f, "{title} {name} {}", self.tensor()),
      None => write!(f, "{title} {}", self.tensor()),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  /// Compare the derived gradient of `generator`'s summed output with
  /// respect to a random learnable to a central-difference estimate.

  fn check_gradients<F>(dims: &[usize], generator: F) -> f64
  where
    F: Fn(&Variable<f64>) -> Result<Variable<f64>>
  {
    let eps = 1e-5;
    let graph = Graph::new("check");
    let input = Tensor::randn(dims);
    let var = graph.learnable("x", input.detach());
    let out = generator(&var).unwrap();
    let cost = out.reshape(&[out.tensor().size()]).unwrap().sum(0).unwrap();
    graph.grad(&cost, &[var.clone()]).unwrap();
    let mut machine = TapeMachine::new(&graph).bind_dual_values(&[var.clone()]).unwrap();
    machine.run_all().unwrap();
    let grad = var.grad().unwrap().detach();
    let raw = input.to_vec();
    let mut worst: f64 = 0.0;
    for i in 0..raw.len() {
      let mut plus = raw.clone();
      plus[i] += eps;
      var.tensor().assign(&Tensor::new(dims, plus)).unwrap();
      cost.forward().unwrap();
      let next = cost.tensor().item();
      let mut minus = raw.clone();
      minus[i] -= eps;
      var.tensor().assign(&Tensor::new(dims, minus)).unwrap();
      cost.forward().unwrap();
      let prev = cost.tensor().item();
      let numeric = (next - prev) / (2.0 * eps);
      worst = worst.max((numeric - grad.get(i).unwrap()).abs());
    }
    worst
  }

  #[test]
  fn x_squared() {
    let graph = Graph::new("test");
    let x = graph.learnable("x", Tensor::vec(&[3.0, 5.0]));
    let two = graph.constant(Tensor::vec(&[2.0, 2.0]));
    let z = x.mul(&x).unwrap().add(&two).unwrap();
    assert_eq!(z.tensor(), &Tensor::vec(&[11.0, 27.0]));
    let cost = z.sum(0).unwrap();
    graph.grad(&cost, &[x.clone()]).unwrap();
    let mut machine = TapeMachine::new(&graph).bind_dual_values(&[x.clone()]).unwrap();
    machine.run_all().unwrap();
    assert_eq!(x.grad(), Some(&Tensor::vec(&[6.0, 10.0])));
  }

  #[test]
  fn strict_ops_reject_mismatched_shapes() {
    let graph = Graph::<f32>::new("test");
    let a = graph.input("a", &[1,3]);
    let b = graph.input("b", &[4,3]);
    assert!(a.add(&b).is_err());
    assert_eq!(b.broadcast_add(&a).unwrap().dims(), &[4,3]);
  }

  #[test]
  fn graphs_cannot_be_mixed() {
    let g1 = Graph::<f32>::new("one");
    let g2 = Graph::<f32>::new("two");
    let a = g1.input("a", &[1,3]);
    let b = g2.input("b", &[1,3]);
    assert!(matches!(a.add(&b), Err(Error::Compile(_))));
  }

  #[test]
  fn elementwise_gradients() {
    assert!(check_gradients(&[2,3], |x| x.sigmoid() ) < 1e-6);
    assert!(check_gradients(&[2,3], |x| x.tanh() ) < 1e-6);
    assert!(check_gradients(&[2,3], |x| x.exp()?.log() ) < 1e-6);
    assert!(check_gradients(&[2,3], |x| x.square()?.neg() ) < 1e-5);
    assert!(check_gradients(&[2,3], |x| x.leaky_relu(0.1) ) < 1e-6);
    assert!(check_gradients(&[2,3], |x| x.square()?.sqrt() ) < 1e-5);
  }

  #[test]
  fn structural_gradients() {
    assert!(check_gradients(&[2,3], |x| x.mm(&x.reshape(&[3,2])?) ) < 1e-5);
    assert!(check_gradients(&[2,3], |x| x.sum(1)?.square() ) < 1e-5);
    assert!(check_gradients(&[2,3], |x| x.mean()?.square() ) < 1e-5);
    assert!(check_gradients(&[2,3], |x| {
      let row = x.sum(0)?.reshape(&[1,3])?;
      x.broadcast_div(&row.exp()?)
    }) < 1e-5);
    assert!(check_gradients(&[1,2,4,4], |x| x.max_pool2d(Pool2dParams::default()) ) < 1e-6);
  }

  #[test]
  fn convolution_gradient() {
    let weights = Tensor::<f64>::randn(&[2,1,3,3]);
    let params = Conv2dParams::default();
    assert!(check_gradients(&[1,1,4,4], |x| {
      let filter = Variable::leaf(x.graph_id(), None, NodeKind::Constant, weights.detach());
      x.conv2d(&filter, params)
    }) < 1e-5);
  }

  #[test]
  fn parameters_in_history() {
    let graph = Graph::<f32>::new("test");
    let w = graph.learnable("w", Tensor::ones(&[3,2]));
    let x = graph.input("x", &[1,3]);
    let y = x.mm(&w).unwrap().relu().unwrap();
    assert_eq!(y.parameters(), vec![w]);
    assert!(y.grad().is_some());
    assert!(x.grad().is_none());
  }
}
