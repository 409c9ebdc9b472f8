use log::debug;
use serde::{Serialize, Deserialize};

use crate::{
  error::{ Error, Result },
  scalar::{ DType, Real },
  shape::Shape,
  tensor::Tensor,
  variable::{ Graph, Variable },
};


/// Named, shaped and typed placeholder of a model.
///
/// The canonical form of an input describes a single example and has
/// a leading dimension of 1, as in `[1, 4]`.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
  name: String,
  shape: Shape,
  #[serde(default)]
  dtype: DType,
}

impl Input {
  /// New input of element type `float32`.

  pub fn new(name: impl Into<String>, dims: &[usize]) -> Self {
    Self { name: name.into(), shape: Shape::new(dims), dtype: DType::default() }
  }

  pub fn with_dtype(mut self, dtype: DType) -> Self {
    self.dtype = dtype;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  pub fn dtype(&self) -> DType {
    self.dtype
  }

  pub fn validate(&self) -> Result<()> {
    match self.shape.dims.first() {
      None => Err(Error::compile(format!("input {:?} has no shape", self.name))),
      Some(&1) => Ok(()),
      Some(_) => Err(Error::compile(format!(
        "input {:?} {} must have a leading dimension of 1, e.g. [1, 4]", self.name, self.shape
      ))),
    }
  }

  /// Batched copy of this input, named `<name>_batch`, with its leading
  /// dimension set to `size`. Rank 1 shapes gain a leading dimension first.

  pub fn as_batch(&self, size: usize) -> Self {
    let mut dims = self.shape.dims.clone();
    if dims.len() <= 1 {
      dims.insert(0, 1);
    }
    dims[0] = size;
    Self {
      name: name_as_batch(&self.name),
      shape: Shape::new(&dims),
      dtype: self.dtype,
    }
  }

  /// Shape without a leading dimension of 1.

  pub fn squeeze(&self) -> Shape {
    self.shape.squeeze_leading()
  }

  /// Check that `value` could be assigned to this input.

  pub fn check<T: Real>(&self, value: &Tensor<T>) -> Result<()> {
    if value.dims() != self.dims() {
      return Err(Error::shape(format!("input {} expects {} got {}", self.name, self.shape, value.shape())))
    }
    if T::DTYPE != self.dtype {
      return Err(Error::shape(format!("input {} expects {} got {}", self.name, self.dtype, T::DTYPE)))
    }
    Ok(())
  }

  /// Create this input's placeholder in `graph`.

  pub fn compile<T: Real>(&self, graph: &Graph<T>) -> Result<InputNode<T>> {
    if T::DTYPE != self.dtype {
      return Err(Error::compile(format!(
        "input {} is {} but graph {} holds {}", self.name, self.dtype, graph.name(), T::DTYPE
      )))
    }
    debug!("Compiling input {} {} into {}", self.name, self.shape, graph.name());
    Ok(InputNode {
      input: self.clone(),
      node: graph.input(&self.name, self.dims()),
    })
  }
}


/// Name of the batched form of the input called `name`.

pub fn name_as_batch(name: &str) -> String {
  if name.is_empty() { String::new() } else { format!("{name}_batch") }
}


/// Ordered set of inputs.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inputs(Vec<Input>);

impl Inputs {
  pub fn new(inputs: Vec<Input>) -> Self {
    Self(inputs)
  }

  pub fn get(&self, name: &str) -> Option<&Input> {
    self.0.iter().find(|input| input.name == name )
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn first(&self) -> Option<&Input> {
    self.0.first()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Input> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Fail on the first name that occurs twice.

  pub(crate) fn check_unique(&self) -> Result<()> {
    for (i, input) in self.0.iter().enumerate() {
      if self.0[..i].iter().any(|other| other.name == input.name ) {
        return Err(Error::compile(format!("duplicate input name {:?}", input.name)))
      }
    }
    Ok(())
  }
}

impl From<Input> for Inputs {
  fn from(input: Input) -> Self {
    Self(vec![input])
  }
}

impl From<Vec<Input>> for Inputs {
  fn from(inputs: Vec<Input>) -> Self {
    Self(inputs)
  }
}

impl<'a> IntoIterator for &'a Inputs {
  type Item = &'a Input;
  type IntoIter = std::slice::Iter<'a, Input>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}


/// An [Input] compiled into a graph.

#[derive(Debug, Clone)]
pub struct InputNode<T: Real> {
  input: Input,
  node: Variable<T>,
}

impl<T: Real> InputNode<T> {
  pub fn input(&self) -> &Input {
    &self.input
  }

  pub fn name(&self) -> &str {
    self.input.name()
  }

  pub fn node(&self) -> &Variable<T> {
    &self.node
  }

  /// Assign a value for the next run. Shapes must match exactly.

  pub fn set(&self, value: &Tensor<T>) -> Result<()> {
    self.input.check(value)?;
    self.node.tensor().assign(value)
  }
}


/// Inputs compiled into one graph, in declaration order.

#[derive(Debug, Clone)]
pub struct InputNodes<T: Real>(Vec<InputNode<T>>);

impl<T: Real> Default for InputNodes<T> {
  fn default() -> Self {
    Self(vec![])
  }
}

impl<T: Real> InputNodes<T> {
  pub(crate) fn push(&mut self, node: InputNode<T>) {
    self.0.push(node);
  }

  pub fn get(&self, name: &str) -> Option<&InputNode<T>> {
    self.0.iter().find(|node| node.name() == name )
  }

  pub fn iter(&self) -> std::slice::Iter<'_, InputNode<T>> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Assign one value per input, by position. Nothing is assigned
  /// unless every value fits.

  pub fn set(&self, values: &[Tensor<T>]) -> Result<()> {
    if values.len() != self.0.len() {
      return Err(Error::shape(format!("expected {} input values, got {}", self.0.len(), values.len())))
    }
    for (node, value) in self.0.iter().zip(values) {
      node.input.check(value)?;
    }
    for (node, value) in self.0.iter().zip(values) {
      node.set(value)?;
    }
    Ok(())
  }
}


/// One value per model input.

#[derive(Debug, Clone, PartialEq)]
pub struct Values<T: Real>(pub Vec<Tensor<T>>);

impl<T: Real> From<Tensor<T>> for Values<T> {
  fn from(value: Tensor<T>) -> Self {
    Self(vec![value])
  }
}

impl<T: Real> From<&Tensor<T>> for Values<T> {
  fn from(value: &Tensor<T>) -> Self {
    Self(vec![value.clone()])
  }
}

impl<T: Real> From<Vec<Tensor<T>>> for Values<T> {
  fn from(values: Vec<Tensor<T>>) -> Self {
    Self(values)
  }
}

impl<T: Real> From<&[Tensor<T>]> for Values<T> {
  fn from(values: &[Tensor<T>]) -> Self {
    Self(values.to_vec())
  }
}
