use std::collections::HashMap;
use std::fmt::Debug;

use crate::{
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
  variable::Variable,
};


/// An optimization strategy to be used with [Optimizer].
///
/// State is kept per parameter slot, the position of a parameter in the
/// list handed to [Optimizer::step]. Graphs compiled from the same chain
/// list their learnables in the same order and therefore share state.

pub trait Strategy<R: Real>: Debug {
  fn update(&mut self, slot: usize, weights: &Tensor<R>, grad: &Tensor<R>, rate: R, step: usize) -> Result<Tensor<R>>;

  /// Fail if `weights` cannot be updated through `slot`.
  fn check(&self, _slot: usize, _weights: &Tensor<R>) -> Result<()> { Ok(()) }

  /// Number of slots holding state.
  fn slots(&self) -> usize { 0 }
}


/// Generic optimizer that allows for several optimization [strategies](Strategy) to be used.

#[derive(Debug)]
pub struct Optimizer<R: Real> {
  strategy: Box<dyn Strategy<R>>,
  pub learning_rate: R,
  step: usize,
}

impl<R: Real> Optimizer<R> {
  pub fn new(learning_rate: R, strategy: impl Strategy<R> + 'static) -> Self {
    Self { strategy: Box::new(strategy), learning_rate, step: 1 }
  }

  /// Apply one update to every parameter, using its current gradient.

  /// Nothing is updated unless every parameter can be.

  pub fn step(&mut self, params: &[Variable<R>]) -> Result<()> {
    for (slot, param) in params.iter().enumerate() {
      let grad = param.grad()
        .ok_or_else(|| Error::Execution(format!("non-trainable parameter {param} cannot be optimized")) )?;
      if grad.dims() != param.dims() {
        return Err(Error::shape(format!("gradient {} doesn't match parameter {param}", grad.shape())))
      }
      self.strategy.check(slot, param.tensor())?;
    }

    for (slot, param) in params.iter().enumerate() {
      let grad = param.grad()
        .ok_or_else(|| Error::Execution(format!("non-trainable parameter {param} cannot be optimized")) )?;

      // Execute strategy
      let weights = param.tensor();
      let change = self.strategy.update(slot, weights, grad, self.learning_rate, self.step)?;

      // Apply change
      weights.assign(&weights.add(&change)?)?;
    }
    self.step += 1;
    Ok(())
  }

  /// Number of updates applied so far.

  pub fn steps(&self) -> usize {
    self.step - 1
  }

  pub fn state_slots(&self) -> usize {
    self.strategy.slots()
  }
}

impl<R: Real> Default for Optimizer<R> {
  fn default() -> Self {
    Self::new(R::cast(0.001), Adam::default())
  }
}


fn slot_state<'a, R: Real>(states: &'a mut HashMap<usize, Tensor<R>>, slot: usize, weights: &Tensor<R>) -> Result<&'a Tensor<R>> {
  let state = states.entry(slot).or_insert_with(|| Tensor::zeros(weights.dims()) );
  if state.dims() != weights.dims() {
    return Err(Error::shape(format!("optimizer slot {slot} holds {} state but parameter is {}", state.shape(), weights.shape())))
  }
  Ok(&*state)
}

fn check_slot<R: Real>(states: &HashMap<usize, Tensor<R>>, slot: usize, weights: &Tensor<R>) -> Result<()> {
  match states.get(&slot) {
    Some(state) if state.dims() != weights.dims() => Err(Error::shape(format!(
      "optimizer slot {slot} holds {} state but parameter is {}", state.shape(), weights.shape()
    ))),
    _ => Ok(()),
  }
}


/// Stochastic Gradient Descent strategy

#[derive(Debug, Clone, Default)]
pub struct SGD;

impl<R: Real> Strategy<R> for SGD {
  fn update(&mut self, _slot: usize, _weights: &Tensor<R>, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    Ok(grad.scale(-rate))
  }
}


/// Stochastic Gradient Descent with momentum

#[derive(Debug, Clone)]
pub struct Momentum<R: Real> {
  pub momentum: R,
  v: HashMap<usize, Tensor<R>>,
}

impl<R: Real> Momentum<R> {
  pub fn new(momentum: R) -> Self {
    Self {
      momentum,
      v: HashMap::new(),
    }
  }
}

impl<R: Real> Default for Momentum<R> {
  fn default() -> Self {
    Self::new(R::cast(0.9))
  }
}

impl<R: Real> Strategy<R> for Momentum<R> {
  fn update(&mut self, slot: usize, weights: &Tensor<R>, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    let momentum = self.momentum;
    let v = slot_state(&mut self.v, slot, weights)?;
    v.assign(&v.zip(grad, |v, g| v * momentum - g * rate )?)?;
    Ok(v.detach())
  }

  fn check(&self, slot: usize, weights: &Tensor<R>) -> Result<()> {
    check_slot(&self.v, slot, weights)
  }

  fn slots(&self) -> usize {
    self.v.len()
  }
}


/// Stochastic Gradient Descent with Nesterov momentum

#[derive(Debug, Clone)]
pub struct Nesterov<R: Real> {
  pub momentum: R,
  v: HashMap<usize, Tensor<R>>,
}

impl<R: Real> Nesterov<R> {
  pub fn new(momentum: R) -> Self {
    Self {
      momentum,
      v: HashMap::new(),
    }
  }
}

impl<R: Real> Default for Nesterov<R> {
  fn default() -> Self {
    Self::new(R::cast(0.9))
  }
}

impl<R: Real> Strategy<R> for Nesterov<R> {
  fn update(&mut self, slot: usize, weights: &Tensor<R>, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    let momentum = self.momentum;
    let v = slot_state(&mut self.v, slot, weights)?;
    let v_prev = v.detach();
    v.assign(&v.zip(grad, |v, g| v * momentum - g * rate )?)?;
    v_prev.zip(v, |p, v| p * -momentum + v * (R::one() + momentum) )
  }

  fn check(&self, slot: usize, weights: &Tensor<R>) -> Result<()> {
    check_slot(&self.v, slot, weights)
  }

  fn slots(&self) -> usize {
    self.v.len()
  }
}


/// Adaptive Movement Estimation strategy (ADAM)

#[derive(Debug, Clone)]
pub struct Adam<R: Real> {
  pub beta1: R,
  pub beta2: R,
  pub epsilon: R,
  m: HashMap<usize, Tensor<R>>,
  v: HashMap<usize, Tensor<R>>,
}

impl<R: Real> Adam<R> {
  pub fn new(beta1: R, beta2: R) -> Self {
    Self {
      beta1,
      beta2,
      epsilon: R::cast(1e-8),
      m: HashMap::new(),
      v: HashMap::new(),
    }
  }
}

impl<R: Real> Default for Adam<R> {
  fn default() -> Self {
    Self::new(R::cast(0.9), R::cast(0.999))
  }
}

impl<R: Real> Strategy<R> for Adam<R> {
  fn update(&mut self, slot: usize, weights: &Tensor<R>, grad: &Tensor<R>, rate: R, step: usize) -> Result<Tensor<R>> {
    let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
    let m = slot_state(&mut self.m, slot, weights)?;
    m.assign(&m.zip(grad, |m, g| m * beta1 + g * (R::one() - beta1) )?)?;
    let m = m.detach();
    let v = slot_state(&mut self.v, slot, weights)?;
    v.assign(&v.zip(grad, |v, g| v * beta2 + g * g * (R::one() - beta2) )?)?;
    let step = R::cast(step as f64);
    let m_correction = R::one() - beta1.powf(step);
    let v_correction = R::one() - beta2.powf(step);
    m.zip(v, |m, v| {
      let mt = m / m_correction;
      let vt = v / v_correction;
      mt * -rate / (vt.sqrt() + epsilon)
    })
  }

  fn check(&self, slot: usize, weights: &Tensor<R>) -> Result<()> {
    check_slot(&self.m, slot, weights)
  }

  fn slots(&self) -> usize {
    self.m.len()
  }
}


/// Root Mean Square Propagation

#[derive(Debug, Clone)]
pub struct RMSProp<R: Real> {
  pub decay: R,
  pub epsilon: R,
  cache: HashMap<usize, Tensor<R>>,
}

impl<R: Real> RMSProp<R> {
  pub fn new(decay: R) -> Self {
    Self {
      decay,
      epsilon: R::cast(1e-8),
      cache: HashMap::new(),
    }
  }
}

impl<R: Real> Default for RMSProp<R> {
  fn default() -> Self {
    Self::new(R::cast(0.9))
  }
}

impl<R: Real> Strategy<R> for RMSProp<R> {
  fn update(&mut self, slot: usize, weights: &Tensor<R>, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    let (decay, epsilon) = (self.decay, self.epsilon);
    let cache = slot_state(&mut self.cache, slot, weights)?;
    cache.assign(&cache.zip(grad, |c, g| c * decay + g * g * (R::one() - decay) )?)?;
    grad.zip(cache, |g, c| -rate * g / (c.sqrt() + epsilon) )
  }

  fn check(&self, slot: usize, weights: &Tensor<R>) -> Result<()> {
    check_slot(&self.cache, slot, weights)
  }

  fn slots(&self) -> usize {
    self.cache.len()
  }
}
