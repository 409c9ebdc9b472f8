use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::{
  scalar::Real,
};


#[inline]
pub fn negative_index(i: isize, n: usize) -> usize {
  if i < 0 {
    (n as isize + i) as usize
  } else {
    i as usize
  }
}


/// Unique, monotonically increasing id shared by nodes and graphs.
/// Node ids double as their topological order.

pub fn make_id() -> usize {
  static LAST_ID: AtomicUsize = AtomicUsize::new(0);
  LAST_ID.fetch_add(1, Ordering::Relaxed)
}


// Polar Box-Muller transformation

pub fn randn<T: Real>() -> (T, T) {
  let mut rng = rand::thread_rng();
  loop {
    let u: T = rng.gen_range(-T::one(), T::one());
    let v: T = rng.gen_range(-T::one(), T::one());
    let r = u * u + v * v;
    // Try again if outside interval
    if r == T::zero() || r >= T::one() { continue }
    let c = (T::cast(-2.0) * r.ln() / r).sqrt();
    return (u * c, v * c)
  }
}
