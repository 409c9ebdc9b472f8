use log::debug;

use crate::{
  error::{ Error, Result },
  scalar::Real,
  model::{ Compiled, Sequential, Variant },
};


impl<T: Real> Compiled<T> {
  /// Copy the learnable values of `source` into every other variant.

  pub(super) fn sync_from(&self, source: Variant) -> Result<()> {
    let values = self.graph(source).learnable_values();
    for variant in Variant::ALL {
      if variant == source { continue }
      self.graph(variant).assign_learnables(&values)?;
    }
    debug!("Synchronized {} learnables from {source}", values.len());
    Ok(())
  }
}


impl<T: Real> Sequential<T> {
  /// Copy the learnables of [Variant::TrainSingle] into the other variants.

  pub fn sync_learnables(&self) -> Result<()> {
    self.sync_learnables_from(Variant::TrainSingle)
  }

  /// Copy the learnables of `variant` into the other three, e.g. after
  /// training with [fit_batch](Sequential::fit_batch).

  pub fn sync_learnables_from(&self, variant: Variant) -> Result<()> {
    self.compiled()?.sync_from(variant)
  }

  /// Make every variant of `target` hold this model's
  /// [Variant::TrainSingle] learnable values.

  pub fn clone_learnables_to(&self, target: &Sequential<T>) -> Result<()> {
    let values = self.compiled()?.train.learnable_values();
    let target = target.compiled()?;
    if target.train.learnables().len() != values.len() {
      return Err(Error::shape(format!(
        "models must be identical to clone learnables, {} has {} and {} has {}",
        self.name, values.len(), target.train.graph().name(), target.train.learnables().len()
      )))
    }
    target.train.assign_learnables(&values)?;
    target.sync_from(Variant::TrainSingle)
  }
}
