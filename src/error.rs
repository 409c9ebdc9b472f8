use thiserror::Error;


/// Errors raised while configuring, compiling or running a model.

#[derive(Debug, Error)]
pub enum Error {
  /// A layer config is missing a required hyperparameter or has one out of range.
  #[error("invalid config: {0}")]
  InvalidConfig(String),

  /// A graph could not be built from the given chain, inputs and loss.
  #[error("compile error: {0}")]
  Compile(String),

  /// A value doesn't fit the placeholder or operand it was given to.
  #[error("shape mismatch: {0}")]
  ShapeMismatch(String),

  /// Forward or backward execution failed mid-graph.
  #[error("execution failed: {0}")]
  Execution(String),

  #[error("model has not been compiled")]
  NotCompiled,

  #[error("tracker: {0}")]
  Tracker(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Encoding(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub(crate) fn config(msg: impl Into<String>) -> Self {
    Self::InvalidConfig(msg.into())
  }

  pub(crate) fn compile(msg: impl Into<String>) -> Self {
    Self::Compile(msg.into())
  }

  pub(crate) fn shape(msg: impl Into<String>) -> Self {
    Self::ShapeMismatch(msg.into())
  }

  /// Re-tag an engine error raised while a graph is being built.

  pub(crate) fn during_compile(self) -> Self {
    match self {
      Self::Compile(_) | Self::InvalidConfig(_) => self,
      other => Self::Compile(other.to_string()),
    }
  }

  /// Re-tag an engine error raised while a graph is being executed.

  pub(crate) fn during_run(self) -> Self {
    match self {
      Self::Execution(_) => self,
      other => Self::Execution(other.to_string()),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn retagging() {
    let err = Error::shape("[1, 4] vs [2, 4]").during_compile();
    assert!(matches!(err, Error::Compile(ref msg) if msg.contains("[2, 4]")));

    let err = Error::config("missing output").during_compile();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let err = Error::shape("bad").during_run();
    assert!(matches!(err, Error::Execution(_)));
  }
}
