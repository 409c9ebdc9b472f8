//! Append-only tracking of named scalar values.
//!
//! Every call to [Tracker::log_step] appends one JSON line holding the
//! current value of everything tracked:
//!
//! ```json
//! {"values":[{"name":"m_train_loss","value":0.25,"timestep":3,"episode":0}],"timestep":3,"episode":0}
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::{ File, OpenOptions };
use std::io::{ BufRead, BufReader, Seek, SeekFrom, Write };
use std::path::{ Path, PathBuf };
use std::rc::Rc;

use log::{ debug, info };
use serde::{Serialize, Deserialize, Deserializer};

use crate::{
  error::{ Error, Result },
  scalar::Real,
  variable::{ Graph, ReadHook, Variable },
};


/// A tracker shared between models.

pub type SharedTracker = Rc<RefCell<Tracker>>;


/// `"<namespace>_<name>"`

pub fn namespaced(namespace: &str, name: &str) -> String {
  format!("{namespace}_{name}")
}


enum TrackedValue {
  Node(Box<dyn Fn() -> Option<f64>>),
  Scalar(f64),
}

impl TrackedValue {
  fn scalar(&self) -> f64 {
    match self {
      // Nodes read 0 until their graph ran
      Self::Node(read) => read().unwrap_or(0.0),
      Self::Scalar(value) => *value,
    }
  }
}

impl Debug for TrackedValue {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self {
      Self::Node(_) => write!(f, "Node({})", self.scalar()),
      Self::Scalar(value) => write!(f, "Scalar({value})"),
    }
  }
}


/// Records tracked values to a JSON lines file.

#[derive(Debug)]
pub struct Tracker {
  values: Vec<(String, TrackedValue)>,
  timestep: usize,
  episode: usize,
  path: PathBuf,
  file: File,
}

impl Tracker {
  /// Track into a new, persisted temporary file named `stats*.json`.

  pub fn new() -> Result<Self> {
    let file = tempfile::Builder::new()
      .prefix("stats")
      .suffix(".json")
      .tempfile()?;
    let (file, path) = file.keep().map_err(|e| e.error )?;
    Ok(Self::with_file(file, path))
  }

  /// Track into a new file inside `dir`.

  pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self> {
    let file = tempfile::Builder::new()
      .prefix("stats")
      .suffix(".json")
      .tempfile_in(dir)?;
    let (file, path) = file.keep().map_err(|e| e.error )?;
    Ok(Self::with_file(file, path))
  }

  /// Track into `path`, appending if it exists.

  pub fn at_path(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Self::with_file(file, path))
  }

  fn with_file(file: File, path: PathBuf) -> Self {
    info!("Tracking data in {}", path.display());
    Self { values: vec![], timestep: 0, episode: 0, path, file }
  }

  pub fn shared(self) -> SharedTracker {
    Rc::new(RefCell::new(self))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn timestep(&self) -> usize {
    self.timestep
  }

  pub fn episode(&self) -> usize {
    self.episode
  }

  fn insert(&mut self, name: &str, value: TrackedValue) {
    match self.values.iter_mut().find(|(n, _)| n == name ) {
      Some(entry) => entry.1 = value,
      None => self.values.push((name.to_string(), value)),
    }
  }

  /// Track the first element of `node`.
  ///
  /// Registers a read hook, so this must happen before an execution
  /// engine is created for `graph`.

  pub fn track_node<T: Real>(&mut self, name: &str, graph: &Graph<T>, node: &Variable<T>) -> Result<()> {
    self.track_node_at(name, graph, node, 0)
  }

  /// Track the element at `index` of `node`.

  pub fn track_node_at<T: Real>(&mut self, name: &str, graph: &Graph<T>, node: &Variable<T>, index: usize) -> Result<()> {
    if index >= node.tensor().size() {
      return Err(Error::Tracker(format!("cannot track element {index} of {:?} as {name}", node.dims())))
    }
    let hook = graph.read(node)?;
    self.track_hook_at(name, hook, index);
    Ok(())
  }

  /// Track the first element captured by an existing read hook.
  /// Replaces any value of the same name.

  pub fn track_hook<T: Real>(&mut self, name: &str, hook: ReadHook<T>) {
    self.track_hook_at(name, hook, 0)
  }

  fn track_hook_at<T: Real>(&mut self, name: &str, hook: ReadHook<T>, index: usize) {
    debug!("Tracking node value {name}");
    let read = move || hook.get().and_then(|value| value.get(index) ).map(|v| v.as_f64() );
    self.insert(name, TrackedValue::Node(Box::new(read)));
  }

  pub fn track_scalar(&mut self, name: &str, value: f64) {
    debug!("Tracking scalar value {name}");
    self.insert(name, TrackedValue::Scalar(value));
  }

  pub fn get_value(&self, name: &str) -> Result<f64> {
    self.values.iter()
      .find(|(n, _)| n == name )
      .map(|(_, value)| value.scalar() )
      .ok_or_else(|| Error::Tracker(format!("{name:?} is not tracked")) )
  }

  fn scalar_mut(&mut self, name: &str) -> Result<&mut f64> {
    match self.values.iter_mut().find(|(n, _)| n == name ) {
      Some((_, TrackedValue::Scalar(value))) => Ok(value),
      Some(_) => Err(Error::Tracker(format!("{name:?} tracks a node and cannot be changed"))),
      None => Err(Error::Tracker(format!("{name:?} is not tracked"))),
    }
  }

  /// Add `amount` to a scalar value.

  pub fn inc_value(&mut self, name: &str, amount: f64) -> Result<()> {
    *self.scalar_mut(name)? += amount;
    Ok(())
  }

  pub fn zero_value(&mut self, name: &str) -> Result<()> {
    *self.scalar_mut(name)? = 0.0;
    Ok(())
  }

  pub fn value_names(&self) -> Vec<String> {
    self.values.iter().map(|(name, _)| name.clone() ).collect()
  }

  /// Current values as a history entry.

  pub fn data(&self) -> History {
    History {
      values: self.values.iter()
        .map(|(name, value)| HistoricalValue {
          name: name.clone(),
          value: value.scalar(),
          timestep: self.timestep,
          episode: self.episode,
        })
        .collect(),
      timestep: self.timestep,
      episode: self.episode,
    }
  }

  /// Append the current values as of `episode` and `timestep`.

  pub fn log_step(&mut self, episode: usize, timestep: usize) -> Result<()> {
    self.episode = episode;
    self.timestep = timestep;
    self.write()
  }

  pub fn write(&mut self) -> Result<()> {
    let line = serde_json::to_string(&self.data())?;
    writeln!(self.file, "{line}")?;
    Ok(())
  }

  fn read_all(&self) -> Result<Vec<History>> {
    let reader = BufReader::new(File::open(&self.path)?);
    let mut histories = vec![];
    for line in reader.lines() {
      let line = line?;
      if line.trim().is_empty() { continue }
      histories.push(serde_json::from_str(&line)?);
    }
    Ok(histories)
  }

  /// Every logged value called `name`, oldest first.

  pub fn get_history(&self, name: &str) -> Result<HistoricalValues> {
    Ok(HistoricalValues(
      self.read_all()?
        .into_iter()
        .flat_map(|history| history.get(name).0 )
        .collect()
    ))
  }

  /// Logged histories grouped by episode.

  pub fn get_episode_histories(&self) -> Result<BTreeMap<usize, Vec<History>>> {
    let mut episodes = BTreeMap::<usize, Vec<History>>::new();
    for history in self.read_all()? {
      episodes.entry(history.episode).or_default().push(history);
    }
    Ok(episodes)
  }

  /// Drop everything logged so far.

  pub fn clear(&mut self) -> Result<()> {
    self.file.set_len(0)?;
    self.file.seek(SeekFrom::Start(0))?;
    Ok(())
  }
}


/// A value as it was logged.
///
/// JSON has no representation for non-finite numbers. They are logged
/// as `null` and read back as NaN.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalValue {
  pub name: String,
  #[serde(deserialize_with = "null_as_nan")]
  pub value: f64,
  pub timestep: usize,
  pub episode: usize,
}


fn null_as_nan<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
  Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}


/// One logged line.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
  pub values: Vec<HistoricalValue>,
  pub timestep: usize,
  pub episode: usize,
}

impl History {
  pub fn get(&self, name: &str) -> HistoricalValues {
    HistoricalValues(self.values.iter().filter(|value| value.name == name ).cloned().collect())
  }
}


/// How to combine the values logged during one episode.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
  Mean,
  Max,
  Min,
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalValues(pub Vec<HistoricalValue>);

impl HistoricalValues {
  pub fn scalars(&self) -> Vec<f64> {
    self.0.iter().map(|value| value.value ).collect()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// One aggregate per episode, ordered by episode.

  pub fn aggregate(&self, aggregator: Aggregator) -> Vec<(usize, f64)> {
    let mut episodes = BTreeMap::<usize, Vec<f64>>::new();
    for value in &self.0 {
      episodes.entry(value.episode).or_default().push(value.value);
    }
    episodes.into_iter()
      .map(|(episode, values)| {
        let aggregate = match aggregator {
          Aggregator::Mean => values.iter().sum::<f64>() / values.len() as f64,
          Aggregator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
          Aggregator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        };
        (episode, aggregate)
      })
      .collect()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ tensor::Tensor, variable::TapeMachine };

  #[test]
  fn scalars() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = Tracker::in_dir(dir.path()).unwrap();
    tracker.track_scalar("reward", 1.0);
    tracker.inc_value("reward", 2.5).unwrap();
    assert_eq!(tracker.get_value("reward").unwrap(), 3.5);
    tracker.zero_value("reward").unwrap();
    assert_eq!(tracker.get_value("reward").unwrap(), 0.0);
    assert!(tracker.inc_value("missing", 1.0).is_err());
    assert_eq!(tracker.value_names(), vec!["reward".to_string()]);
  }

  #[test]
  fn non_finite_values_read_back_as_nan() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = Tracker::in_dir(dir.path()).unwrap();
    tracker.track_scalar("ratio", f64::NAN);
    tracker.track_scalar("reward", 1.0);
    tracker.log_step(0, 0).unwrap();
    tracker.track_scalar("ratio", f64::INFINITY);
    tracker.log_step(0, 1).unwrap();
    tracker.track_scalar("ratio", 0.5);
    tracker.log_step(0, 2).unwrap();

    let ratio = tracker.get_history("ratio").unwrap().scalars();
    assert_eq!(ratio.len(), 3);
    assert!(ratio[0].is_nan() && ratio[1].is_nan());
    assert_eq!(ratio[2], 0.5);
    assert_eq!(tracker.get_history("reward").unwrap().scalars(), vec![1.0; 3]);
  }

  #[test]
  fn nodes_follow_their_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = Tracker::in_dir(dir.path()).unwrap();
    let graph = Graph::<f32>::new("g");
    let x = graph.input("x", &[2]);
    let y = x.square().unwrap();
    tracker.track_node_at("y1", &graph, &y, 1).unwrap();
    assert!(tracker.track_node_at("y9", &graph, &y, 9).is_err());
    let mut machine = TapeMachine::new(&graph);
    assert_eq!(tracker.get_value("y1").unwrap(), 0.0);
    x.tensor().assign(&Tensor::vec(&[2.0, 3.0])).unwrap();
    machine.run_all().unwrap();
    assert_eq!(tracker.get_value("y1").unwrap(), 9.0);
    assert!(tracker.inc_value("y1", 1.0).is_err());
  }

  #[test]
  fn same_name_replaces() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = Tracker::in_dir(dir.path()).unwrap();
    tracker.track_scalar("a", 1.0);
    tracker.track_scalar("a", 2.0);
    assert_eq!(tracker.data().values.len(), 1);
    assert_eq!(tracker.get_value("a").unwrap(), 2.0);
  }

  #[test]
  fn history_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = Tracker::at_path(dir.path().join("stats.json")).unwrap();
    tracker.track_scalar(&namespaced("m", "loss"), 1.0);
    tracker.log_step(0, 0).unwrap();
    tracker.inc_value("m_loss", 1.0).unwrap();
    tracker.log_step(0, 1).unwrap();
    tracker.inc_value("m_loss", 4.0).unwrap();
    tracker.log_step(1, 2).unwrap();

    let history = tracker.get_history("m_loss").unwrap();
    assert_eq!(history.scalars(), vec![1.0, 2.0, 6.0]);
    assert_eq!(history.0[2].timestep, 2);
    assert_eq!(history.aggregate(Aggregator::Mean), vec![(0, 1.5), (1, 6.0)]);
    assert_eq!(history.aggregate(Aggregator::Max), vec![(0, 2.0), (1, 6.0)]);

    let episodes = tracker.get_episode_histories().unwrap();
    assert_eq!(episodes[&0].len(), 2);
    assert_eq!(episodes[&1].len(), 1);

    let line = std::fs::read_to_string(tracker.path()).unwrap();
    let first: serde_json::Value = serde_json::from_str(line.lines().next().unwrap()).unwrap();
    assert_eq!(first["values"][0]["name"], "m_loss");
    assert_eq!(first["values"][0]["value"], 1.0);
    assert_eq!(first["episode"], 0);

    tracker.clear().unwrap();
    assert!(tracker.get_history("m_loss").unwrap().is_empty());
    tracker.log_step(2, 3).unwrap();
    assert_eq!(tracker.get_history("m_loss").unwrap().len(), 1);
  }

  #[test]
  fn default_file_is_kept() {
    let tracker = Tracker::new().unwrap();
    let path = tracker.path().to_path_buf();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("stats") && name.ends_with(".json"));
    drop(tracker);
    assert!(path.exists());
    std::fs::remove_file(path).unwrap();
  }
}
