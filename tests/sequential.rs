use microseq::{
  Tensor, Sequential, CompileOpts, SyncPolicy, Tracker, Error,
  scalar::DType,
  optimize::{ Optimizer, SGD },
  layer::{ Activation, Conv2D, Dropout, Flatten, Init, MaxPooling2D, FC },
  model::{ CrossEntropy, Input, Variant },
};


fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn regression(name: &str, init: Option<Init>) -> Sequential<f32> {
  let mut model = Sequential::new(name);
  model
    .add(FC {
      input: 5,
      output: 3,
      activation: Some(Activation::Sigmoid),
      init,
      bias_init: init,
      ..Default::default()
    }).unwrap()
    .add(FC {
      input: 3,
      output: 1,
      activation: Some(Activation::Linear),
      init,
      bias_init: init,
      ..Default::default()
    }).unwrap();
  model
}

fn io() -> (Input, Input) {
  (Input::new("x", &[1,5]), Input::new("y", &[1,1]))
}

fn values(model: &Sequential<f32>, variant: Variant) -> Vec<Tensor<f32>> {
  model.variant_learnables(variant).unwrap()
    .iter()
    .map(|learnable| learnable.tensor().detach() )
    .collect()
}

fn batch_x(n: usize) -> Tensor<f32> {
  Tensor::arrange(&[n, 5], 0.0, 0.1)
}


#[test]
fn learnables_match_after_compile() {
  init_logging();
  let mut model = regression("match", None);
  let (x, y) = io();
  model.compile(x, y, CompileOpts::default().without_tracker()).unwrap();
  let train = values(&model, Variant::TrainSingle);
  assert_eq!(train.len(), 4);
  for variant in Variant::ALL {
    let learnables = model.variant_learnables(variant).unwrap();
    assert_eq!(learnables.len(), train.len());
    assert_eq!(values(&model, variant), train);
    assert_eq!(learnables[0].graph_id(), model.graph(variant).unwrap().id());
  }
}

#[test]
fn fit_changes_learnables_with_gradient() {
  init_logging();
  let mut model = regression("fit", None);
  let (x, y) = io();
  model.compile(x, y, CompileOpts::default().without_tracker()).unwrap();
  let before = values(&model, Variant::TrainSingle);

  // Zero inputs give the first weights a zero gradient
  model.fit(&Tensor::zeros(&[1,5]), &Tensor::ones(&[1,1])).unwrap();
  let after = values(&model, Variant::TrainSingle);
  assert_eq!(after[0], before[0]);
  for i in 1..4 {
    assert_ne!(after[i], before[i]);
  }

  model.fit(&Tensor::ones(&[1,5]), &Tensor::ones(&[1,1])).unwrap();
  assert_ne!(values(&model, Variant::TrainSingle)[0], before[0]);

  // Other variants only follow on sync
  assert_eq!(values(&model, Variant::OnlineSingle), before);
  model.sync_learnables().unwrap();
  assert_eq!(values(&model, Variant::OnlineSingle), values(&model, Variant::TrainSingle));
}

#[test]
fn clone_learnables_is_exact() {
  init_logging();
  let (x, y) = io();
  let mut source = regression("source", None);
  source.compile(x.clone(), y.clone(), CompileOpts::default().without_tracker()).unwrap();
  source.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();

  let mut target = regression("target", None);
  target.compile(x, y, CompileOpts::default().without_tracker()).unwrap();
  source.clone_learnables_to(&target).unwrap();

  let expected = values(&source, Variant::TrainSingle);
  for variant in Variant::ALL {
    for (a, b) in values(&target, variant).iter().zip(&expected) {
      let bits = |t: &Tensor<f32>| t.to_vec().iter().map(|v| v.to_bits() ).collect::<Vec<_>>();
      assert_eq!(bits(a), bits(b));
    }
  }
}

#[test]
fn resize_batch() {
  init_logging();
  let mut model = regression("resize", None);
  let (x, y) = io();
  model.compile(x, y, CompileOpts::default().without_tracker().with_batch_size(4)).unwrap();
  model.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();
  let single = values(&model, Variant::TrainSingle);
  let online = values(&model, Variant::OnlineSingle);

  model.resize_batch(6).unwrap();
  assert_eq!(model.batch_size().unwrap(), 6);
  assert_eq!(values(&model, Variant::TrainSingle), single);
  assert_eq!(values(&model, Variant::OnlineSingle), online);
  assert_eq!(values(&model, Variant::TrainBatch), single);

  model.fit_batch(&batch_x(6), &Tensor::zeros(&[6,1])).unwrap();
  assert_eq!(values(&model, Variant::TrainSingle), single);
  assert!(matches!(model.fit_batch(&batch_x(4), &Tensor::zeros(&[4,1])), Err(Error::ShapeMismatch(_))));
  assert_eq!(model.predict_batch(&batch_x(6)).unwrap().dims(), &[6,1]);
  assert!(model.resize_batch(0).is_err());
}

#[test]
fn batch_loss_decreases() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let tracker = Tracker::in_dir(dir.path()).unwrap().shared();
  let mut model = regression("scenario", Some(Init::Constant(0.5)));
  let (x, y) = io();
  let opts = CompileOpts::default()
    .with_tracker(tracker.clone())
    .with_batch_size(4);
  model.compile(x, y, opts).unwrap();

  let x = Tensor::new(&[4,5], (0..20).map(|i| (i % 7) as f32 * 0.25 - 0.5 ).collect());
  let y = Tensor::zeros(&[4,1]);
  for _ in 0..50 {
    model.fit_batch(&x, &y).unwrap();
  }

  let history = tracker.borrow().get_history("scenario_train_batch_loss").unwrap().scalars();
  assert_eq!(history.len(), 50);
  let last = &history[40..];
  for pair in last.windows(2) {
    assert!(pair[1] <= pair[0] + 1e-6, "loss went up: {pair:?}");
  }
  assert!(history[49] < history[0]);
  assert_eq!(tracker.borrow().get_history("scenario_train_loss").unwrap().len(), 50);
}

#[test]
fn input_shape_mismatch() {
  init_logging();
  let mut model = regression("mismatch", None);
  let err = model.compile(Input::new("x", &[1,4]), Input::new("y", &[1,1]), CompileOpts::default().without_tracker());
  assert!(matches!(err, Err(Error::Compile(_))));

  let mut model = regression("mismatch", None);
  let (x, y) = io();
  model.compile(x, y, CompileOpts::default().without_tracker()).unwrap();
  let before = values(&model, Variant::TrainSingle);
  let err = model.fit(&Tensor::zeros(&[2,5]), &Tensor::zeros(&[1,1])).unwrap_err();
  assert!(matches!(err, Error::ShapeMismatch(_)));
  assert!(matches!(model.predict(&Tensor::zeros(&[2,5])), Err(Error::ShapeMismatch(_))));
  assert_eq!(values(&model, Variant::TrainSingle), before);
  assert_eq!(model.timestep(), 0);
}

#[test]
fn compile_errors() {
  init_logging();
  let mut model = Sequential::<f32>::new("errors");
  assert!(matches!(model.add(FC { input: 0, output: 2, ..Default::default() }), Err(Error::InvalidConfig(_))));
  assert!(matches!(model.add(Dropout { probability: Some(1.1), ..Default::default() }), Err(Error::InvalidConfig(_))));
  assert!(model.chain().is_empty());

  model.add(FC { input: 5, output: 2, ..Default::default() }).unwrap();
  let (x, y) = io();
  let err = model.compile(x.clone(), Input::new("y", &[1,3]), CompileOpts::default().without_tracker());
  assert!(matches!(err, Err(Error::Compile(_))));
  assert!(!model.is_compiled());

  let err = model.compile(x.clone().with_dtype(DType::Float64), y.clone(), CompileOpts::default().without_tracker());
  assert!(matches!(err, Err(Error::Compile(_))));

  model.fwd(&Input::new("z", &[1,5]));
  let err = model.compile(x, y, CompileOpts::default().without_tracker());
  assert!(matches!(err, Err(Error::Compile(_))));
}

#[test]
fn shared_optimizer() {
  init_logging();
  let mut model = regression("optimizer", None);
  let (x, y) = io();
  model.compile(x, y, CompileOpts::default().without_tracker().with_batch_size(3)).unwrap();
  model.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();
  model.fit_batch(&batch_x(3), &Tensor::ones(&[3,1])).unwrap();
  let optimizer = model.optimizer().unwrap();
  assert_eq!(optimizer.steps(), 2);
  assert_eq!(optimizer.state_slots(), 4);
}

#[test]
fn sgd_and_sync_after_step() {
  init_logging();
  let mut model = regression("sgd", None);
  let (x, y) = io();
  let opts = CompileOpts::default()
    .without_tracker()
    .with_optimizer(Optimizer::new(0.1, SGD))
    .with_sync(SyncPolicy::AfterStep)
    .with_batch_size(2);
  model.compile(x, y, opts).unwrap();
  let before = model.predict(&batch_x(1)).unwrap();
  model.fit_batch(&batch_x(2), &Tensor::fill(&[2,1], 5.0)).unwrap();
  let after = model.predict(&batch_x(1)).unwrap();
  assert!(after.item() > before.item());
  assert_eq!(values(&model, Variant::TrainSingle), values(&model, Variant::TrainBatch));
}

#[test]
fn non_finite_loss_fails_and_recovers() {
  init_logging();
  let mut model = regression("nan", None);
  let (x, y) = io();
  model.compile(x, y, CompileOpts::default().without_tracker()).unwrap();
  let before = values(&model, Variant::TrainSingle);
  let bad = Tensor::new(&[1,5], vec![f32::NAN, 0.0, 0.0, 0.0, 0.0]);
  assert!(matches!(model.fit(&bad, &Tensor::ones(&[1,1])), Err(Error::Execution(_))));
  assert_eq!(values(&model, Variant::TrainSingle), before);
  model.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();
  assert_eq!(model.timestep(), 1);
}

#[test]
fn save_and_load_learnables() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("learnables.bin");
  let (x, y) = io();

  let mut source = regression("save", None);
  source.compile(x.clone(), y.clone(), CompileOpts::default().without_tracker()).unwrap();
  source.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();
  source.save_learnables(&path).unwrap();

  let mut target = regression("load", None);
  target.compile(x.clone(), y.clone(), CompileOpts::default().without_tracker()).unwrap();
  target.load_learnables(&path).unwrap();
  for variant in Variant::ALL {
    assert_eq!(values(&target, variant), values(&source, Variant::TrainSingle));
  }

  let mut other = Sequential::<f32>::new("other");
  other.add(FC { input: 5, output: 1, ..Default::default() }).unwrap();
  other.compile(x, y, CompileOpts::default().without_tracker()).unwrap();
  assert!(other.load_learnables(&path).is_err());
  assert!(other.load_learnables(dir.path().join("missing.bin")).is_err());
}

#[test]
fn corrupt_learnables_are_rejected() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("corrupt.bin");
  // Shape [2, 1] with a single value
  std::fs::write(&path, postcard::to_allocvec(&vec![(vec![2usize, 1], vec![0.5f32])]).unwrap()).unwrap();

  let mut model = Sequential::<f32>::new("corrupt");
  model.add(FC { input: 2, output: 1, no_bias: true, ..Default::default() }).unwrap();
  model.compile(Input::new("x", &[1,2]), Input::new("y", &[1,1]), CompileOpts::default().without_tracker()).unwrap();
  let before = values(&model, Variant::TrainSingle);
  assert!(matches!(model.load_learnables(&path), Err(Error::Encoding(_))));
  assert_eq!(values(&model, Variant::TrainSingle), before);
  model.fit(&Tensor::ones(&[1,2]), &Tensor::ones(&[1,1])).unwrap();
}

#[test]
fn episodes_are_logged() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let tracker = Tracker::at_path(dir.path().join("stats.json")).unwrap().shared();
  let mut model = regression("episodes", None);
  let (x, y) = io();
  let opts = CompileOpts::default()
    .with_tracker(tracker.clone())
    .with_metrics(&[microseq::Metric::TrainLoss]);
  model.compile(x, y, opts).unwrap();
  model.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();
  model.set_episode(1);
  model.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();
  model.fit(&batch_x(1), &Tensor::ones(&[1,1])).unwrap();

  let tracker = tracker.borrow();
  assert_eq!(tracker.value_names(), vec!["episodes_train_loss".to_string()]);
  let episodes = tracker.get_episode_histories().unwrap();
  assert_eq!(episodes[&0].len(), 1);
  assert_eq!(episodes[&1].len(), 2);
  assert_eq!(episodes[&1][1].timestep, 2);
  assert!(episodes[&0][0].values[0].value > 0.0);
}

#[test]
fn convolutional_classifier() {
  init_logging();
  let mut model = Sequential::<f64>::new("cnn");
  model
    .add(Conv2D { input: 1, output: 4, width: 3, height: 3, ..Default::default() }).unwrap()
    .add(MaxPooling2D::default()).unwrap()
    .add(Flatten::default()).unwrap()
    .add(Dropout { probability: Some(0.2), ..Default::default() }).unwrap()
    .add(FC { input: 64, output: 3, activation: Some(Activation::softmax()), ..Default::default() }).unwrap();
  let x = Input::new("image", &[1,1,8,8]).with_dtype(DType::Float64);
  let y = Input::new("label", &[1,3]).with_dtype(DType::Float64);
  let opts = CompileOpts::default().without_tracker().with_loss(CrossEntropy).with_batch_size(2);
  model.compile(x, y, opts).unwrap();

  let image = Tensor::rand(&[1,1,8,8], 0.0, 1.0);
  let label = Tensor::new(&[1,3], vec![0.0, 1.0, 0.0]);
  model.fit(&image, &label).unwrap();
  model.fit_batch(&Tensor::rand(&[2,1,8,8], 0.0, 1.0), &Tensor::new(&[2,3], vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0])).unwrap();

  // Dropout is inactive while predicting
  let a = model.predict(&image).unwrap();
  let b = model.predict(&image).unwrap();
  assert_eq!(a, b);
  assert!((a.sum_all().item() - 1.0).abs() < 1e-9);
}
