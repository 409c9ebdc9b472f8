// This example fits a small regression model on a noisy sine wave,
// training on batches and predicting single examples.

use microseq::{
  Tensor, Sequential, CompileOpts, Tracker,
  model::{ Input, Variant },
  layer::{ FC, Activation },
  optimize::{ Optimizer, Adam },
  track::Aggregator,
};

fn main() -> microseq::Result<()> {
  env_logger::init();

  let batch_size = 16;

  // Describe the model as a chain of layers
  let mut model = Sequential::<f32>::new("sine");
  model
    .add(FC { input: 1, output: 16, activation: Some(Activation::Tanh), ..Default::default() })?
    .add(FC { input: 16, output: 1, activation: Some(Activation::Linear), ..Default::default() })?;

  // Compile all four graph variants, logging losses next to the binary
  let tracker = Tracker::in_dir(".")?.shared();
  let opts = CompileOpts::default()
    .with_optimizer(Optimizer::new(0.01, Adam::default()))
    .with_tracker(tracker.clone())
    .with_batch_size(batch_size);
  model.compile(Input::new("x", &[1, 1]), Input::new("y", &[1, 1]), opts)?;

  for episode in 0..20 {
    model.set_episode(episode);
    for _ in 0..50 {
      let x = Tensor::<f32>::rand(&[batch_size, 1], -3.0, 3.0);
      let noise = Tensor::rand(&[batch_size, 1], -0.05, 0.05);
      let y = Tensor::new(&[batch_size, 1], x.to_vec().iter().map(|x| x.sin() ).collect()).add(&noise)?;
      model.fit_batch(&x, &y)?;
    }
  }

  // Make the online graphs use what the batch graph learned
  model.sync_learnables_from(Variant::TrainBatch)?;

  for x in [-2.0, -1.0, 0.0, 1.0, 2.0] {
    let y_hat = model.predict(&Tensor::new(&[1, 1], vec![x]))?;
    println!("sin({x}) = {:.3}, predicted {:.3}", f32::sin(x), y_hat.item());
  }

  let losses = tracker.borrow().get_history("sine_train_batch_loss")?;
  for (episode, loss) in losses.aggregate(Aggregator::Mean) {
    println!("Episode {episode}: mean loss {loss:.4}");
  }
  println!("Stats written to {}", tracker.borrow().path().display());

  Ok(())
}
