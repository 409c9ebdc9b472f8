//! Sequential neural network models on a tiny reverse-mode autodiff engine.
//! Few dependencies. CPU only.
//!
//! # Features
//!
//! - **Declarative layers**: Fully connected, convolution, max pooling, flatten,
//! reshape, dropout and activation layers are described by plain, serializable
//! config structs that get validated as they are added to a model.
//!
//! - **Four graphs per model**: Every model is compiled into graphs for training
//! on single examples and on batches, plus matching graphs for prediction.
//! Learnable values are copied between them at explicit synchronization points.
//!
//! - **Eager graph construction**: Operations evaluate while a graph is built,
//! so shape errors surface at compile time rather than during training.
//!
//! - **Optimization**: Includes a range of standard optimizers, such as ADAM and Nesterov.
//!
//! - **Tracking**: Training losses get logged to an append-only JSON lines file.
//!
//! # Examples
//!
//! Fitting a small regression model:
//! ```
//! use microseq::{ Tensor, Sequential, CompileOpts, model::Input, layer::{ FC, Activation } };
//!
//! let mut model = Sequential::<f32>::new("demo");
//! model
//!   .add(FC { input: 3, output: 4, activation: Some(Activation::Sigmoid), ..Default::default() }).unwrap()
//!   .add(FC { input: 4, output: 1, activation: Some(Activation::Linear), ..Default::default() }).unwrap();
//! model.compile(Input::new("x", &[1, 3]), Input::new("y", &[1, 1]), CompileOpts::default().without_tracker()).unwrap();
//!
//! let x = Tensor::new(&[1, 3], vec![0.5, -1.0, 2.0]);
//! let y = Tensor::new(&[1, 1], vec![1.0]);
//! for _ in 0..10 {
//!   model.fit(&x, &y).unwrap();
//! }
//! model.sync_learnables().unwrap();
//! assert_eq!(model.predict(&x).unwrap().dims(), &[1, 1]);
//! ```
//!
//! Using the engine directly:
//! ```
//! use microseq::{ Tensor, Graph, TapeMachine, optimize::{ Optimizer, Adam } };
//!
//! let graph = Graph::new("quadratic");
//! let w = graph.learnable("w", Tensor::vec(&[0.0]));
//! let target = graph.constant(Tensor::vec(&[3.0]));
//! let cost = w.sub(&target).unwrap().square().unwrap().sum(0).unwrap();
//! graph.grad(&cost, &[w.clone()]).unwrap();
//!
//! let mut machine = TapeMachine::new(&graph).bind_dual_values(&[w.clone()]).unwrap();
//! let mut optimizer = Optimizer::new(0.1, Adam::default());
//! for _ in 0..100 {
//!   machine.run_all().unwrap();
//!   optimizer.step(&[w.clone()]).unwrap();
//!   machine.reset();
//! }
//! ```
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)*: Accelerated matrix math using [matrixmultiply] crate.
//! - `rayon`: Convolutions run in parallel over the batch dimension.

mod internal;
mod shape;
mod tensor;
mod variable;

pub mod error;
pub mod scalar;
pub mod optimize;
pub mod layer;
pub mod model;
pub mod track;

pub use error::{ Error, Result };
pub use shape::Shape;
pub use tensor::{ Tensor, Conv2dParams, Pool2dParams };
pub use variable::{ Variable, NodeKind, Graph, ReadHook, TapeMachine, UnaryOp, BinaryOp };
pub use model::{ Sequential, CompileOpts, Metric, SyncPolicy };
pub use track::{ Tracker, SharedTracker };
