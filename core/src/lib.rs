//! # syncbench
//!
//! `syncbench` measures the training throughput of convolutional image classifiers under
//! different distributed optimizer strategies, using synthetic data.
//!
//! Everything runs on the **CPU**: tensors and kernels are plain Rust parallelized with
//! `rayon`, and the "cluster" is a group of in-process worker threads talking over channels.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Core N-dimensional tensor implementation.
//! - [`nn`]: Layers with explicit forward/backward passes (Conv2d, Linear, pooling).
//! - [`models`]: ConvNet and ResNet architectures, built by name.
//! - [`optim`]: Base optimizers (SGD, Adam).
//! - [`distributed`]: Collective backend, versioned model store, synchronization strategies.
//! - [`bench`] / [`cluster`]: The benchmark driver and the multi-peer runner.
//!
//! ## Example
//!
//! ```rust
//! use syncbench::{cluster, RunConfig};
//! use syncbench::models::ModelKind;
//!
//! let config = RunConfig {
//!     model: ModelKind::ConvNet,
//!     batch_size: 2,
//!     image_size: 8,
//!     num_classes: 4,
//!     num_warmup_batches: 1,
//!     num_batches_per_iter: 1,
//!     num_iters: 2,
//!     ..RunConfig::default()
//! };
//!
//! let mut out = Vec::new();
//! let report = cluster::run(&config, &mut out).unwrap();
//! assert_eq!(report.peers[0].throughputs.len(), 2);
//! ```

pub mod bench;
pub mod cluster;
pub mod config;
pub mod data;
pub mod device;
pub mod distributed;
pub mod error;
pub mod loss;
pub mod models;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod trainer;

pub use bench::{BenchReport, Summary};
pub use cluster::RunReport;
pub use config::RunConfig;
pub use device::Device;
pub use error::BenchError;
pub use tensor::{Tensor, TensorElem, TensorError};
