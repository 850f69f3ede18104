//! Run configuration.

use crate::distributed::Strategy;
use crate::models::ModelKind;
use crate::optim::OptimizerKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Learning rate must be finite and non-negative, got {0}")]
    InvalidLearningRate(f32),
    #[error("Weight decay must be finite and non-negative, got {0}")]
    InvalidWeightDecay(f32),
}

/// Everything one benchmark run needs to know, fixed before the first step.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub model: ModelKind,
    pub batch_size: usize,
    pub num_warmup_batches: usize,
    pub num_batches_per_iter: usize,
    pub num_iters: usize,
    /// Recorded in the report only; steps always run eagerly.
    pub eager: bool,
    pub no_cuda: bool,
    pub strategy: Strategy,
    pub optimizer: OptimizerKind,
    /// Number of in-process peers.
    pub workers: usize,
    pub image_size: usize,
    pub num_classes: usize,
    pub learning_rate: f32,
    /// Decoupled weight decay, used by adam only.
    pub weight_decay: f32,
    pub seed: u64,
    /// Where to write the JSON report, if anywhere.
    pub report: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::ResNet50,
            batch_size: 32,
            num_warmup_batches: 10,
            num_batches_per_iter: 10,
            num_iters: 10,
            eager: false,
            no_cuda: false,
            strategy: Strategy::SyncSgd,
            optimizer: OptimizerKind::Sgd,
            workers: 1,
            image_size: 224,
            num_classes: 1000,
            learning_rate: 0.01,
            weight_decay: 0.0,
            seed: 42,
            report: None,
        }
    }
}

impl RunConfig {
    /// Rejects settings that would leave the benchmark with nothing to measure.
    ///
    /// Warmup may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("batch size", self.batch_size),
            ("number of batches per iteration", self.num_batches_per_iter),
            ("number of iterations", self.num_iters),
            ("number of workers", self.workers),
            ("image size", self.image_size),
            ("number of classes", self.num_classes),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigError::InvalidWeightDecay(self.weight_decay));
        }
        Ok(())
    }
}
