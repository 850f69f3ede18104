use crate::config::ConfigError;
use crate::distributed::{CommError, DistributedError, StoreError};
use crate::models::ModelError;
use crate::optim::OptimError;
use crate::tensor::TensorError;
use thiserror::Error;

/// Top-level error for a benchmark run.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Optim(#[from] OptimError),
    #[error(transparent)]
    Distributed(#[from] DistributedError),
    #[error("Worker {rank} panicked")]
    WorkerPanicked { rank: usize },
    #[error("Failed to serialize report")]
    Report(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CommError> for BenchError {
    fn from(err: CommError) -> Self {
        BenchError::Distributed(err.into())
    }
}

impl From<StoreError> for BenchError {
    fn from(err: StoreError) -> Self {
        BenchError::Distributed(err.into())
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
