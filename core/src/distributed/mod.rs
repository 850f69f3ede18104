//! # Distributed training strategies
//!
//! Every worker thread holds a full replica of the model (**data parallelism**) and talks to its
//! peers through a [`CollectiveBackend`]. What differs between strategies is *what* gets
//! synchronized and *when*:
//!
//! * **Synchronous SGD** averages gradients with an all-reduce before every update, so replicas
//!   stay identical.
//! * **Synchronous model averaging** pulls every replica part of the way toward the global mean
//!   of the parameters, then applies local gradients.
//! * **Asynchronous peer averaging** never blocks on the group: each step mixes the local model
//!   with the latest model some random peer has published to the [`PeerModelStore`].
//!
//! ## Module Contents
//!
//! * [`CollectiveBackend`]: the communication interface, implemented in-process by
//!   [`RingBackend`] (ring all-reduce over channels).
//! * [`VersionedStore`] / [`PeerModelStore`]: bounded, versioned model snapshots.
//! * [`Strategy`]: the closed set of strategies, selected by name, and
//!   [`Strategy::wrap`] which turns a base optimizer into a [`DistributedOptimizer`].

pub mod backend;
pub mod optimizers;
pub mod ring;
pub mod store;
pub mod strategy;

pub use backend::CollectiveBackend;
pub use optimizers::{
    AdaptiveSgd, DistributedOptimizer, Ideal, PeerModelAveraging, SyncModelAveraging, SyncSgd,
};
pub use ring::RingBackend;
pub use store::{PeerModelStore, StoreError, VersionedStore};
pub use strategy::{PeerContext, Strategy};

use crate::optim::OptimError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("Rank {rank}: ring neighbor disconnected")]
    Disconnected { rank: usize },
    #[error("Received chunk of {got} elements, expected {expected}")]
    ChunkMismatch { expected: usize, got: usize },
    #[error("Root {root} out of range for world size {world_size}")]
    InvalidRoot { root: usize, world_size: usize },
}

#[derive(Error, Debug)]
pub enum DistributedError {
    #[error(
        "Unknown strategy '{0}', expected one of: \
         sync-sgd, async-sgd, sync-sgd-nccl, ideal, ada-sgd, sma-sgd"
    )]
    UnknownStrategy(String),
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Optim(#[from] OptimError),
}

pub type Result<T> = std::result::Result<T, DistributedError>;
