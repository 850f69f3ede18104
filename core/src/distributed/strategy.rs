use super::optimizers::{
    AdaptiveSgd, DistributedOptimizer, Ideal, PeerModelAveraging, SyncModelAveraging, SyncSgd,
};
use super::{CollectiveBackend, DistributedError, PeerModelStore};
use crate::optim::Optimizer;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Model-averaging step size for `sma-sgd`.
pub const SMA_ALPHA: f32 = 0.1;

/// Number of model-averaging steps `ada-sgd` takes before switching to synchronous SGD.
pub const ADA_CHANGE_STEP: u64 = 10;

/// Everything a worker shares with its peers.
#[derive(Clone)]
pub struct PeerContext {
    pub backend: Arc<dyn CollectiveBackend>,
    pub store: Arc<PeerModelStore>,
    /// Seeds per-peer randomness such as peer selection.
    pub seed: u64,
}

impl fmt::Debug for PeerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerContext")
            .field("rank", &self.backend.rank())
            .field("world_size", &self.backend.world_size())
            .field("seed", &self.seed)
            .finish()
    }
}

/// Distributed optimizer strategies selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Per-tensor gradient all-reduce.
    SyncSgd,
    /// Random-peer model averaging through the peer store.
    AsyncSgd,
    /// Gradient all-reduce over one fused buffer.
    SyncSgdNccl,
    /// No communication.
    Ideal,
    /// Model averaging first, synchronous SGD later.
    AdaSgd,
    /// Synchronous model averaging.
    SmaSgd,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::SyncSgd,
        Strategy::AsyncSgd,
        Strategy::SyncSgdNccl,
        Strategy::Ideal,
        Strategy::AdaSgd,
        Strategy::SmaSgd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SyncSgd => "sync-sgd",
            Strategy::AsyncSgd => "async-sgd",
            Strategy::SyncSgdNccl => "sync-sgd-nccl",
            Strategy::Ideal => "ideal",
            Strategy::AdaSgd => "ada-sgd",
            Strategy::SmaSgd => "sma-sgd",
        }
    }

    /// Wraps `base` with this strategy's synchronization.
    pub fn wrap(
        &self,
        base: Box<dyn Optimizer>,
        ctx: &PeerContext,
    ) -> Box<dyn DistributedOptimizer> {
        let backend = Arc::clone(&ctx.backend);
        match self {
            Strategy::SyncSgd => Box::new(SyncSgd::new(base, backend, false)),
            Strategy::SyncSgdNccl => Box::new(SyncSgd::new(base, backend, true)),
            Strategy::AsyncSgd => Box::new(PeerModelAveraging::new(
                base,
                backend,
                Arc::clone(&ctx.store),
                ctx.seed,
            )),
            Strategy::SmaSgd => Box::new(SyncModelAveraging::new(base, backend, SMA_ALPHA)),
            Strategy::AdaSgd => Box::new(AdaptiveSgd::new(
                base,
                backend,
                SMA_ALPHA,
                ADA_CHANGE_STEP,
            )),
            Strategy::Ideal => Box::new(Ideal::new(base)),
        }
    }
}

impl FromStr for Strategy {
    type Err = DistributedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| DistributedError::UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
