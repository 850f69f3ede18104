//! Distributed optimizer wrappers.
//!
//! Each wrapper owns a base [`Optimizer`] and decides what to exchange with the peers around
//! the local update.

use super::strategy::Strategy;
use super::{CollectiveBackend, PeerModelStore, Result};
use crate::nn::ParamMut;
use crate::optim::Optimizer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Blob name under which peers publish their model.
pub const MODEL_BLOB: &str = "model";

/// A base optimizer plus a synchronization policy.
pub trait DistributedOptimizer: Send {
    fn strategy(&self) -> Strategy;

    /// Runs once before training so every peer starts from a consistent state.
    fn init(&mut self, params: &mut [ParamMut<'_>]) -> Result<()>;

    /// Applies one step's gradients.
    fn apply(&mut self, params: &mut [ParamMut<'_>]) -> Result<()>;
}

pub(crate) fn pack_values(params: &[ParamMut<'_>]) -> Vec<f32> {
    let mut buf = Vec::with_capacity(params.iter().map(|p| p.value.len()).sum());
    for p in params {
        buf.extend_from_slice(p.value);
    }
    buf
}

pub(crate) fn unpack_values(params: &mut [ParamMut<'_>], buf: &[f32]) {
    let mut offset = 0;
    for p in params.iter_mut() {
        let n = p.value.len();
        p.value.copy_from_slice(&buf[offset..offset + n]);
        offset += n;
    }
}

fn pack_grads(params: &[ParamMut<'_>]) -> Vec<f32> {
    let mut buf = Vec::with_capacity(params.iter().map(|p| p.grad.len()).sum());
    for p in params {
        buf.extend_from_slice(p.grad);
    }
    buf
}

fn unpack_grads(params: &mut [ParamMut<'_>], buf: &[f32]) {
    let mut offset = 0;
    for p in params.iter_mut() {
        let n = p.grad.len();
        p.grad.copy_from_slice(&buf[offset..offset + n]);
        offset += n;
    }
}

fn scale(buf: &mut [f32], factor: f32) {
    for v in buf.iter_mut() {
        *v *= factor;
    }
}

/// Copies rank 0's parameters to every peer.
fn broadcast_params(backend: &dyn CollectiveBackend, params: &mut [ParamMut<'_>]) -> Result<()> {
    let mut buf = pack_values(params);
    backend.broadcast(&mut buf, 0)?;
    unpack_values(params, &buf);
    Ok(())
}

/// Averages gradients across peers, either tensor by tensor or through one fused buffer.
fn average_gradients(
    backend: &dyn CollectiveBackend,
    params: &mut [ParamMut<'_>],
    fused: bool,
) -> Result<()> {
    let inv_world = 1.0 / backend.world_size() as f32;
    if fused {
        let mut buf = pack_grads(params);
        backend.all_reduce_sum(&mut buf)?;
        scale(&mut buf, inv_world);
        unpack_grads(params, &buf);
    } else {
        for p in params.iter_mut() {
            backend.all_reduce_sum(p.grad)?;
            scale(p.grad, inv_world);
        }
    }
    Ok(())
}

/// Replaces every parameter with its exact mean over all peers.
fn replace_with_mean(backend: &dyn CollectiveBackend, params: &mut [ParamMut<'_>]) -> Result<()> {
    let mut mean = pack_values(params);
    backend.all_reduce_sum(&mut mean)?;
    scale(&mut mean, 1.0 / backend.world_size() as f32);
    unpack_values(params, &mean);
    Ok(())
}

/// Moves every parameter `alpha` of the way toward the mean over all peers.
fn average_models(
    backend: &dyn CollectiveBackend,
    params: &mut [ParamMut<'_>],
    alpha: f32,
) -> Result<()> {
    let mut mean = pack_values(params);
    backend.all_reduce_sum(&mut mean)?;
    scale(&mut mean, 1.0 / backend.world_size() as f32);

    let mut offset = 0;
    for p in params.iter_mut() {
        let n = p.value.len();
        for (v, m) in p.value.iter_mut().zip(&mean[offset..offset + n]) {
            *v -= alpha * (*v - *m);
        }
        offset += n;
    }
    Ok(())
}

/// Synchronous SGD: gradients are all-reduced and averaged before the base update.
///
/// With `fused` set, all gradients travel in a single collective call.
pub struct SyncSgd {
    base: Box<dyn Optimizer>,
    backend: Arc<dyn CollectiveBackend>,
    fused: bool,
}

impl SyncSgd {
    pub fn new(base: Box<dyn Optimizer>, backend: Arc<dyn CollectiveBackend>, fused: bool) -> Self {
        Self {
            base,
            backend,
            fused,
        }
    }
}

impl DistributedOptimizer for SyncSgd {
    fn strategy(&self) -> Strategy {
        if self.fused {
            Strategy::SyncSgdNccl
        } else {
            Strategy::SyncSgd
        }
    }

    fn init(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        broadcast_params(self.backend.as_ref(), params)
    }

    fn apply(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        average_gradients(self.backend.as_ref(), params, self.fused)?;
        self.base.step(params)?;
        Ok(())
    }
}

/// Synchronous model averaging: `p <- p - alpha * (p - mean(p))`, then the local update.
pub struct SyncModelAveraging {
    base: Box<dyn Optimizer>,
    backend: Arc<dyn CollectiveBackend>,
    alpha: f32,
}

impl SyncModelAveraging {
    pub fn new(base: Box<dyn Optimizer>, backend: Arc<dyn CollectiveBackend>, alpha: f32) -> Self {
        Self {
            base,
            backend,
            alpha,
        }
    }
}

impl DistributedOptimizer for SyncModelAveraging {
    fn strategy(&self) -> Strategy {
        Strategy::SmaSgd
    }

    fn init(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        broadcast_params(self.backend.as_ref(), params)
    }

    fn apply(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        average_models(self.backend.as_ref(), params, self.alpha)?;
        self.base.step(params)?;
        Ok(())
    }
}

/// Model averaging for the first `change_step` steps, synchronous SGD afterwards.
///
/// At the switch the replicas are averaged exactly once so synchronous SGD starts from
/// identical models.
pub struct AdaptiveSgd {
    base: Box<dyn Optimizer>,
    backend: Arc<dyn CollectiveBackend>,
    alpha: f32,
    change_step: u64,
    step: u64,
}

impl AdaptiveSgd {
    pub fn new(
        base: Box<dyn Optimizer>,
        backend: Arc<dyn CollectiveBackend>,
        alpha: f32,
        change_step: u64,
    ) -> Self {
        Self {
            base,
            backend,
            alpha,
            change_step,
            step: 0,
        }
    }
}

impl DistributedOptimizer for AdaptiveSgd {
    fn strategy(&self) -> Strategy {
        Strategy::AdaSgd
    }

    fn init(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        broadcast_params(self.backend.as_ref(), params)
    }

    fn apply(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        let backend = self.backend.as_ref();
        if self.step < self.change_step {
            average_models(backend, params, self.alpha)?;
        } else {
            if self.step == self.change_step {
                debug!(step = self.step, "switching from model averaging to synchronous SGD");
                replace_with_mean(backend, params)?;
            }
            average_gradients(backend, params, true)?;
        }
        self.base.step(params)?;
        self.step += 1;
        Ok(())
    }
}

/// Asynchronous pair averaging through the [`PeerModelStore`].
///
/// Each step: fetch the latest model of a random other peer, replace the local model with
/// the average of both, apply local gradients, publish the result under the next version.
pub struct PeerModelAveraging {
    base: Box<dyn Optimizer>,
    backend: Arc<dyn CollectiveBackend>,
    store: Arc<PeerModelStore>,
    rng: StdRng,
    version: u64,
}

impl PeerModelAveraging {
    pub fn new(
        base: Box<dyn Optimizer>,
        backend: Arc<dyn CollectiveBackend>,
        store: Arc<PeerModelStore>,
        seed: u64,
    ) -> Self {
        let rank = backend.rank() as u64;
        Self {
            base,
            backend,
            store,
            rng: StdRng::seed_from_u64(seed.wrapping_add(rank)),
            version: 0,
        }
    }

    fn pick_peer(&mut self) -> Option<usize> {
        let world_size = self.backend.world_size();
        if world_size < 2 {
            return None;
        }
        // Uniform over the other peers
        let offset = self.rng.random_range(1..world_size);
        Some((self.backend.rank() + offset) % world_size)
    }
}

impl DistributedOptimizer for PeerModelAveraging {
    fn strategy(&self) -> Strategy {
        Strategy::AsyncSgd
    }

    fn init(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        self.version = 0;
        self.store
            .publish(self.backend.rank(), self.version, MODEL_BLOB, pack_values(params))?;
        // Every peer has something to read before anyone starts training
        self.backend.barrier()?;
        Ok(())
    }

    fn apply(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        if let Some(peer) = self.pick_peer() {
            match self.store.latest(peer, MODEL_BLOB)? {
                Some((peer_version, remote)) if remote.len() == pack_len(params) => {
                    let mut offset = 0;
                    for p in params.iter_mut() {
                        let n = p.value.len();
                        for (v, r) in p.value.iter_mut().zip(&remote[offset..offset + n]) {
                            *v = 0.5 * (*v + *r);
                        }
                        offset += n;
                    }
                    debug!(peer, peer_version, "averaged with peer model");
                }
                _ => debug!(peer, "no compatible peer model yet"),
            }
        }

        self.base.step(params)?;

        self.version += 1;
        self.store
            .publish(self.backend.rank(), self.version, MODEL_BLOB, pack_values(params))?;
        Ok(())
    }
}

fn pack_len(params: &[ParamMut<'_>]) -> usize {
    params.iter().map(|p| p.value.len()).sum()
}

/// Ideal-scaling baseline: no communication at all.
pub struct Ideal {
    base: Box<dyn Optimizer>,
}

impl Ideal {
    pub fn new(base: Box<dyn Optimizer>) -> Self {
        Self { base }
    }
}

impl DistributedOptimizer for Ideal {
    fn strategy(&self) -> Strategy {
        Strategy::Ideal
    }

    fn init(&mut self, _params: &mut [ParamMut<'_>]) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        self.base.step(params)?;
        Ok(())
    }
}

impl Debug for dyn DistributedOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DistributedOptimizer({})", self.strategy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::RingBackend;
    use crate::optim::Sgd;
    use std::thread;

    struct Replica {
        value: Vec<f32>,
        grad: Vec<f32>,
    }

    impl Replica {
        fn params(&mut self) -> Vec<ParamMut<'_>> {
            vec![ParamMut {
                value: &mut self.value,
                grad: &mut self.grad,
            }]
        }
    }

    fn single_peer() -> Arc<dyn CollectiveBackend> {
        Arc::new(RingBackend::group(1).remove(0))
    }

    /// Runs `steps` applications of a strategy on `world_size` threads. Rank `r` starts from
    /// value `r` and always sees gradient `r + 1`.
    fn run_group(
        world_size: usize,
        steps: usize,
        make: impl Fn(Arc<dyn CollectiveBackend>) -> Box<dyn DistributedOptimizer> + Sync,
    ) -> Vec<Vec<f32>> {
        run_group_from(world_size, steps, true, make)
    }

    /// Like [`run_group`], optionally skipping the strategy's initializer so replicas start
    /// out different.
    fn run_group_from(
        world_size: usize,
        steps: usize,
        init: bool,
        make: impl Fn(Arc<dyn CollectiveBackend>) -> Box<dyn DistributedOptimizer> + Sync,
    ) -> Vec<Vec<f32>> {
        thread::scope(|s| {
            let handles: Vec<_> = RingBackend::group(world_size)
                .into_iter()
                .map(|backend| {
                    let make = &make;
                    s.spawn(move || {
                        let rank = backend.rank();
                        let mut opt = make(Arc::new(backend));
                        let mut replica = Replica {
                            value: vec![rank as f32; 3],
                            grad: vec![0.0; 3],
                        };
                        if init {
                            opt.init(&mut replica.params()).unwrap();
                        }
                        for _ in 0..steps {
                            replica.grad = vec![(rank + 1) as f32; 3];
                            opt.apply(&mut replica.params()).unwrap();
                        }
                        replica.value
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_sync_sgd_keeps_replicas_identical() {
        for fused in [false, true] {
            let results = run_group(3, 2, |b| {
                Box::new(SyncSgd::new(Box::new(Sgd::new(0.5)), b, fused))
            });
            // Start from rank 0's zeros, mean gradient 2, two steps of 0.5 * 2
            for r in &results {
                assert_eq!(r, &vec![-2.0; 3]);
            }
        }
    }

    #[test]
    fn test_ideal_never_communicates() {
        let results = run_group(2, 1, |_| Box::new(Ideal::new(Box::new(Sgd::new(1.0)))));
        assert_eq!(results[0], vec![-1.0; 3]);
        assert_eq!(results[1], vec![-1.0; 3]);
    }

    #[test]
    fn test_sma_pulls_toward_mean() {
        let mut opt = SyncModelAveraging::new(Box::new(Sgd::new(0.0)), single_peer(), 0.1);
        let mut replica = Replica {
            value: vec![4.0],
            grad: vec![1.0],
        };
        // Alone, the mean is the model itself
        opt.apply(&mut replica.params()).unwrap();
        assert_eq!(replica.value, vec![4.0]);
    }

    #[test]
    fn test_sma_group_converges() {
        let results = run_group(2, 1, |b| {
            Box::new(SyncModelAveraging::new(Box::new(Sgd::new(0.0)), b, 0.1))
        });
        // init broadcasts rank 0, so both start at 0 and stay there
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn test_sma_moves_differing_replicas_by_alpha() {
        // No broadcast: ranks start at 0 and 1, so the mean is 0.5
        let results = run_group_from(2, 1, false, |b| {
            Box::new(SyncModelAveraging::new(Box::new(Sgd::new(0.0)), b, 0.1))
        });
        for v in &results[0] {
            assert!((v - 0.05).abs() < 1e-6, "rank 0: {v}");
        }
        for v in &results[1] {
            assert!((v - 0.95).abs() < 1e-6, "rank 1: {v}");
        }
    }

    #[test]
    fn test_adaptive_switches_after_change_step() {
        let mut opt = AdaptiveSgd::new(Box::new(Sgd::new(1.0)), single_peer(), 0.1, 2);
        let mut replica = Replica {
            value: vec![0.0],
            grad: vec![1.0],
        };
        for _ in 0..4 {
            opt.apply(&mut replica.params()).unwrap();
        }
        assert_eq!(replica.value, vec![-4.0]);
    }

    #[test]
    fn test_adaptive_group_ends_identical() {
        let results = run_group(3, 4, |b| {
            Box::new(AdaptiveSgd::new(Box::new(Sgd::new(0.1)), b, 0.1, 2))
        });
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn test_peer_averaging_publishes_versions() {
        let store = Arc::new(PeerModelStore::new(1, 2));
        let mut opt = PeerModelAveraging::new(
            Box::new(Sgd::new(1.0)),
            single_peer(),
            Arc::clone(&store),
            7,
        );
        let mut replica = Replica {
            value: vec![1.0, 1.0],
            grad: vec![0.5, 0.5],
        };

        opt.init(&mut replica.params()).unwrap();
        opt.apply(&mut replica.params()).unwrap();
        opt.apply(&mut replica.params()).unwrap();

        let (version, blob) = store.latest(0, MODEL_BLOB).unwrap().unwrap();
        assert_eq!(version, 2);
        assert_eq!(*blob, vec![0.0, 0.0]);
        // Window of two evicted version 0
        assert!(store.get(0, 0, MODEL_BLOB).is_err());
    }

    #[test]
    fn test_peer_averaging_mixes_with_other_peer() {
        let store = Arc::new(PeerModelStore::new(2, 4));
        let results = run_group(2, 1, |b| {
            Box::new(PeerModelAveraging::new(
                Box::new(Sgd::new(0.0)),
                b,
                Arc::clone(&store),
                1,
            ))
        });
        // Zero learning rate: each replica ends between the two starting values 0 and 1
        for r in &results {
            assert!(r.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
        assert!(results[0][0] > 0.0);
        assert!(results[1][0] < 1.0);
    }

    #[test]
    fn test_peer_averaging_takes_exact_half() {
        let store = Arc::new(PeerModelStore::new(2, 4));
        let mut group = RingBackend::group(2);
        let _other = group.pop();
        let backend: Arc<dyn CollectiveBackend> = Arc::new(group.remove(0));
        let mut opt = PeerModelAveraging::new(
            Box::new(Sgd::new(0.0)),
            backend,
            Arc::clone(&store),
            3,
        );
        let mut replica = Replica {
            value: vec![0.0, 2.0],
            grad: vec![0.0, 0.0],
        };

        // With two peers the only candidate is rank 1
        store.publish(1, 0, MODEL_BLOB, vec![1.0, 4.0]).unwrap();
        opt.apply(&mut replica.params()).unwrap();
        assert_eq!(replica.value, vec![0.5, 3.0]);
        assert_eq!(*store.get(0, 1, MODEL_BLOB).unwrap(), vec![0.5, 3.0]);

        // The newest peer version wins
        store.publish(1, 1, MODEL_BLOB, vec![0.25, 1.0]).unwrap();
        opt.apply(&mut replica.params()).unwrap();
        assert_eq!(replica.value, vec![0.375, 2.0]);
        assert_eq!(*store.get(0, 2, MODEL_BLOB).unwrap(), vec![0.375, 2.0]);
    }
}
