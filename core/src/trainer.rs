//! One peer's model replica and its training step.

use crate::config::RunConfig;
use crate::data::SyntheticBatch;
use crate::distributed::{DistributedOptimizer, PeerContext};
use crate::error::Result;
use crate::loss::softmax_cross_entropy;
use crate::models::ImageClassifier;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// A model, its fixed synthetic batch and the distributed optimizer that updates it.
#[derive(Debug)]
pub struct Replica {
    model: Box<dyn ImageClassifier>,
    batch: SyntheticBatch,
    optimizer: Box<dyn DistributedOptimizer>,
}

impl Replica {
    pub fn new(
        model: Box<dyn ImageClassifier>,
        batch: SyntheticBatch,
        optimizer: Box<dyn DistributedOptimizer>,
    ) -> Self {
        Self {
            model,
            batch,
            optimizer,
        }
    }

    /// Builds the replica for `ctx`'s rank.
    ///
    /// Each rank draws its weights and batch from its own seeded stream; strategies that need
    /// identical starting points get them from [`Replica::init`].
    pub fn from_config(config: &RunConfig, ctx: &PeerContext) -> Result<Self> {
        let rank = ctx.backend.rank();
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(rank as u64));

        let model = config.model.build(config.num_classes, &mut rng);
        let batch = SyntheticBatch::generate(
            config.batch_size,
            config.image_size,
            config.num_classes,
            &mut rng,
        );
        let base = config
            .optimizer
            .build(config.learning_rate, config.weight_decay);
        let optimizer = config.strategy.wrap(base, ctx);

        debug!(
            rank,
            model = model.name(),
            params = model.num_params(),
            strategy = %config.strategy,
            optimizer = %config.optimizer,
            "built replica"
        );
        Ok(Self::new(model, batch, optimizer))
    }

    /// Runs the strategy's distributed initializer.
    pub fn init(&mut self) -> Result<()> {
        self.optimizer.init(&mut self.model.params_mut())?;
        Ok(())
    }

    /// One training step: forward, loss, backward, distributed update. Returns the loss.
    pub fn step(&mut self) -> Result<f32> {
        self.model.zero_grad();
        let logits = self.model.forward(&self.batch.images)?;
        let (loss, grad_logits) = softmax_cross_entropy(&logits, &self.batch.labels)?;
        self.model.backward(&grad_logits)?;
        self.optimizer.apply(&mut self.model.params_mut())?;
        Ok(loss)
    }

    pub fn model(&self) -> &dyn ImageClassifier {
        self.model.as_ref()
    }
}
