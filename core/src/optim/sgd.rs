use super::{check_lengths, Optimizer, Result};
use rayon::prelude::*;

/// Stochastic Gradient Descent (SGD) optimizer.
///
/// Updates parameters using the rule:
/// `param = param - learning_rate * grad`
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn update(&mut self, key: usize, param: &mut [f32], grad: &[f32]) -> Result<()> {
        check_lengths(key, param, grad)?;

        let lr = self.learning_rate;
        param
            .par_iter_mut()
            .zip(grad.par_iter())
            .for_each(|(p, g)| {
                *p -= lr * *g;
            });

        Ok(())
    }
}
