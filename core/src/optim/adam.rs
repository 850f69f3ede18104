use super::{check_lengths, Optimizer, Result};
use rayon::prelude::*;
use std::collections::HashMap;

/// Adam optimizer with optional decoupled weight decay.
///
/// # Formula
///
/// $$
/// \begin{aligned}
/// & m_t = \beta_1 m_{t-1} + (1 - \beta_1) g_t \\
/// & v_t = \beta_2 v_{t-1} + (1 - \beta_2) g_t^2 \\
/// & \hat{m}_t = m_t / (1 - \beta_1^t) \\
/// & \hat{v}_t = v_t / (1 - \beta_2^t) \\
/// & \theta_t = \theta_{t-1}
///     - \eta (\hat{m}_t / (\sqrt{\hat{v}_t} + \epsilon) + \lambda \theta_{t-1})
/// \end{aligned}
/// $$
///
/// With the default $\lambda = 0$ this is plain Adam.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    /// Key -> (m, v, step). Flat vectors handle arbitrary tensor shapes.
    state: HashMap<usize, (Vec<f32>, Vec<f32>, u64)>,
}

impl Adam {
    /// Creates a new Adam optimizer.
    ///
    /// Defaults: `beta1 = 0.9`, `beta2 = 0.999`, `epsilon = 1e-8`, `weight_decay = 0`.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            state: HashMap::new(),
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn update(&mut self, key: usize, param: &mut [f32], grad: &[f32]) -> Result<()> {
        check_lengths(key, param, grad)?;

        let size = param.len();
        let (m, v, step) = self
            .state
            .entry(key)
            .or_insert_with(|| (vec![0.0; size], vec![0.0; size], 0));
        *step += 1;

        let lr = self.learning_rate;
        let b1 = self.beta1;
        let b2 = self.beta2;
        let eps = self.epsilon;
        let lambda = self.weight_decay;

        let t = i32::try_from(*step).unwrap_or(i32::MAX);
        let bias_correction1 = 1.0 - (b1 as f64).powi(t);
        let bias_correction2 = 1.0 - (b2 as f64).powi(t);
        let bias_correction1 = bias_correction1 as f32;
        let bias_correction2 = bias_correction2 as f32;

        param
            .par_iter_mut()
            .zip(grad.par_iter())
            .zip(m.par_iter_mut())
            .zip(v.par_iter_mut())
            .for_each(|(((p, &g), m_elem), v_elem)| {
                *m_elem = b1 * *m_elem + (1.0 - b1) * g;
                *v_elem = b2 * *v_elem + (1.0 - b2) * g * g;

                let m_hat = *m_elem / bias_correction1;
                let v_hat = *v_elem / bias_correction2;

                *p -= lr * (m_hat / (v_hat.sqrt() + eps) + lambda * *p);
            });

        Ok(())
    }
}
