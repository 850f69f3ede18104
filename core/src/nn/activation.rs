//! Activation Functions.
//!
//! Activation functions introduce **non-linearity** into neural networks. The convolutional
//! models here only need **ReLU**: $f(x) = \max(0, x)$.

use super::missing_cache;
use crate::tensor::{Result, Tensor, TensorError};
use rayon::prelude::*;

/// Rectified linear unit. Remembers which inputs were positive for the backward pass.
#[derive(Debug, Clone, Default)]
pub struct Relu {
    mask: Option<Vec<bool>>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward<const RANK: usize>(&mut self, input: &Tensor<f32, RANK>) -> Tensor<f32, RANK> {
        self.mask = Some(input.data().par_iter().map(|&v| v > 0.0).collect());
        input.map(|v| if v > 0.0 { v } else { 0.0 })
    }

    pub fn backward<const RANK: usize>(
        &mut self,
        grad_output: &Tensor<f32, RANK>,
    ) -> Result<Tensor<f32, RANK>> {
        let mask = self.mask.take().ok_or_else(|| missing_cache("Relu"))?;
        if mask.len() != grad_output.size() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![mask.len()],
                got: vec![grad_output.size()],
            });
        }

        let data = grad_output
            .data()
            .par_iter()
            .zip(mask.par_iter())
            .map(|(&g, &keep)| if keep { g } else { 0.0 })
            .collect();
        Tensor::new(data, *grad_output.shape())
    }
}
