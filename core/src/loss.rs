//! Loss functions.

use crate::tensor::{Result, Tensor, TensorError};
use rayon::prelude::*;

/// Sparse softmax cross-entropy, averaged over the batch.
///
/// # Arguments
///
/// * `logits` - Unnormalized scores. Shape: `[Batch, Classes]`
/// * `labels` - One class index per row, each in `0..Classes`.
///
/// # Returns
///
/// The mean loss and its gradient with respect to `logits`,
/// `(softmax(logits) - onehot(labels)) / Batch`.
pub fn softmax_cross_entropy(
    logits: &Tensor<f32, 2>,
    labels: &[usize],
) -> Result<(f32, Tensor<f32, 2>)> {
    let [batch, classes] = *logits.shape();
    if labels.len() != batch {
        return Err(TensorError::ShapeMismatch {
            expected: vec![batch],
            got: vec![labels.len()],
        });
    }
    if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
        return Err(TensorError::IndexOutOfBounds {
            index: vec![bad],
            shape: vec![classes],
        });
    }
    if batch == 0 {
        return Ok((0.0, Tensor::zeros([0, classes])));
    }

    let inv_batch = 1.0 / batch as f32;
    let mut grad = Tensor::zeros([batch, classes]);

    let total: f32 = grad
        .data_mut()
        .par_chunks_mut(classes)
        .zip(logits.data().par_chunks(classes))
        .zip(labels.par_iter())
        .map(|((g_row, row), &label)| {
            // Shift by the row max for numerical stability
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for (g, &v) in g_row.iter_mut().zip(row) {
                *g = (v - max).exp();
                sum += *g;
            }
            for g in g_row.iter_mut() {
                *g /= sum;
            }
            let loss = -(g_row[label].max(f32::MIN_POSITIVE)).ln();

            g_row[label] -= 1.0;
            for g in g_row.iter_mut() {
                *g *= inv_batch;
            }
            loss
        })
        .sum();

    Ok((total * inv_batch, grad))
}
