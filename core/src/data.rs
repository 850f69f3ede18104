//! Synthetic input data.

use crate::tensor::Tensor;
use rand::Rng;

/// Number of color channels in every synthetic image.
pub const IMAGE_CHANNELS: usize = 3;

/// A fixed batch of random images and labels.
///
/// Generated once per worker and reused for every step, so input generation never shows up in
/// the measured time.
#[derive(Debug, Clone)]
pub struct SyntheticBatch {
    /// Shape: `[batch_size, 3, image_size, image_size]`, uniform in `[0, 1)`.
    pub images: Tensor<f32, 4>,
    /// One class index per image, uniform in `0..num_classes`.
    pub labels: Vec<usize>,
}

impl SyntheticBatch {
    pub fn generate<R: Rng>(
        batch_size: usize,
        image_size: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        let images = Tensor::random_uniform(
            [batch_size, IMAGE_CHANNELS, image_size, image_size],
            0.0,
            1.0,
            rng,
        );
        let labels = if num_classes == 0 {
            vec![0; batch_size]
        } else {
            (0..batch_size).map(|_| rng.random_range(0..num_classes)).collect()
        };
        Self { images, labels }
    }
}
