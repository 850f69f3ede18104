//! Weight initialization.

use crate::tensor::Tensor;
use rand::Rng;

/// He (Kaiming) uniform initialization: `U(-b, b)` with `b = sqrt(6 / fan_in)`.
///
/// Keeps the activation variance roughly constant through ReLU layers.
pub fn he_uniform<const RANK: usize, R: Rng>(
    shape: [usize; RANK],
    fan_in: usize,
    rng: &mut R,
) -> Tensor<f32, RANK> {
    let bound = (6.0 / fan_in.max(1) as f32).sqrt();
    Tensor::random_uniform(shape, -bound, bound, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_he_uniform_bound() {
        let mut rng = StdRng::seed_from_u64(0);
        let t = he_uniform([16, 3, 3, 3], 27, &mut rng);
        let bound = (6.0f32 / 27.0).sqrt();
        assert!(t.data().iter().all(|v| v.abs() <= bound));
        // Not degenerate
        assert!(t.data().iter().any(|&v| v != t.data()[0]));
    }
}
