use super::init::he_uniform;
use super::{missing_cache, Module, Param, ParamMut, ParamRef};
use crate::tensor::{Result, Tensor, TensorError};
use rand::Rng;

/// Fully connected layer: `y = x W^T + b`.
///
/// `weight` is `[out_features, in_features]`, inputs are `[batch, in_features]`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Param<2>,
    pub bias: Param<1>,
    cache: Option<Tensor<f32, 2>>,
}

impl Linear {
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self {
            weight: Param::new(he_uniform([out_features, in_features], in_features, rng)),
            bias: Param::new(Tensor::zeros([out_features])),
            cache: None,
        }
    }

    pub fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        let [_, in_features] = *input.shape();
        let [out_features, w_in] = *self.weight.value.shape();
        if in_features != w_in {
            return Err(TensorError::ShapeMismatch {
                expected: vec![w_in],
                got: vec![in_features],
            });
        }

        let mut out = input.matmul(&self.weight.value.transpose()?)?;
        let bias = self.bias.value.data();
        for row in out.data_mut().chunks_mut(out_features) {
            for (v, b) in row.iter_mut().zip(bias) {
                *v += *b;
            }
        }

        self.cache = Some(input.clone());
        Ok(out)
    }

    pub fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        let input = self.cache.take().ok_or_else(|| missing_cache("Linear"))?;

        // dW = dY^T X, dX = dY W
        let grad_weight = grad_output.transpose()?.matmul(&input)?;
        self.weight.grad.add_assign(&grad_weight)?;

        let out_features = self.bias.value.size();
        let bias_grad = self.bias.grad.data_mut();
        for row in grad_output.data().chunks(out_features) {
            for (g, v) in bias_grad.iter_mut().zip(row) {
                *g += *v;
            }
        }

        grad_output.matmul(&self.weight.value)
    }
}

impl Module for Linear {
    fn params(&self) -> Vec<ParamRef<'_>> {
        vec![self.weight.view(), self.bias.view()]
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        vec![self.weight.view_mut(), self.bias.view_mut()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed() -> Linear {
        let mut rng = StdRng::seed_from_u64(0);
        let mut lin = Linear::new(3, 2, &mut rng);
        lin.weight
            .value
            .data_mut()
            .copy_from_slice(&[1.0, 0.0, -1.0, 2.0, 1.0, 0.0]);
        lin.bias.value.data_mut().copy_from_slice(&[0.5, -0.5]);
        lin
    }

    #[test]
    fn test_forward() {
        let mut lin = fixed();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 0.0, 1.0, 0.0], [2, 3]).unwrap();
        let y = lin.forward(&x).unwrap();
        // Row 0: [1-3+0.5, 2+2-0.5], Row 1: [0+0.5, 1-0.5]
        assert_eq!(y.data(), &[-1.5, 3.5, 0.5, 0.5]);
    }

    #[test]
    fn test_backward() {
        let mut lin = fixed();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 0.0, 1.0, 0.0], [2, 3]).unwrap();
        lin.forward(&x).unwrap();

        let grad = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], [2, 2]).unwrap();
        let grad_in = lin.backward(&grad).unwrap();

        assert_eq!(grad_in.data(), &[1.0, 0.0, -1.0, 2.0, 1.0, 0.0]);
        assert_eq!(lin.weight.grad.data(), &[1.0, 2.0, 3.0, 0.0, 1.0, 0.0]);
        assert_eq!(lin.bias.grad.data(), &[1.0, 1.0]);
    }

    #[test]
    fn test_input_width_mismatch() {
        let mut lin = fixed();
        let x = Tensor::<f32, 2>::ones([1, 4]);
        assert!(matches!(lin.forward(&x), Err(TensorError::ShapeMismatch { .. })));
    }
}
