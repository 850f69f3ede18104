use super::ImageClassifier;
use crate::nn::{Conv2d, GlobalAvgPool, Linear, MaxPool2d, Module, ParamMut, ParamRef, Relu};
use crate::tensor::{Result, Tensor};
use rand::Rng;

/// A small convolutional classifier.
///
/// `conv3x3(3->16) -> relu -> maxpool -> conv3x3(16->32) -> relu -> maxpool -> gap -> linear`
#[derive(Debug, Clone)]
pub struct ConvNet {
    conv1: Conv2d,
    relu1: Relu,
    pool1: MaxPool2d,
    conv2: Conv2d,
    relu2: Relu,
    pool2: MaxPool2d,
    gap: GlobalAvgPool,
    fc: Linear,
}

impl ConvNet {
    pub fn new<R: Rng>(num_classes: usize, rng: &mut R) -> Self {
        Self {
            conv1: Conv2d::new(3, 16, 3, 1, 1, rng),
            relu1: Relu::new(),
            pool1: MaxPool2d::new(2, 2, 0),
            conv2: Conv2d::new(16, 32, 3, 1, 1, rng),
            relu2: Relu::new(),
            pool2: MaxPool2d::new(2, 2, 0),
            gap: GlobalAvgPool::new(),
            fc: Linear::new(32, num_classes, rng),
        }
    }
}

impl Module for ConvNet {
    fn params(&self) -> Vec<ParamRef<'_>> {
        let mut params = self.conv1.params();
        params.extend(self.conv2.params());
        params.extend(self.fc.params());
        params
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = self.conv1.params_mut();
        params.extend(self.conv2.params_mut());
        params.extend(self.fc.params_mut());
        params
    }
}

impl ImageClassifier for ConvNet {
    fn name(&self) -> &str {
        "ConvNet"
    }

    fn forward(&mut self, images: &Tensor<f32, 4>) -> Result<Tensor<f32, 2>> {
        let x = self.conv1.forward(images)?;
        let x = self.relu1.forward(&x);
        let x = self.pool1.forward(&x)?;
        let x = self.conv2.forward(&x)?;
        let x = self.relu2.forward(&x);
        let x = self.pool2.forward(&x)?;
        let x = self.gap.forward(&x)?;
        self.fc.forward(&x)
    }

    fn backward(&mut self, grad_logits: &Tensor<f32, 2>) -> Result<()> {
        let g = self.fc.backward(grad_logits)?;
        let g = self.gap.backward(&g)?;
        let g = self.pool2.backward(&g)?;
        let g = self.relu2.backward(&g)?;
        let g = self.conv2.backward(&g)?;
        let g = self.pool1.backward(&g)?;
        let g = self.relu1.backward(&g)?;
        self.conv1.backward(&g)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_shape_and_params() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut net = ConvNet::new(10, &mut rng);
        let logits = net.forward(&Tensor::ones([4, 3, 8, 8])).unwrap();
        assert_eq!(logits.shape(), &[4, 10]);

        // conv1 16*3*9+16, conv2 32*16*9+32, fc 10*32+10
        assert_eq!(net.num_params(), 448 + 4640 + 330);
        assert_eq!(net.params().len(), 6);
    }

    #[test]
    fn test_backward_fills_gradients() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut net = ConvNet::new(5, &mut rng);
        let images = Tensor::random_uniform([2, 3, 8, 8], 0.0, 1.0, &mut rng);

        let logits = net.forward(&images).unwrap();
        net.backward(&Tensor::ones(*logits.shape())).unwrap();

        let fc_bias_grad = net.params()[5].grad;
        assert_eq!(fc_bias_grad, &[2.0; 5]);
        assert!(net.params()[0].grad.iter().any(|&g| g != 0.0));
    }
}
