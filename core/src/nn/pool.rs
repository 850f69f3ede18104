use super::missing_cache;
use crate::tensor::{Result, Tensor, TensorError};
use rayon::prelude::*;
use syncbench_kernels::Pool2dGeometry;

/// 2D Max Pooling Layer.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    cache: Option<(Vec<usize>, Pool2dGeometry)>,
}

impl MaxPool2d {
    /// Creates a new MaxPool2d layer.
    ///
    /// # Arguments
    ///
    /// * `kernel_size` - Size of the pooling window.
    /// * `stride` - Stride of the pooling.
    /// * `padding` - Implicit padding on both sides; at most half the window.
    pub fn new(kernel_size: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel_size: [kernel_size, kernel_size],
            stride: [stride, stride],
            padding: [padding, padding],
            cache: None,
        }
    }

    pub fn forward(&mut self, input: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let (out, argmax, geometry) =
            input.max_pool2d(self.kernel_size, self.stride, self.padding)?;
        self.cache = Some((argmax, geometry));
        Ok(out)
    }

    pub fn backward(&mut self, grad_output: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let (argmax, geometry) = self.cache.take().ok_or_else(|| missing_cache("MaxPool2d"))?;
        grad_output.max_pool2d_backward(&argmax, &geometry)
    }
}

/// Averages each channel over its spatial extent: `[B, C, H, W] -> [B, C]`.
#[derive(Debug, Clone, Default)]
pub struct GlobalAvgPool {
    input_shape: Option<[usize; 4]>,
}

impl GlobalAvgPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, input: &Tensor<f32, 4>) -> Result<Tensor<f32, 2>> {
        let [b, c, h, w] = *input.shape();
        let plane = h * w;
        if plane == 0 {
            return Err(TensorError::InvalidArgument(
                "global average pool over an empty plane".to_string(),
            ));
        }

        let data = input
            .data()
            .par_chunks(plane)
            .map(|chunk| chunk.iter().sum::<f32>() / plane as f32)
            .collect();

        self.input_shape = Some(*input.shape());
        Tensor::new(data, [b, c])
    }

    pub fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 4>> {
        let shape = self.input_shape.take().ok_or_else(|| missing_cache("GlobalAvgPool"))?;
        let [b, c, h, w] = shape;
        if grad_output.shape() != &[b, c] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![b, c],
                got: grad_output.shape().to_vec(),
            });
        }

        let plane = h * w;
        let scale = 1.0 / plane as f32;
        let mut grad_input = Tensor::zeros(shape);
        grad_input
            .data_mut()
            .par_chunks_mut(plane)
            .zip(grad_output.data().par_iter())
            .for_each(|(chunk, &g)| chunk.fill(g * scale));
        Ok(grad_input)
    }
}
