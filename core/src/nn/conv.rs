use super::init::he_uniform;
use super::{missing_cache, Module, Param, ParamMut, ParamRef};
use crate::tensor::{Result, Tensor, TensorError};
use rand::Rng;
use rayon::prelude::*;
use syncbench_kernels::Conv2dGeometry;

/// 2D Convolution Layer.
///
/// Applies a 2D convolution over an input signal composed of several input planes.
/// Weight shape is `[out_channels, in_channels, kernel, kernel]`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub weight: Param<4>,
    pub bias: Option<Param<1>>,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    cache: Option<(Tensor<f32, 4>, Conv2dGeometry)>,
}

impl Conv2d {
    /// Creates a new Conv2d layer with He-uniform weights and zero bias.
    ///
    /// # Arguments
    ///
    /// * `in_channels` - Number of channels in the input image.
    /// * `out_channels` - Number of channels produced by the convolution.
    /// * `kernel_size` - Size of the convolving kernel.
    /// * `stride` - Stride of the convolution.
    /// * `padding` - Zero-padding added to both sides of the input.
    pub fn new<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        let weight = he_uniform(
            [out_channels, in_channels, kernel_size, kernel_size],
            fan_in,
            rng,
        );

        Conv2d {
            weight: Param::new(weight),
            bias: Some(Param::new(Tensor::zeros([out_channels]))),
            stride,
            padding,
            dilation: 1,
            cache: None,
        }
    }

    /// Drops the bias term.
    pub fn without_bias(mut self) -> Self {
        self.bias = None;
        self
    }

    /// Sets every weight to zero, turning the layer into a constant (bias-only) map.
    pub fn zero_weights(mut self) -> Self {
        self.weight.value.data_mut().fill(0.0);
        self
    }

    pub fn out_channels(&self) -> usize {
        self.weight.value.shape()[0]
    }

    /// Performs the forward pass and caches the input for [`Conv2d::backward`].
    pub fn forward(&mut self, input: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let (mut out, geometry) =
            input.conv2d(&self.weight.value, self.stride, self.padding, self.dilation)?;

        if let Some(bias) = &self.bias {
            let [_, out_c, h, w] = *out.shape();
            if bias.value.shape()[0] != out_c {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![out_c],
                    got: vec![bias.value.shape()[0]],
                });
            }

            let bias_data = bias.value.data();
            let stride_b = out_c * h * w;
            let stride_c = h * w;

            // Parallelize over batch, then walk channels
            out.data_mut().par_chunks_mut(stride_b).for_each(|batch_chunk| {
                batch_chunk
                    .chunks_mut(stride_c)
                    .enumerate()
                    .for_each(|(c, channel_chunk)| {
                        let b_val = bias_data[c];
                        for val in channel_chunk.iter_mut() {
                            *val += b_val;
                        }
                    });
            });
        }

        self.cache = Some((input.clone(), geometry));
        Ok(out)
    }

    /// Accumulates weight and bias gradients and returns the input gradient.
    pub fn backward(&mut self, grad_output: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let (input, geometry) = self.cache.take().ok_or_else(|| missing_cache("Conv2d"))?;
        if grad_output.shape() != &geometry.output_shape() {
            return Err(TensorError::ShapeMismatch {
                expected: geometry.output_shape().to_vec(),
                got: grad_output.shape().to_vec(),
            });
        }

        let (grad_input, grad_weight) =
            grad_output.conv2d_backward(&input, &self.weight.value, &geometry)?;
        self.weight.grad.add_assign(&grad_weight)?;

        if let Some(bias) = &mut self.bias {
            let plane = geometry.out_h * geometry.out_w;
            let out_c = geometry.out_channels;
            let go = grad_output.data();
            bias.grad
                .data_mut()
                .par_iter_mut()
                .enumerate()
                .for_each(|(c, g)| {
                    let mut sum = 0.0;
                    for b in 0..geometry.batch {
                        let start = (b * out_c + c) * plane;
                        sum += go[start..start + plane].iter().sum::<f32>();
                    }
                    *g += sum;
                });
        }

        Ok(grad_input)
    }
}

impl Module for Conv2d {
    fn params(&self) -> Vec<ParamRef<'_>> {
        let mut params = vec![self.weight.view()];
        if let Some(bias) = &self.bias {
            params.push(bias.view());
        }
        params
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = vec![self.weight.view_mut()];
        if let Some(bias) = &mut self.bias {
            params.push(bias.view_mut());
        }
        params
    }
}
