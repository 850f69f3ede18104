use crate::{check_len, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Resolved dimensions of a 2D convolution.
///
/// Built once from the input and weight shapes so the forward and both backward
/// kernels agree on the output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub batch: usize,
    pub in_channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_channels: usize,
    pub k_h: usize,
    pub k_w: usize,
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    pub dilation: [usize; 2],
    pub out_h: usize,
    pub out_w: usize,
}

impl Conv2dGeometry {
    /// Validates the shapes and computes the output size.
    ///
    /// `H_out = floor((H + 2*padding - dilation*(kernel-1) - 1) / stride + 1)`
    pub fn new(
        input_shape: &[usize],
        weight_shape: &[usize],
        stride: [usize; 2],
        padding: [usize; 2],
        dilation: [usize; 2],
    ) -> Result<Self> {
        if input_shape.len() != 4 {
            return Err(KernelError::ShapeMismatch {
                expected: vec![4],
                got: vec![input_shape.len()],
            });
        }
        if weight_shape.len() != 4 {
            return Err(KernelError::ShapeMismatch {
                expected: vec![4],
                got: vec![weight_shape.len()],
            });
        }
        if stride.contains(&0) || dilation.contains(&0) {
            return Err(KernelError::InvalidArgument(format!(
                "stride {stride:?} and dilation {dilation:?} must be non-zero"
            )));
        }

        let (batch, in_channels, in_h, in_w) =
            (input_shape[0], input_shape[1], input_shape[2], input_shape[3]);
        let (out_channels, weight_in_channels, k_h, k_w) =
            (weight_shape[0], weight_shape[1], weight_shape[2], weight_shape[3]);

        if in_channels != weight_in_channels {
            return Err(KernelError::ShapeMismatch {
                expected: vec![in_channels],
                got: vec![weight_in_channels],
            });
        }
        if k_h == 0 || k_w == 0 {
            return Err(KernelError::InvalidArgument(
                "kernel size must be non-zero".to_string(),
            ));
        }

        let effective_k_h = k_h + (k_h - 1) * (dilation[0] - 1);
        let effective_k_w = k_w + (k_w - 1) * (dilation[1] - 1);

        if in_h + 2 * padding[0] < effective_k_h {
            return Err(KernelError::ShapeMismatch {
                expected: vec![effective_k_h],
                got: vec![in_h + 2 * padding[0]],
            });
        }
        if in_w + 2 * padding[1] < effective_k_w {
            return Err(KernelError::ShapeMismatch {
                expected: vec![effective_k_w],
                got: vec![in_w + 2 * padding[1]],
            });
        }

        let out_h = (in_h + 2 * padding[0] - effective_k_h) / stride[0] + 1;
        let out_w = (in_w + 2 * padding[1] - effective_k_w) / stride[1] + 1;

        Ok(Self {
            batch,
            in_channels,
            in_h,
            in_w,
            out_channels,
            k_h,
            k_w,
            stride,
            padding,
            dilation,
            out_h,
            out_w,
        })
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.in_channels, self.in_h, self.in_w]
    }

    pub fn weight_shape(&self) -> [usize; 4] {
        [self.out_channels, self.in_channels, self.k_h, self.k_w]
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.out_channels, self.out_h, self.out_w]
    }

    /// Maps an output position and kernel tap to the input coordinate, if it is not padding.
    #[inline]
    fn input_coord(&self, oh: usize, ow: usize, kh: usize, kw: usize) -> Option<(usize, usize)> {
        let h_in =
            (oh * self.stride[0] + kh * self.dilation[0]) as isize - self.padding[0] as isize;
        let w_in =
            (ow * self.stride[1] + kw * self.dilation[1]) as isize - self.padding[1] as isize;
        if h_in >= 0 && h_in < self.in_h as isize && w_in >= 0 && w_in < self.in_w as isize {
            Some((h_in as usize, w_in as usize))
        } else {
            None
        }
    }
}

/// Performs 2D Convolution on CPU.
///
/// # Arguments
///
/// * `input` - Input data, shape `[batch_size, in_channels, height, width]`
/// * `weight` - Weight data, shape `[out_channels, in_channels, kernel_h, kernel_w]`
/// * `geometry` - Resolved shapes, see [`Conv2dGeometry::new`].
///
/// # Returns
///
/// Output data, shape `[batch_size, out_channels, out_h, out_w]`
pub fn cpu_conv2d<T: KernelElem>(
    input: &[T],
    weight: &[T],
    geometry: &Conv2dGeometry,
) -> Result<Vec<T>> {
    let g = *geometry;
    check_len(input.len(), &g.input_shape())?;
    check_len(weight.len(), &g.weight_shape())?;

    let in_stride_b = g.in_channels * g.in_h * g.in_w;
    let in_stride_c = g.in_h * g.in_w;
    let w_stride_out = g.in_channels * g.k_h * g.k_w;
    let w_stride_in = g.k_h * g.k_w;
    let out_stride_b = g.out_channels * g.out_h * g.out_w;
    let out_stride_c = g.out_h * g.out_w;

    let mut output = vec![T::zero(); g.batch * out_stride_b];
    if output.is_empty() {
        return Ok(output);
    }

    // Parallelize over Batch and Out Channels
    output
        .par_chunks_mut(out_stride_b)
        .enumerate()
        .for_each(|(b, batch_out)| {
            batch_out
                .par_chunks_mut(out_stride_c)
                .enumerate()
                .for_each(|(oc, channel_out)| {
                    let w_offset_base = oc * w_stride_out;
                    for oh in 0..g.out_h {
                        for ow in 0..g.out_w {
                            let mut sum = T::zero();
                            for ic in 0..g.in_channels {
                                let in_offset = b * in_stride_b + ic * in_stride_c;
                                let w_offset = w_offset_base + ic * w_stride_in;
                                for kh in 0..g.k_h {
                                    for kw in 0..g.k_w {
                                        if let Some((h, w)) = g.input_coord(oh, ow, kh, kw) {
                                            sum += input[in_offset + h * g.in_w + w]
                                                * weight[w_offset + kh * g.k_w + kw];
                                        }
                                    }
                                }
                            }
                            channel_out[oh * g.out_w + ow] = sum;
                        }
                    }
                });
        });

    Ok(output)
}

/// Gradient of the convolution with respect to its input.
///
/// Scatters every output gradient back through the kernel taps that produced it.
/// Each batch element owns a disjoint slice of the result, so batches run in parallel.
pub fn cpu_conv2d_backward_input<T: KernelElem>(
    grad_output: &[T],
    weight: &[T],
    geometry: &Conv2dGeometry,
) -> Result<Vec<T>> {
    let g = *geometry;
    check_len(grad_output.len(), &g.output_shape())?;
    check_len(weight.len(), &g.weight_shape())?;

    let in_stride_b = g.in_channels * g.in_h * g.in_w;
    let in_stride_c = g.in_h * g.in_w;
    let w_stride_out = g.in_channels * g.k_h * g.k_w;
    let w_stride_in = g.k_h * g.k_w;
    let out_stride_b = g.out_channels * g.out_h * g.out_w;
    let out_stride_c = g.out_h * g.out_w;

    let mut grad_input = vec![T::zero(); g.batch * in_stride_b];
    if grad_input.is_empty() {
        return Ok(grad_input);
    }

    grad_input
        .par_chunks_mut(in_stride_b)
        .enumerate()
        .for_each(|(b, batch_grad)| {
            for oc in 0..g.out_channels {
                let go_offset = b * out_stride_b + oc * out_stride_c;
                let w_offset_base = oc * w_stride_out;
                for oh in 0..g.out_h {
                    for ow in 0..g.out_w {
                        let go = grad_output[go_offset + oh * g.out_w + ow];
                        if go == T::zero() {
                            continue;
                        }
                        for ic in 0..g.in_channels {
                            let w_offset = w_offset_base + ic * w_stride_in;
                            let gi_offset = ic * in_stride_c;
                            for kh in 0..g.k_h {
                                for kw in 0..g.k_w {
                                    if let Some((h, w)) = g.input_coord(oh, ow, kh, kw) {
                                        batch_grad[gi_offset + h * g.in_w + w] +=
                                            go * weight[w_offset + kh * g.k_w + kw];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

    Ok(grad_input)
}

/// Gradient of the convolution with respect to its weight.
///
/// `dW[oc, ic, kh, kw] = sum_{b, oh, ow} dY[b, oc, oh, ow] * X[b, ic, h(oh, kh), w(ow, kw)]`
pub fn cpu_conv2d_backward_weight<T: KernelElem>(
    grad_output: &[T],
    input: &[T],
    geometry: &Conv2dGeometry,
) -> Result<Vec<T>> {
    let g = *geometry;
    check_len(grad_output.len(), &g.output_shape())?;
    check_len(input.len(), &g.input_shape())?;

    let in_stride_b = g.in_channels * g.in_h * g.in_w;
    let in_stride_c = g.in_h * g.in_w;
    let w_stride_out = g.in_channels * g.k_h * g.k_w;
    let out_stride_b = g.out_channels * g.out_h * g.out_w;
    let out_stride_c = g.out_h * g.out_w;

    let mut grad_weight = vec![T::zero(); g.out_channels * w_stride_out];
    if grad_weight.is_empty() {
        return Ok(grad_weight);
    }

    grad_weight
        .par_chunks_mut(w_stride_out)
        .enumerate()
        .for_each(|(oc, filter_grad)| {
            for b in 0..g.batch {
                let go_offset = b * out_stride_b + oc * out_stride_c;
                for oh in 0..g.out_h {
                    for ow in 0..g.out_w {
                        let go = grad_output[go_offset + oh * g.out_w + ow];
                        if go == T::zero() {
                            continue;
                        }
                        for ic in 0..g.in_channels {
                            let in_offset = b * in_stride_b + ic * in_stride_c;
                            let fg_offset = ic * g.k_h * g.k_w;
                            for kh in 0..g.k_h {
                                for kw in 0..g.k_w {
                                    if let Some((h, w)) = g.input_coord(oh, ow, kh, kw) {
                                        filter_grad[fg_offset + kh * g.k_w + kw] +=
                                            go * input[in_offset + h * g.in_w + w];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

    Ok(grad_weight)
}
