use crate::{check_len, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Resolved dimensions of a 2D pooling window over `[batch, channels, height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2dGeometry {
    pub batch: usize,
    pub channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    pub out_h: usize,
    pub out_w: usize,
}

impl Pool2dGeometry {
    /// Validates the window and computes the output size.
    ///
    /// Padding may be at most half the window, which guarantees that every window
    /// overlaps at least one real input cell.
    pub fn new(
        input_shape: &[usize],
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
    ) -> Result<Self> {
        if input_shape.len() != 4 {
            return Err(KernelError::ShapeMismatch {
                expected: vec![4],
                got: vec![input_shape.len()],
            });
        }
        if kernel_size.contains(&0) || stride.contains(&0) {
            return Err(KernelError::InvalidArgument(format!(
                "kernel {kernel_size:?} and stride {stride:?} must be non-zero"
            )));
        }
        if 2 * padding[0] > kernel_size[0] || 2 * padding[1] > kernel_size[1] {
            return Err(KernelError::InvalidArgument(format!(
                "padding {padding:?} must be at most half of kernel {kernel_size:?}"
            )));
        }

        let (batch, channels, in_h, in_w) =
            (input_shape[0], input_shape[1], input_shape[2], input_shape[3]);

        if in_h + 2 * padding[0] < kernel_size[0] {
            return Err(KernelError::ShapeMismatch {
                expected: vec![kernel_size[0]],
                got: vec![in_h + 2 * padding[0]],
            });
        }
        if in_w + 2 * padding[1] < kernel_size[1] {
            return Err(KernelError::ShapeMismatch {
                expected: vec![kernel_size[1]],
                got: vec![in_w + 2 * padding[1]],
            });
        }

        let out_h = (in_h + 2 * padding[0] - kernel_size[0]) / stride[0] + 1;
        let out_w = (in_w + 2 * padding[1] - kernel_size[1]) / stride[1] + 1;

        Ok(Self {
            batch,
            channels,
            in_h,
            in_w,
            kernel_size,
            stride,
            padding,
            out_h,
            out_w,
        })
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.channels, self.in_h, self.in_w]
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.channels, self.out_h, self.out_w]
    }
}

/// Performs 2D Max Pooling on CPU.
///
/// # Returns
///
/// The pooled values, shape `[batch_size, channels, out_h, out_w]`, and for every
/// output cell the index of the winning input cell within its `(batch, channel)` plane.
/// The indices feed [`cpu_max_pool2d_backward`].
pub fn cpu_max_pool2d<T: KernelElem>(
    input: &[T],
    geometry: &Pool2dGeometry,
) -> Result<(Vec<T>, Vec<usize>)> {
    let g = *geometry;
    check_len(input.len(), &g.input_shape())?;

    let in_plane = g.in_h * g.in_w;
    let out_plane = g.out_h * g.out_w;
    let planes = g.batch * g.channels;

    let mut output = vec![T::zero(); planes * out_plane];
    let mut argmax = vec![0usize; planes * out_plane];
    if output.is_empty() {
        return Ok((output, argmax));
    }

    // Parallelize over (Batch, Channel) planes
    output
        .par_chunks_mut(out_plane)
        .zip(argmax.par_chunks_mut(out_plane))
        .enumerate()
        .for_each(|(plane, (plane_out, plane_idx))| {
            let in_offset = plane * in_plane;
            for oh in 0..g.out_h {
                for ow in 0..g.out_w {
                    let h_start = (oh * g.stride[0]) as isize - g.padding[0] as isize;
                    let w_start = (ow * g.stride[1]) as isize - g.padding[1] as isize;

                    let mut best: Option<(T, usize)> = None;
                    for kh in 0..g.kernel_size[0] {
                        for kw in 0..g.kernel_size[1] {
                            let h_in = h_start + kh as isize;
                            let w_in = w_start + kw as isize;
                            if h_in < 0
                                || h_in >= g.in_h as isize
                                || w_in < 0
                                || w_in >= g.in_w as isize
                            {
                                continue;
                            }
                            let local = h_in as usize * g.in_w + w_in as usize;
                            let val = input[in_offset + local];
                            match best {
                                Some((max_val, _)) if !(val > max_val) => {}
                                _ => best = Some((val, local)),
                            }
                        }
                    }

                    // Geometry guarantees at least one real cell per window
                    let (val, local) = best.unwrap_or((T::zero(), 0));
                    plane_out[oh * g.out_w + ow] = val;
                    plane_idx[oh * g.out_w + ow] = local;
                }
            }
        });

    Ok((output, argmax))
}

/// Routes each output gradient to the input cell that won its window.
pub fn cpu_max_pool2d_backward<T: KernelElem>(
    grad_output: &[T],
    argmax: &[usize],
    geometry: &Pool2dGeometry,
) -> Result<Vec<T>> {
    let g = *geometry;
    check_len(grad_output.len(), &g.output_shape())?;
    check_len(argmax.len(), &g.output_shape())?;

    let in_plane = g.in_h * g.in_w;
    let out_plane = g.out_h * g.out_w;

    let mut grad_input = vec![T::zero(); g.batch * g.channels * in_plane];
    if grad_input.is_empty() {
        return Ok(grad_input);
    }

    grad_input
        .par_chunks_mut(in_plane)
        .zip(grad_output.par_chunks(out_plane))
        .zip(argmax.par_chunks(out_plane))
        .for_each(|((plane_grad, plane_go), plane_idx)| {
            for (&go, &local) in plane_go.iter().zip(plane_idx.iter()) {
                plane_grad[local] += go;
            }
        });

    Ok(grad_input)
}
