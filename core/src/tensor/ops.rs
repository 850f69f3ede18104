//! Tensor operations.
//!
//! Element-wise updates, matrix multiplication and the convolution/pooling primitives
//! (forward and backward) used by the layers in [`crate::nn`]. The heavy lifting is delegated to
//! `syncbench_kernels`; this module owns shape bookkeeping and turns kernel errors into
//! [`TensorError`]s.
//!
//! Shapes must match exactly for element-wise operations; there is no broadcasting.
//!
//! # Examples
//!
//! ```rust
//! use syncbench::tensor::Tensor;
//!
//! let mut a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
//! let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
//!
//! a.add_assign(&b).unwrap();
//! assert_eq!(a.data(), &[4.0, 6.0]);
//! ```

use super::{Result, Tensor, TensorElem, TensorError};

use rayon::prelude::*;
use syncbench_kernels::{Conv2dGeometry, Pool2dGeometry};

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    fn check_same_shape(&self, rhs: &Self) -> Result<()> {
        if self.shape != rhs.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: rhs.shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Applies a function element-wise, returning a new tensor of the same shape.
    ///
    /// ```rust
    /// use syncbench::tensor::Tensor;
    /// let t = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
    /// let squared = t.map(|x| x * x);
    /// assert_eq!(squared.data(), &[1.0, 4.0, 9.0]);
    /// ```
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// In-place `self += rhs`.
    pub fn add_assign(&mut self, rhs: &Self) -> Result<()> {
        self.check_same_shape(rhs)?;
        self.data
            .par_iter_mut()
            .zip(rhs.data.par_iter())
            .for_each(|(o, r)| *o += *r);
        Ok(())
    }

    /// Matrix multiplication over the last two dimensions.
    ///
    /// Leading dimensions are batch dimensions and must match:
    /// `[..., M, K] x [..., K, N] -> [..., M, N]`.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        const { assert!(RANK >= 2, "Matmul requires rank >= 2") };

        let out_data =
            syncbench_kernels::cpu_matmul(&self.data, &rhs.data, &self.shape, &rhs.shape)?;

        let mut out_shape = self.shape;
        out_shape[RANK - 1] = rhs.shape[RANK - 1];
        Tensor::new(out_data, out_shape)
    }

    /// Swaps the last two dimensions.
    pub fn transpose(&self) -> Result<Self> {
        const { assert!(RANK >= 2, "Transpose requires rank >= 2") };

        let out_data = syncbench_kernels::cpu_transpose(&self.data, &self.shape)?;
        let mut new_shape = self.shape;
        new_shape.swap(RANK - 1, RANK - 2);
        Tensor::new(out_data, new_shape)
    }
}

impl<T> Tensor<T, 4>
where
    T: TensorElem,
{
    /// Performs 2D Convolution.
    ///
    /// # Arguments
    ///
    /// * `weight` - Weight tensor of shape `[out_channels, in_channels, kernel_h, kernel_w]`.
    /// * `stride`, `padding`, `dilation` - applied symmetrically to both spatial axes.
    ///
    /// # Returns
    ///
    /// The output `[batch_size, out_channels, out_h, out_w]` and the resolved geometry, which
    /// the backward pass needs again.
    pub fn conv2d(
        &self,
        weight: &Tensor<T, 4>,
        stride: usize,
        padding: usize,
        dilation: usize,
    ) -> Result<(Tensor<T, 4>, Conv2dGeometry)> {
        let geometry = Conv2dGeometry::new(
            &self.shape,
            &weight.shape,
            [stride; 2],
            [padding; 2],
            [dilation; 2],
        )?;
        let out_data = syncbench_kernels::cpu_conv2d(&self.data, &weight.data, &geometry)?;
        Ok((Tensor::new(out_data, geometry.output_shape())?, geometry))
    }

    /// Gradients of a convolution with respect to its input and its weight.
    ///
    /// `self` is the gradient of the convolution output.
    pub fn conv2d_backward(
        &self,
        input: &Tensor<T, 4>,
        weight: &Tensor<T, 4>,
        geometry: &Conv2dGeometry,
    ) -> Result<(Tensor<T, 4>, Tensor<T, 4>)> {
        let grad_input =
            syncbench_kernels::cpu_conv2d_backward_input(&self.data, &weight.data, geometry)?;
        let grad_weight =
            syncbench_kernels::cpu_conv2d_backward_weight(&self.data, &input.data, geometry)?;
        Ok((
            Tensor::new(grad_input, geometry.input_shape())?,
            Tensor::new(grad_weight, geometry.weight_shape())?,
        ))
    }

    /// Performs 2D Max Pooling.
    ///
    /// Returns the pooled tensor and the per-plane argmax indices consumed by
    /// [`Tensor::max_pool2d_backward`].
    pub fn max_pool2d(
        &self,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
    ) -> Result<(Tensor<T, 4>, Vec<usize>, Pool2dGeometry)> {
        let geometry = Pool2dGeometry::new(&self.shape, kernel_size, stride, padding)?;
        let (out_data, argmax) = syncbench_kernels::cpu_max_pool2d(&self.data, &geometry)?;
        Ok((Tensor::new(out_data, geometry.output_shape())?, argmax, geometry))
    }

    /// Routes `self` (the pooled gradient) back to the winning input cells.
    pub fn max_pool2d_backward(
        &self,
        argmax: &[usize],
        geometry: &Pool2dGeometry,
    ) -> Result<Tensor<T, 4>> {
        let grad_input =
            syncbench_kernels::cpu_max_pool2d_backward(&self.data, argmax, geometry)?;
        Tensor::new(grad_input, geometry.input_shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assign() {
        let mut a = Tensor::<f32, 2>::ones([2, 2]);
        let b = Tensor::<f32, 2>::full([2, 2], 2.0);
        a.add_assign(&b).unwrap();
        assert_eq!(a.data(), &[3.0; 4]);

        let c = Tensor::<f32, 2>::ones([1, 4]);
        assert!(a.add_assign(&c).is_err());
    }

    #[test]
    fn test_map() {
        let t = Tensor::<f32, 1>::new(vec![-1.0, 2.0], [2]).unwrap();
        let relu = t.map(|v| if v > 0.0 { v } else { 0.0 });
        assert_eq!(relu.data(), &[0.0, 2.0]);
    }

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let b = Tensor::<f32, 2>::new(vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0], [3, 2]).unwrap();

        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[31.0, 19.0, 85.0, 55.0]);
    }

    #[test]
    fn test_matmul_3d() {
        let a = Tensor::<f32, 3>::new(vec![1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0], [2, 2, 2])
            .unwrap();
        let b = Tensor::<f32, 3>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], [2, 2, 2])
            .unwrap();

        let c = a.matmul(&b).unwrap();
        assert_eq!(c.data(), &[1.0, 2.0, 3.0, 4.0, 10.0, 12.0, 14.0, 16.0]);
    }

    #[test]
    fn test_matmul_shape_error() {
        let a = Tensor::<f32, 2>::zeros([2, 3]);
        let b = Tensor::<f32, 2>::zeros([4, 2]);
        assert!(matches!(a.matmul(&b), Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_transpose() {
        let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let t_t = t.transpose().unwrap();
        assert_eq!(t_t.shape(), &[3, 2]);
        assert_eq!(t_t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_conv2d_shapes() {
        let input = Tensor::<f32, 4>::ones([2, 3, 8, 8]);
        let weight = Tensor::<f32, 4>::ones([4, 3, 3, 3]);

        let (out, geometry) = input.conv2d(&weight, 2, 1, 1).unwrap();
        assert_eq!(out.shape(), &[2, 4, 4, 4]);
        // Scalar settings apply to both spatial axes
        assert_eq!(geometry.stride, [2, 2]);
        assert_eq!(geometry.padding, [1, 1]);
        assert_eq!(geometry.dilation, [1, 1]);

        let grad_out = Tensor::<f32, 4>::ones(*out.shape());
        let (grad_in, grad_w) = grad_out.conv2d_backward(&input, &weight, &geometry).unwrap();
        assert_eq!(grad_in.shape(), input.shape());
        assert_eq!(grad_w.shape(), weight.shape());
    }

    #[test]
    fn test_conv2d_channel_mismatch() {
        let input = Tensor::<f32, 4>::ones([1, 3, 4, 4]);
        let weight = Tensor::<f32, 4>::ones([2, 2, 3, 3]);
        assert!(matches!(
            input.conv2d(&weight, 1, 0, 1),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_max_pool_round_trip_gradient() {
        let data = (0..16).map(|v| v as f32).collect();
        let input = Tensor::<f32, 4>::new(data, [1, 1, 4, 4]).unwrap();
        let (out, argmax, geometry) = input.max_pool2d([2, 2], [2, 2], [0, 0]).unwrap();
        assert_eq!(out.data(), &[5.0, 7.0, 13.0, 15.0]);

        let grad = Tensor::<f32, 4>::ones(*out.shape());
        let grad_in = grad.max_pool2d_backward(&argmax, &geometry).unwrap();
        assert_eq!(grad_in.data().iter().sum::<f32>(), 4.0);
        assert_eq!(grad_in.data()[15], 1.0);
        assert_eq!(grad_in.data()[0], 0.0);
    }
}
