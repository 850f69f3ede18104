//! Raw CPU kernels for the training step.
//!
//! Every kernel works on flat, row-major slices plus an explicit shape. Keeping them
//! free of the `Tensor` type lets the core crate swap a kernel for a BLAS or vendor
//! call without touching the layers.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_conv2d;
pub mod cpu_matmul;
pub mod cpu_pool;
pub mod cpu_transpose;

pub use cpu_conv2d::{
    cpu_conv2d, cpu_conv2d_backward_input, cpu_conv2d_backward_weight, Conv2dGeometry,
};
pub use cpu_matmul::cpu_matmul;
pub use cpu_pool::{cpu_max_pool2d, cpu_max_pool2d_backward, Pool2dGeometry};
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the core crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// Checks that a flat buffer holds exactly `shape.iter().product()` elements.
pub(crate) fn check_len(len: usize, shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if len != expected {
        return Err(KernelError::ShapeMismatch {
            expected: vec![expected],
            got: vec![len],
        });
    }
    Ok(())
}
