//! Neural network layers with explicit backward passes.
//!
//! Every layer caches what its backward pass needs during `forward`, and `backward` both
//! accumulates parameter gradients and returns the gradient with respect to the layer input.
//! Calling `backward` without a preceding `forward` is an error.

pub mod activation;
pub mod conv;
pub mod init;
pub mod linear;
pub mod module;
pub mod pool;

pub use activation::Relu;
pub use conv::Conv2d;
pub use linear::Linear;
pub use module::{Module, Param, ParamMut, ParamRef};
pub use pool::{GlobalAvgPool, MaxPool2d};

use crate::tensor::TensorError;

pub(crate) fn missing_cache(layer: &str) -> TensorError {
    TensorError::InvalidArgument(format!("{layer}::backward called before forward"))
}
