use crate::nn::Module;
use crate::tensor::{Result, Tensor};

/// A trainable image classifier.
///
/// Implementations cache activations in [`ImageClassifier::forward`] and consume them in
/// [`ImageClassifier::backward`], so one backward pass must follow each forward pass.
pub trait ImageClassifier: Module {
    /// Registry name of the architecture (e.g. `ResNet50`).
    fn name(&self) -> &str;

    /// Performs a forward pass.
    ///
    /// # Arguments
    ///
    /// * `images` - A tensor of shape `[batch_size, 3, height, width]`.
    ///
    /// # Returns
    ///
    /// * `logits` - A tensor of shape `[batch_size, num_classes]`.
    fn forward(&mut self, images: &Tensor<f32, 4>) -> Result<Tensor<f32, 2>>;

    /// Back-propagates `grad_logits` and accumulates gradients into every parameter.
    fn backward(&mut self, grad_logits: &Tensor<f32, 2>) -> Result<()>;
}
