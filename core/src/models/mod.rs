//! Image classification models and the name-based registry.
//!
//! # Available Models
//!
//! - **ConvNet**: two conv/pool stages and a linear head. Cheap enough for smoke runs.
//! - **ResNet18 / ResNet34**: basic residual blocks. See [`resnet`].
//! - **ResNet50**: bottleneck residual blocks.
//!
//! # Example
//!
//! ```rust
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use syncbench::models;
//! use syncbench::tensor::Tensor;
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut model = models::build("ConvNet", 10, &mut rng).unwrap();
//!
//! let images = Tensor::<f32, 4>::zeros([2, 3, 16, 16]);
//! let logits = model.forward(&images).unwrap();
//! assert_eq!(logits.shape(), &[2, 10]);
//! ```

pub mod convnet;
pub mod resnet;
pub mod traits;

pub use convnet::ConvNet;
pub use resnet::ResNet;
pub use traits::ImageClassifier;

use crate::tensor::TensorError;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unknown model '{0}', expected one of: ConvNet, ResNet18, ResNet34, ResNet50")]
    UnknownModel(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// The closed set of architectures the registry can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    ConvNet,
    ResNet18,
    ResNet34,
    ResNet50,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::ConvNet,
        ModelKind::ResNet18,
        ModelKind::ResNet34,
        ModelKind::ResNet50,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::ConvNet => "ConvNet",
            ModelKind::ResNet18 => "ResNet18",
            ModelKind::ResNet34 => "ResNet34",
            ModelKind::ResNet50 => "ResNet50",
        }
    }

    pub fn build<R: Rng>(&self, num_classes: usize, rng: &mut R) -> Box<dyn ImageClassifier> {
        match self {
            ModelKind::ConvNet => Box::new(ConvNet::new(num_classes, rng)),
            ModelKind::ResNet18 => Box::new(ResNet::resnet18(num_classes, rng)),
            ModelKind::ResNet34 => Box::new(ResNet::resnet34(num_classes, rng)),
            ModelKind::ResNet50 => Box::new(ResNet::resnet50(num_classes, rng)),
        }
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    /// Names are case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::UnknownModel(s.to_string()))
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a model by registry name.
pub fn build<R: Rng>(
    name: &str,
    num_classes: usize,
    rng: &mut R,
) -> Result<Box<dyn ImageClassifier>, ModelError> {
    Ok(name.parse::<ModelKind>()?.build(num_classes, rng))
}
