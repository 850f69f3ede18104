//! Base optimizers.
//!
//! Optimizers see parameters as flat `f32` slices and keep any per-parameter state keyed by
//! the parameter's position in [`Module::params_mut`](crate::nn::Module::params_mut).

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

use crate::nn::ParamMut;
use std::fmt::{self, Debug};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimError {
    #[error("Unknown optimizer '{0}', expected one of: sgd, adam")]
    UnknownOptimizer(String),
    #[error("Parameter {key}: value has {param} elements but gradient has {grad}")]
    LengthMismatch {
        key: usize,
        param: usize,
        grad: usize,
    },
}

pub type Result<T> = std::result::Result<T, OptimError>;

/// A trait for optimizers (e.g., SGD, Adam).
///
/// Optimizers are responsible for updating model parameters based on computed gradients.
pub trait Optimizer: Debug + Send {
    fn name(&self) -> &'static str;

    fn learning_rate(&self) -> f32;

    /// Updates a single parameter in place.
    ///
    /// `key` identifies the parameter across steps so stateful optimizers can find their
    /// moments again.
    fn update(&mut self, key: usize, param: &mut [f32], grad: &[f32]) -> Result<()>;

    /// Updates every parameter, keyed by position.
    fn step(&mut self, params: &mut [ParamMut<'_>]) -> Result<()> {
        for (key, p) in params.iter_mut().enumerate() {
            self.update(key, p.value, p.grad)?;
        }
        Ok(())
    }
}

pub(crate) fn check_lengths(key: usize, param: &[f32], grad: &[f32]) -> Result<()> {
    if param.len() != grad.len() {
        return Err(OptimError::LengthMismatch {
            key,
            param: param.len(),
            grad: grad.len(),
        });
    }
    Ok(())
}

/// The closed set of base optimizers selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
        }
    }

    /// `weight_decay` only affects adam; plain SGD has no decay term.
    pub fn build(&self, learning_rate: f32, weight_decay: f32) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate)),
            OptimizerKind::Adam => {
                Box::new(Adam::new(learning_rate).with_weight_decay(weight_decay))
            }
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = OptimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            other => Err(OptimError::UnknownOptimizer(other.to_string())),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
