use std::fmt::Debug;

use ndarray::{ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use super::{Adam, GradientDescent, GradientDescentWithMomentum};
use crate::error::Result;

/// Applies gradients to one parameter tensor.
///
/// Every trainable parameter owns its own optimizer instance, so stateful
/// optimizers keep buffers sized to exactly that parameter.
pub trait Optimizer: Debug + Send + Sync {
    /// Updates `params` in place given their gradient.
    ///
    /// # Arguments
    /// * `grad` - The gradient of the loss with respect to `params`.
    /// * `params` - The parameter values to update.
    ///
    /// # Returns
    /// An error if `grad` and `params` have different shapes.
    fn update_params(&mut self, grad: ArrayViewD<'_, f32>, params: ArrayViewMutD<'_, f32>)
    -> Result<()>;

    /// A stable name for the algorithm, recorded in checkpoints.
    fn kind(&self) -> &'static str;

    /// Returns every state buffer this optimizer keeps, keyed by name and flattened in
    /// logical order.
    fn state(&self) -> Vec<(&'static str, Vec<f32>)> {
        Vec::new()
    }

    /// Restores a state buffer previously returned by `state`.
    ///
    /// # Returns
    /// An error if the key is unknown or the buffer has the wrong length.
    fn load_state(&mut self, key: &str, values: &[f32]) -> Result<()> {
        let _ = values;
        Err(crate::MlErr::Checkpoint(format!(
            "{} keeps no optimizer state named {key}",
            self.kind()
        )))
    }
}

/// Serializable description of an optimization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerSpec {
    GradientDescent {
        learning_rate: f32,
    },
    Momentum {
        learning_rate: f32,
        momentum: f32,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

impl OptimizerSpec {
    /// Builds a fresh optimizer for a parameter of the given shape.
    pub fn build(&self, shape: &[usize]) -> Box<dyn Optimizer> {
        match *self {
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::Momentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(
                shape,
                learning_rate,
                momentum,
            )),
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(shape, learning_rate, beta1, beta2, epsilon)),
        }
    }

    /// The name recorded in checkpoints written with this optimizer.
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerSpec::GradientDescent { .. } => GradientDescent::KIND,
            OptimizerSpec::Momentum { .. } => GradientDescentWithMomentum::KIND,
            OptimizerSpec::Adam { .. } => Adam::KIND,
        }
    }

    /// The learning rate shared by every variant.
    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerSpec::GradientDescent { learning_rate }
            | OptimizerSpec::Momentum { learning_rate, .. }
            | OptimizerSpec::Adam { learning_rate, .. } => learning_rate,
        }
    }
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::GradientDescent { learning_rate: 0.5 }
    }
}
