use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip};

use super::{Optimizer, check_shapes, load_buffer};
use crate::error::{MlErr, Result};

/// Gradient descent with a velocity accumulator, `v = mu * v + g; p -= lr * v`.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: ArrayD<f32>,
}

impl GradientDescentWithMomentum {
    pub const KIND: &'static str = "momentum";

    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `shape` - The shape of the parameter this instance updates.
    /// * `learning_rate` - The step size.
    /// * `momentum` - The decay applied to the velocity on each step.
    pub fn new(shape: &[usize], learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: ArrayD::zeros(IxDyn(shape)),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(
        &mut self,
        grad: ArrayViewD<'_, f32>,
        params: ArrayViewMutD<'_, f32>,
    ) -> Result<()> {
        check_shapes(&grad, &params)?;
        check_shapes(&grad, &self.velocity)?;

        let (lr, mu) = (self.learning_rate, self.momentum);

        Zip::from(params)
            .and(grad)
            .and(self.velocity.view_mut())
            .for_each(|p, &g, v| {
                *v = mu * *v + g;
                *p -= lr * *v;
            });

        Ok(())
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn state(&self) -> Vec<(&'static str, Vec<f32>)> {
        vec![("velocity", self.velocity.iter().copied().collect())]
    }

    fn load_state(&mut self, key: &str, values: &[f32]) -> Result<()> {
        match key {
            "velocity" => load_buffer("velocity", &mut self.velocity, values),
            other => Err(MlErr::Checkpoint(format!(
                "{} keeps no optimizer state named {other}",
                Self::KIND
            ))),
        }
    }
}
