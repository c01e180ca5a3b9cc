use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip};

use super::{Optimizer, check_shapes, load_buffer};
use crate::error::{MlErr, Result};

/// Adam with bias-corrected step size.
///
/// The running powers of both betas are part of the state so a restored optimizer
/// continues with the same correction it would have applied without interruption.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    beta_powers: [f32; 2],
    first_moment: ArrayD<f32>,
    second_moment: ArrayD<f32>,
}

impl Adam {
    pub const KIND: &'static str = "adam";

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `shape` - The shape of the parameter this instance updates.
    /// * `learning_rate` - The step size.
    /// * `beta1` - Decay of the first moment estimate.
    /// * `beta2` - Decay of the second moment estimate.
    /// * `epsilon` - Added to the denominator for numerical stability.
    pub fn new(shape: &[usize], learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            beta_powers: [1., 1.],
            first_moment: ArrayD::zeros(IxDyn(shape)),
            second_moment: ArrayD::zeros(IxDyn(shape)),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(
        &mut self,
        grad: ArrayViewD<'_, f32>,
        params: ArrayViewMutD<'_, f32>,
    ) -> Result<()> {
        check_shapes(&grad, &params)?;
        check_shapes(&grad, &self.first_moment)?;

        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        self.beta_powers[0] *= b1;
        self.beta_powers[1] *= b2;
        let step_size =
            self.learning_rate * (1. - self.beta_powers[1]).sqrt() / (1. - self.beta_powers[0]);

        Zip::from(params)
            .and(grad)
            .and(self.first_moment.view_mut())
            .and(self.second_moment.view_mut())
            .for_each(|p, &g, m, v| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;
                *p -= step_size * *m / (v.sqrt() + eps);
            });

        Ok(())
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn state(&self) -> Vec<(&'static str, Vec<f32>)> {
        vec![
            ("m", self.first_moment.iter().copied().collect()),
            ("v", self.second_moment.iter().copied().collect()),
            ("beta_powers", self.beta_powers.to_vec()),
        ]
    }

    fn load_state(&mut self, key: &str, values: &[f32]) -> Result<()> {
        match key {
            "m" => load_buffer("m", &mut self.first_moment, values),
            "v" => load_buffer("v", &mut self.second_moment, values),
            "beta_powers" => {
                self.beta_powers = values.try_into().map_err(|_| {
                    MlErr::shape("optimizer/beta_powers", &[values.len()], &[2])
                })?;
                Ok(())
            }
            other => Err(MlErr::Checkpoint(format!(
                "{} keeps no optimizer state named {other}",
                Self::KIND
            ))),
        }
    }
}
