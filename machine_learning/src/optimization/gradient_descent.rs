use ndarray::{ArrayViewD, ArrayViewMutD};

use super::{Optimizer, check_shapes};
use crate::error::Result;

/// Plain gradient descent, `p -= lr * g`.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    pub const KIND: &'static str = "gradient_descent";

    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(
        &mut self,
        grad: ArrayViewD<'_, f32>,
        mut params: ArrayViewMutD<'_, f32>,
    ) -> Result<()> {
        check_shapes(&grad, &params)?;
        params.scaled_add(-self.learning_rate, &grad);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }
}
