mod adam;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::{Optimizer, OptimizerSpec};

use ndarray::{ArrayBase, ArrayD, Data, IxDyn};

use crate::error::{MlErr, Result};

fn check_shapes<A, B>(grad: &ArrayBase<A, IxDyn>, other: &ArrayBase<B, IxDyn>) -> Result<()>
where
    A: Data<Elem = f32>,
    B: Data<Elem = f32>,
{
    if grad.shape() != other.shape() {
        return Err(MlErr::shape("gradient", grad.shape(), other.shape()));
    }
    Ok(())
}

/// Overwrites a state buffer from its flattened values.
fn load_buffer(key: &str, buffer: &mut ArrayD<f32>, values: &[f32]) -> Result<()> {
    if values.len() != buffer.len() {
        return Err(MlErr::shape(
            format!("optimizer/{key}"),
            &[values.len()],
            &[buffer.len()],
        ));
    }

    buffer
        .iter_mut()
        .zip(values)
        .for_each(|(dst, &src)| *dst = src);
    Ok(())
}
