use std::{cell::RefCell, rc::Rc};

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{ConstParamGen, ParamGen, RandParamGen};
use crate::error::{MlErr, Result};

/// How a declared parameter gets its initial values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamInit {
    Constant { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform { fan_in: usize, fan_out: usize },
    Values { values: Vec<f32> },
}

impl ParamInit {
    /// Materializes a tensor of `shape` following this initializer.
    ///
    /// # Arguments
    /// * `shape` - The declared parameter shape.
    /// * `rng` - The random source shared by every parameter of a session.
    ///
    /// # Returns
    /// An error if the distribution is invalid or explicit values don't fill `shape`.
    pub fn generate<R: Rng>(&self, shape: &[usize], rng: &Rc<RefCell<R>>) -> Result<ArrayD<f32>> {
        let len = shape.iter().product::<usize>();

        if let ParamInit::Values { values } = self {
            if values.len() != len {
                return Err(MlErr::shape("initial values", &[values.len()], &[len]));
            }
            return ArrayD::from_shape_vec(IxDyn(shape), values.clone())
                .map_err(|e| MlErr::Init(format!("cannot shape initial values: {e}")));
        }

        let mut tensor = ArrayD::zeros(IxDyn(shape));
        let rng = Rc::clone(rng);

        match *self {
            ParamInit::Constant { value } => ConstParamGen(value).fill(tensor.view_mut()),
            ParamInit::Uniform { low, high } => {
                RandParamGen::uniform(rng, low, high)?.fill(tensor.view_mut())
            }
            ParamInit::Normal { mean, std_dev } => {
                RandParamGen::normal(rng, mean, std_dev)?.fill(tensor.view_mut())
            }
            ParamInit::XavierUniform { fan_in, fan_out } => {
                RandParamGen::xavier_uniform(rng, fan_in, fan_out)?.fill(tensor.view_mut())
            }
            ParamInit::Values { .. } => {}
        }

        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn seeded_rng() -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(7)))
    }

    #[test]
    fn constant_fills_shape() {
        let init = ParamInit::Constant { value: 0.5 };
        let tensor = init.generate(&[2, 3], &seeded_rng()).unwrap();

        assert_eq!(tensor.shape(), &[2, 3]);
        assert!(tensor.iter().all(|&x| x == 0.5));
    }

    #[test]
    fn explicit_values_must_match_shape() {
        let init = ParamInit::Values {
            values: vec![1., 2., 3.],
        };

        assert!(init.generate(&[2, 2], &seeded_rng()).is_err());
        assert_eq!(init.generate(&[3], &seeded_rng()).unwrap().len(), 3);
    }

    #[test]
    fn same_seed_same_values() {
        let init = ParamInit::Normal {
            mean: 0.,
            std_dev: 1.,
        };

        let a = init.generate(&[4], &seeded_rng()).unwrap();
        let b = init.generate(&[4], &seeded_rng()).unwrap();
        assert_eq!(a, b);
    }
}
