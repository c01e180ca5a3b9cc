use log::trace;
use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::{
    error::{MlErr, Result},
    parameters::ParamId,
};

/// The gradient of the loss with respect to one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub grad: ArrayD<f32>,
    pub param: ParamId,
}

impl Gradient {
    pub fn new(grad: ArrayD<f32>, param: ParamId) -> Self {
        Self { grad, param }
    }
}

/// An ordered list of gradients as produced by one replica.
pub type GradientSet = Vec<Gradient>;

/// Combines the gradient sets of several replicas into one.
///
/// The `i`-th output gradient is the elementwise arithmetic mean of the `i`-th gradient
/// of every replica, paired with the parameter identity reported by the first replica.
///
/// # Arguments
/// * `tower_grads` - One gradient set per replica, all in the same parameter order.
///
/// # Returns
/// An error if there are no replicas, the sets differ in length, a position targets
/// different parameters across replicas or shapes disagree.
pub fn average_gradients(tower_grads: &[GradientSet]) -> Result<GradientSet> {
    let Some((first, rest)) = tower_grads.split_first() else {
        return Err(MlErr::InvalidInput(
            "cannot average the gradients of zero replicas".into(),
        ));
    };

    for (worker, set) in rest.iter().enumerate() {
        if set.len() != first.len() {
            return Err(MlErr::shape(
                format!("gradient set of replica {}", worker + 1),
                &[set.len()],
                &[first.len()],
            ));
        }
    }

    trace!(replicas = tower_grads.len(), params = first.len(); "averaging gradients");

    first
        .iter()
        .enumerate()
        .map(|(position, reference)| {
            let mut views: Vec<ArrayViewD<'_, f32>> = Vec::with_capacity(tower_grads.len());

            for set in tower_grads {
                let gradient = &set[position];

                if gradient.param != reference.param {
                    return Err(MlErr::ParameterMismatch {
                        position,
                        expected: reference.param.to_string(),
                        got: gradient.param.to_string(),
                    });
                }

                if gradient.grad.shape() != reference.grad.shape() {
                    return Err(MlErr::shape(
                        format!("gradient at position {position}"),
                        gradient.grad.shape(),
                        reference.grad.shape(),
                    ));
                }

                views.push(gradient.grad.view());
            }

            let stacked = ndarray::stack(Axis(0), &views).map_err(|e| {
                MlErr::InvalidInput(format!("cannot stack gradients at {position}: {e}"))
            })?;

            let grad = stacked
                .mean_axis(Axis(0))
                .ok_or_else(|| MlErr::InvalidInput("empty gradient stack".into()))?;

            Ok(Gradient::new(grad, reference.param))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{IxDyn, arr1, arr2};

    fn gradient(values: &[f32], param: usize) -> Gradient {
        Gradient::new(arr1(values).into_dyn(), ParamId(param))
    }

    #[test]
    fn averages_elementwise() {
        let towers = vec![
            vec![gradient(&[1., 2.], 0), gradient(&[0.], 1)],
            vec![gradient(&[3., 4.], 0), gradient(&[2.], 1)],
        ];

        let averaged = average_gradients(&towers).unwrap();
        assert_eq!(averaged[0], gradient(&[2., 3.], 0));
        assert_eq!(averaged[1], gradient(&[1.], 1));
    }

    #[test]
    fn single_replica_is_identity() {
        let matrix = arr2(&[[1.5, -2.], [0.25, 4.]]).into_dyn();
        let towers = vec![vec![Gradient::new(matrix.clone(), ParamId(3))]];

        let averaged = average_gradients(&towers).unwrap();
        assert_eq!(averaged, vec![Gradient::new(matrix, ParamId(3))]);
    }

    #[test]
    fn three_replicas_of_matrices() {
        let towers: Vec<GradientSet> = [0., 3., 6.]
            .iter()
            .map(|&v| vec![Gradient::new(ArrayD::from_elem(IxDyn(&[2, 3]), v), ParamId(0))])
            .collect();

        let averaged = average_gradients(&towers).unwrap();
        assert!(averaged[0].grad.iter().all(|&x| x == 3.));
        assert_eq!(averaged[0].grad.shape(), &[2, 3]);
    }

    #[test]
    fn zero_replicas_fail() {
        assert!(matches!(
            average_gradients(&[]),
            Err(MlErr::InvalidInput(_))
        ));
    }

    #[test]
    fn different_lengths_fail() {
        let towers = vec![
            vec![gradient(&[1.], 0), gradient(&[1.], 1)],
            vec![gradient(&[1.], 0)],
        ];

        assert!(matches!(
            average_gradients(&towers),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn different_parameters_fail() {
        let towers = vec![vec![gradient(&[1.], 0)], vec![gradient(&[1.], 1)]];

        assert!(matches!(
            average_gradients(&towers),
            Err(MlErr::ParameterMismatch { position: 0, .. })
        ));
    }
}
