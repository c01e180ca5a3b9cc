use std::sync::Arc;

use machine_learning::{
    Batch, BuildContext, InputSpec, MlErr, Model, ModelOutputs, Result,
    initialization::ParamInit, parameters::ParamSpec,
};
use ndarray::{Array1, Array2, ArrayView2, Axis, Ix1, Ix2, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

const WEIGHT: &str = "softmax/weight";
const BIAS: &str = "softmax/bias";

/// A bag-level softmax classifier over averaged word embeddings.
///
/// Every instance is encoded as the mean embedding of its tokens and every bag as the
/// mean of its instances. Embeddings are frozen, only the softmax layer is trained.
#[derive(Debug, Clone)]
pub struct BagSoftmax {
    word_vec: Arc<Array2<f32>>,
    input: InputSpec,
    rel_tot: usize,
}

impl BagSoftmax {
    /// Creates a new `BagSoftmax` model.
    ///
    /// # Arguments
    /// * `word_vec` - The embedding matrix, one row per vocabulary entry.
    /// * `input` - The input shapes the model is built for.
    /// * `rel_tot` - The amount of relation classes.
    pub fn new(word_vec: Arc<Array2<f32>>, input: InputSpec, rel_tot: usize) -> Self {
        Self {
            word_vec,
            input,
            rel_tot,
        }
    }

    fn dim(&self) -> usize {
        self.word_vec.ncols()
    }

    fn encode(&self, batch: &Batch) -> Result<Array2<f32>> {
        let vocab = self.word_vec.nrows();
        let mut instances = Array2::<f32>::zeros((batch.instance_count(), self.dim()));

        for (mut out, (words, &length)) in instances
            .outer_iter_mut()
            .zip(batch.word.outer_iter().zip(batch.length.iter()))
        {
            let length = (length.max(0) as usize).min(words.len());

            for &w in words.iter().take(length) {
                let row = usize::try_from(w)
                    .ok()
                    .filter(|&row| row < vocab)
                    .ok_or_else(|| {
                        MlErr::InvalidInput(format!("token id {w} is outside the vocabulary"))
                    })?;
                out += &self.word_vec.row(row);
            }

            if length > 0 {
                out /= length as f32;
            }
        }

        let mut bags = Array2::<f32>::zeros((batch.bag_count(), self.dim()));
        for (mut out, scope) in bags.outer_iter_mut().zip(batch.scope.outer_iter()) {
            let (start, end) = (scope[0] as usize, scope[1] as usize);
            if let Some(mean) = instances.slice(s![start..end, ..]).mean_axis(Axis(0)) {
                out.assign(&mean);
            }
        }

        Ok(bags)
    }

    fn labels(&self, batch: &Batch) -> Result<Vec<usize>> {
        batch
            .rel
            .iter()
            .map(|&rel| {
                usize::try_from(rel)
                    .ok()
                    .filter(|&rel| rel < self.rel_tot)
                    .ok_or_else(|| {
                        MlErr::InvalidInput(format!(
                            "relation {rel} is outside [0, {})",
                            self.rel_tot
                        ))
                    })
            })
            .collect()
    }
}

fn dropout(features: &mut Array2<f32>, keep_prob: f32, seed: u64) {
    if keep_prob >= 1. {
        return;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    features.mapv_inplace(|x| {
        if rng.random::<f32>() < keep_prob {
            x / keep_prob
        } else {
            0.
        }
    });
}

fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    probs
}

impl Model for BagSoftmax {
    fn name(&self) -> &str {
        "bag_softmax"
    }

    fn input_spec(&self) -> InputSpec {
        self.input
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new(
                WEIGHT,
                vec![self.rel_tot, self.dim()],
                ParamInit::XavierUniform {
                    fan_in: self.dim(),
                    fan_out: self.rel_tot,
                },
            ),
            ParamSpec::new(BIAS, vec![self.rel_tot], ParamInit::Constant { value: 0. }),
        ]
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<ModelOutputs> {
        let batch = ctx.inputs;
        let labels = self.labels(batch)?;

        let mut features = self.encode(batch)?;
        dropout(&mut features, ctx.keep_prob, ctx.seed);

        let weight = ctx.params.get(WEIGHT)?;
        let weight: ArrayView2<'_, f32> = weight
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| MlErr::InvalidInput(format!("{WEIGHT} must be a matrix")))?;
        let bias = ctx.params.get(BIAS)?;
        let bias = bias
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| MlErr::InvalidInput(format!("{BIAS} must be a vector")))?;

        let logits = features.dot(&weight.t()) + &bias;
        let probs = softmax(&logits);

        let n = labels.len() as f32;
        let loss = labels
            .iter()
            .enumerate()
            .map(|(b, &y)| -probs[[b, y]].max(f32::MIN_POSITIVE).ln())
            .sum::<f32>()
            / n;

        let gradients = ctx.backward.then(|| {
            let mut dlogits = probs.clone();
            for (b, &y) in labels.iter().enumerate() {
                dlogits[[b, y]] -= 1.;
            }
            dlogits /= n;

            let dweight = dlogits.t().dot(&features);
            let dbias: Array1<f32> = dlogits.sum_axis(Axis(0));
            vec![dweight.into_dyn(), dbias.into_dyn()]
        });

        Ok(ModelOutputs {
            loss,
            train_logits: logits,
            test_logits: probs,
            gradients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine_learning::{
        Fetch, Session, StepExecutor, gradients::Gradient, optimization::OptimizerSpec,
    };
    use ndarray::{ArrayD, arr1, arr2};

    fn create_test_model() -> BagSoftmax {
        let word_vec = arr2(&[[1., 0.], [0., 1.], [1., 1.], [0., 0.]]);
        let input = InputSpec {
            max_length: 3,
            batch_size: 2,
        };
        BagSoftmax::new(Arc::new(word_vec), input, 3)
    }

    fn create_test_batch() -> Batch {
        let word = arr2(&[[0, 0, 3], [1, 2, 3], [2, 3, 3]]);
        Batch {
            pos1: word.clone(),
            pos2: word.clone(),
            word,
            rel: arr1(&[1, 2]),
            ins_rel: arr1(&[1, 2, 2]),
            length: arr1(&[2, 2, 1]),
            scope: arr2(&[[0, 1], [1, 3]]),
            multi_rel: None,
        }
    }

    fn ready_session(model: &BagSoftmax, learning_rate: f32) -> Session {
        let mut session = Session::new();
        session
            .initialize(
                &model.parameters(),
                OptimizerSpec::GradientDescent { learning_rate },
                7,
            )
            .unwrap();
        session
    }

    #[test]
    fn encodes_bags_as_mean_embeddings() {
        let features = create_test_model().encode(&create_test_batch()).unwrap();

        // bag 0: [1, 0]; bag 1: mean of [0.5, 1] and [1, 1]
        assert_eq!(features, arr2(&[[1., 0.], [0.75, 1.]]));
    }

    #[test]
    fn test_logits_are_probabilities() {
        let model = create_test_model();
        let session = ready_session(&model, 0.5);
        let view = session.view().unwrap();

        let outputs = model
            .build(&BuildContext {
                params: &view,
                inputs: &create_test_batch(),
                keep_prob: 1.,
                seed: 0,
                backward: false,
            })
            .unwrap();

        for row in outputs.test_logits.outer_iter() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
        assert!(outputs.gradients.is_none());
        assert!(outputs.loss > 0.);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let model = create_test_model();
        let batch = create_test_batch();
        let mut session = ready_session(&model, 1.);

        let loss_of = |session: &Session| {
            let view = session.view().unwrap();
            let ctx = BuildContext {
                params: &view,
                inputs: &batch,
                keep_prob: 1.,
                seed: 0,
                backward: true,
            };
            model.build(&ctx).unwrap()
        };

        let outputs = loss_of(&session);
        let analytic = outputs.gradients.unwrap()[0][[2, 1]];

        let eps = 1e-3;
        let weight = session.view().unwrap().id(WEIGHT).unwrap();
        let mut nudge = ArrayD::zeros(vec![3, 2]);
        nudge[[2, 1]] = -eps;
        session
            .apply_gradients(&[Gradient::new(nudge, weight)])
            .unwrap();

        let numeric = (loss_of(&session).loss - outputs.loss) / eps;
        assert!((numeric - analytic).abs() < 1e-2, "{numeric} vs {analytic}");
    }

    #[test]
    fn training_reduces_loss() {
        let model = Arc::new(create_test_model());
        let executor = StepExecutor::new(model.clone());
        let mut session = ready_session(&model, 0.5);
        let batch = create_test_batch();

        let loss = |session: &mut Session| {
            executor
                .run(session, &batch, &[Fetch::Loss], 1., 0)
                .unwrap()
                .remove(0)
                .into_scalar()
                .unwrap()
        };

        let before = loss(&mut session);
        for step in 0..20 {
            executor
                .run(&mut session, &batch, &[Fetch::TrainOp], 1., step)
                .unwrap();
        }
        assert!(loss(&mut session) < before);
    }

    #[test]
    fn dropout_is_seeded() {
        let mut a = Array2::from_elem((4, 4), 1.);
        let mut b = a.clone();
        dropout(&mut a, 0.5, 3);
        dropout(&mut b, 0.5, 3);

        assert_eq!(a, b);
        assert!(a.iter().all(|&x| x == 0. || x == 2.));
    }

    #[test]
    fn unknown_label_fails() {
        let model = create_test_model();
        let session = ready_session(&model, 0.5);
        let view = session.view().unwrap();
        let mut batch = create_test_batch();
        batch.rel = arr1(&[1, 3]);

        let result = model.build(&BuildContext {
            params: &view,
            inputs: &batch,
            keep_prob: 1.,
            seed: 0,
            backward: false,
        });
        assert!(matches!(result, Err(MlErr::InvalidInput(_))));
    }
}
