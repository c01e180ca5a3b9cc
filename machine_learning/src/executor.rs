use std::sync::Arc;

use log::debug;
use ndarray::Array2;

use crate::{
    batch::Batch,
    error::{MlErr, Result},
    gradients::{Gradient, GradientSet},
    model::{BuildContext, Model, ModelOutputs},
    parameters::ParameterView,
    session::Session,
};

/// An output that can be requested from a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    Loss,
    TrainLogits,
    TestLogits,
    Gradients,
    /// Applies the gradients of this step to the session's parameters.
    TrainOp,
}

/// The value produced for a `Fetch`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchValue {
    Scalar(f32),
    Logits(Array2<f32>),
    Gradients(GradientSet),
    Applied,
}

impl FetchValue {
    pub fn into_scalar(self) -> Result<f32> {
        match self {
            FetchValue::Scalar(x) => Ok(x),
            other => Err(unexpected("a scalar", &other)),
        }
    }

    pub fn into_logits(self) -> Result<Array2<f32>> {
        match self {
            FetchValue::Logits(logits) => Ok(logits),
            other => Err(unexpected("logits", &other)),
        }
    }

    pub fn into_gradients(self) -> Result<GradientSet> {
        match self {
            FetchValue::Gradients(grads) => Ok(grads),
            other => Err(unexpected("gradients", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &FetchValue) -> MlErr {
    let got = match got {
        FetchValue::Scalar(_) => "a scalar",
        FetchValue::Logits(_) => "logits",
        FetchValue::Gradients(_) => "gradients",
        FetchValue::Applied => "an applied update",
    };
    MlErr::InvalidInput(format!("expected {expected}, fetched {got}"))
}

/// Runs single forward, and optionally backward, passes of a model.
#[derive(Clone)]
pub struct StepExecutor {
    model: Arc<dyn Model>,
}

impl StepExecutor {
    /// Creates a new `StepExecutor`.
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    /// Executes one step against the session's parameters.
    ///
    /// If `Fetch::TrainOp` is requested the gradients of this step are applied to the
    /// session before returning.
    ///
    /// # Arguments
    /// * `session` - The session holding the parameters.
    /// * `batch` - The inputs of this step.
    /// * `fetches` - The requested outputs.
    /// * `keep_prob` - The dropout keep probability, `1.0` for inference.
    /// * `seed` - The seed of this step's random draws.
    ///
    /// # Returns
    /// One value per fetch, in the same order, or `SessionNotReady` / `ShapeMismatch`.
    pub fn run(
        &self,
        session: &mut Session,
        batch: &Batch,
        fetches: &[Fetch],
        keep_prob: f32,
        seed: u64,
    ) -> Result<Vec<FetchValue>> {
        let view = session.view()?;
        let (outputs, grads) = self.evaluate(&view, batch, fetches, keep_prob, seed)?;
        drop(view);

        if fetches.contains(&Fetch::TrainOp) {
            let grads = grads.as_deref().ok_or_else(|| {
                MlErr::InvalidInput("the model produced no gradients".into())
            })?;
            session.apply_gradients(grads)?;
        }

        Ok(collect(fetches, outputs, grads))
    }

    /// Executes one step against a read-only view of the parameters.
    ///
    /// This is what replicas run: parameters are never updated here, so requesting
    /// `Fetch::TrainOp` is an error.
    pub fn compute(
        &self,
        view: &ParameterView,
        batch: &Batch,
        fetches: &[Fetch],
        keep_prob: f32,
        seed: u64,
    ) -> Result<Vec<FetchValue>> {
        if fetches.contains(&Fetch::TrainOp) {
            return Err(MlErr::InvalidInput(
                "replicas cannot apply parameter updates".into(),
            ));
        }

        let (outputs, grads) = self.evaluate(view, batch, fetches, keep_prob, seed)?;
        Ok(collect(fetches, outputs, grads))
    }

    fn evaluate(
        &self,
        view: &ParameterView,
        batch: &Batch,
        fetches: &[Fetch],
        keep_prob: f32,
        seed: u64,
    ) -> Result<(ModelOutputs, Option<GradientSet>)> {
        if !(keep_prob > 0. && keep_prob <= 1.) {
            return Err(MlErr::InvalidInput(format!(
                "keep probability must be in (0, 1], got {keep_prob}"
            )));
        }

        batch.validate(&self.model.input_spec())?;

        let backward = fetches
            .iter()
            .any(|f| matches!(f, Fetch::Gradients | Fetch::TrainOp));

        let ctx = BuildContext {
            params: view,
            inputs: batch,
            keep_prob,
            seed,
            backward,
        };

        let mut outputs = self.model.build(&ctx)?;
        debug!(
            model = self.model.name(),
            bags = batch.bag_count(),
            loss = outputs.loss;
            "step evaluated"
        );

        let b = batch.bag_count();
        for (name, logits) in [
            ("train_logits", &outputs.train_logits),
            ("test_logits", &outputs.test_logits),
        ] {
            if logits.nrows() != b {
                return Err(MlErr::shape(name, logits.shape(), &[b, logits.ncols()]));
            }
        }

        if !backward {
            return Ok((outputs, None));
        }

        let specs = self.model.parameters();
        let raw = outputs
            .gradients
            .take()
            .ok_or_else(|| MlErr::InvalidInput("the model produced no gradients".into()))?;

        if raw.len() != specs.len() {
            return Err(MlErr::shape("gradients", &[raw.len()], &[specs.len()]));
        }

        let grads = specs
            .iter()
            .zip(raw)
            .map(|(spec, grad)| Ok(Gradient::new(grad, view.id(&spec.name)?)))
            .collect::<Result<GradientSet>>()?;

        Ok((outputs, Some(grads)))
    }
}

fn collect(
    fetches: &[Fetch],
    outputs: ModelOutputs,
    grads: Option<GradientSet>,
) -> Vec<FetchValue> {
    fetches
        .iter()
        .map(|fetch| match fetch {
            Fetch::Loss => FetchValue::Scalar(outputs.loss),
            Fetch::TrainLogits => FetchValue::Logits(outputs.train_logits.clone()),
            Fetch::TestLogits => FetchValue::Logits(outputs.test_logits.clone()),
            Fetch::Gradients => FetchValue::Gradients(grads.clone().unwrap_or_default()),
            Fetch::TrainOp => FetchValue::Applied,
        })
        .collect()
}
