use ndarray::{Array2, ArrayD};

use crate::{batch::Batch, error::Result, parameters::ParamSpec, parameters::ParameterView};

/// The fixed input shapes a model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// Tokens per instance.
    pub max_length: usize,
    /// Upper bound on the amount of bags per batch.
    pub batch_size: usize,
}

/// Everything a model needs to evaluate one batch.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub params: &'a ParameterView,
    pub inputs: &'a Batch,
    /// Probability of keeping each activation, `1.0` disables dropout.
    pub keep_prob: f32,
    /// Seed for every random draw of this pass.
    pub seed: u64,
    /// Whether gradients must be computed.
    pub backward: bool,
}

/// The result of evaluating a model on one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutputs {
    pub loss: f32,
    /// Per-bag class scores used for training accuracy, `[bags, rel_tot]`.
    pub train_logits: Array2<f32>,
    /// Per-bag class scores used for evaluation and ranking, `[bags, rel_tot]`.
    pub test_logits: Array2<f32>,
    /// One gradient per declared parameter, in declaration order, when requested.
    pub gradients: Option<Vec<ArrayD<f32>>>,
}

/// A relation extraction model.
///
/// Implementors declare their inputs and trainable parameters up front and evaluate
/// batches against a read-only view of the parameters. Parameter updates are never
/// performed by the model itself.
pub trait Model: Send + Sync {
    /// A short name used in logs and checkpoints.
    fn name(&self) -> &str;

    /// The input shapes this model accepts.
    fn input_spec(&self) -> InputSpec;

    /// The trainable parameters of this model, in a fixed order.
    fn parameters(&self) -> Vec<ParamSpec>;

    /// Runs the forward pass, and the backward pass if `ctx.backward` is set.
    ///
    /// # Arguments
    /// * `ctx` - The inputs, parameters and pass configuration.
    ///
    /// # Returns
    /// The loss, both logit tensors and the gradients when requested.
    fn build(&self, ctx: &BuildContext<'_>) -> Result<ModelOutputs>;
}
