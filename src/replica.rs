use std::{collections::HashMap, ops::Range, sync::Arc};

use log::debug;
use machine_learning::{
    Batch, Fetch, FetchValue, GradientSet, Model, Session, StepExecutor, average_gradients,
};
use ndarray::{Array2, ArrayView2, Axis, concatenate};
use tokio::task::JoinSet;

use crate::error::{FrameworkErr, Result};

/// The result of one synchronous training step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// The mean of the replicas' losses.
    pub loss: f32,
    /// The replicas' training logits, concatenated in worker order.
    pub logits: Array2<f32>,
}

/// A set of model replicas sharing one parameter store.
///
/// Every training step splits the batch's bags across the replicas, computes every
/// replica's gradients on the blocking pool, waits for all of them and applies their
/// average as a single update.
pub struct ReplicaSet {
    replicas: Vec<StepExecutor>,
    shard_size: usize,
}

impl ReplicaSet {
    /// Creates a new `ReplicaSet`.
    ///
    /// # Arguments
    /// * `model` - The model every replica runs.
    /// * `worker_count` - The amount of replicas.
    /// * `batch_size` - The amount of bags per batch, must divide evenly across replicas.
    ///
    /// # Returns
    /// A `Config` error if the batch can't be split evenly.
    pub fn new(model: Arc<dyn Model>, worker_count: usize, batch_size: usize) -> Result<Self> {
        if worker_count == 0 || batch_size == 0 || batch_size % worker_count != 0 {
            return Err(FrameworkErr::Config(format!(
                "batch size ({batch_size}) must be a positive multiple of the worker count ({worker_count})"
            )));
        }

        let replicas = (0..worker_count)
            .map(|_| StepExecutor::new(Arc::clone(&model)))
            .collect();

        Ok(Self {
            replicas,
            shard_size: batch_size / worker_count,
        })
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Runs one training step and applies the averaged update to `session`.
    ///
    /// # Arguments
    /// * `session` - The session owning the parameters.
    /// * `batch` - The full batch, split into contiguous bag shards.
    /// * `keep_prob` - The dropout keep probability.
    /// * `seed` - The seed of this step, every replica derives its own from it.
    ///
    /// # Returns
    /// The step's loss and logits, or the first replica error.
    pub async fn train_step(
        &self,
        session: &mut Session,
        batch: &Batch,
        keep_prob: f32,
        seed: u64,
    ) -> Result<StepOutput> {
        let view = session.view()?;
        let model = self.replicas[0].model();
        batch.validate(&model.input_spec())?;

        let shards = self.shards(batch.bag_count());
        let workers = shards.len();
        let mut futs = JoinSet::new();
        let mut task_workers = HashMap::with_capacity(workers);

        for (worker_id, bags) in shards.into_iter().enumerate() {
            let shard = batch.slice_bags(bags)?;
            let executor = self.replicas[worker_id].clone();
            let view = view.clone();
            let seed = seed
                .wrapping_mul(self.replicas.len() as u64)
                .wrapping_add(worker_id as u64);

            let handle = futs.spawn_blocking(move || {
                let fetches = [Fetch::Loss, Fetch::TrainLogits, Fetch::Gradients];
                executor.compute(&view, &shard, &fetches, keep_prob, seed)
            });
            task_workers.insert(handle.id(), worker_id);
        }

        let mut results: Vec<Option<Vec<FetchValue>>> = vec![None; workers];
        let mut failures = Vec::new();

        while let Some(joined) = futs.join_next_with_id().await {
            let (task, outcome) = match joined {
                Ok((task, outcome)) => (task, outcome.map_err(|e| e.to_string())),
                Err(e) => (e.id(), Err(e.to_string())),
            };

            let Some(worker_id) = task_workers.remove(&task) else {
                continue;
            };

            match outcome {
                Ok(values) => results[worker_id] = Some(values),
                Err(msg) => failures.push((worker_id, msg)),
            }
        }

        // The lowest failing worker is reported.
        if let Some((worker_id, msg)) = failures.into_iter().min_by_key(|(id, _)| *id) {
            return Err(FrameworkErr::Worker { worker_id, msg });
        }

        let mut loss = 0.;
        let mut logits = Vec::with_capacity(workers);
        let mut tower_grads: Vec<GradientSet> = Vec::with_capacity(workers);

        for (worker_id, values) in results.into_iter().flatten().enumerate() {
            let mut values = values.into_iter();
            let mut next = || {
                values.next().ok_or_else(|| FrameworkErr::Worker {
                    worker_id,
                    msg: "missing fetched value".into(),
                })
            };

            loss += next()?.into_scalar()?;
            logits.push(next()?.into_logits()?);
            tower_grads.push(next()?.into_gradients()?);
        }

        let grads = average_gradients(&tower_grads)?;
        drop(view);
        session.apply_gradients(&grads)?;

        let views: Vec<ArrayView2<'_, f32>> = logits.iter().map(|l| l.view()).collect();
        let logits = concatenate(Axis(0), &views)
            .map_err(|e| FrameworkErr::Worker {
                worker_id: 0,
                msg: format!("cannot gather logits: {e}"),
            })?;

        debug!(workers = workers, global_step = session.global_step(); "replicas synchronized");

        Ok(StepOutput {
            loss: loss / workers as f32,
            logits,
        })
    }

    fn shards(&self, bags: usize) -> Vec<Range<usize>> {
        (0..bags)
            .step_by(self.shard_size)
            .map(|start| start..(start + self.shard_size).min(bags))
            .collect()
    }
}
