#![allow(dead_code)]

use std::{
    collections::{BTreeSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use machine_learning::{
    Batch, BuildContext, InputSpec, Model, ModelOutputs, initialization::ParamInit,
    parameters::ParamSpec,
};
use ndarray::{Array2, ArrayD, ArrayView2, IxDyn};
use nrekit::data::{Bag, DataLoader, DataSource, InMemoryDataset, Instance};

pub const MAX_LENGTH: usize = 2;
pub const REL_TOT: usize = 3;

/// Always scores `[0.1, 0.7, 0.2]`, whatever the parameters.
#[derive(Debug)]
pub struct ConstantLogits;

impl Model for ConstantLogits {
    fn name(&self) -> &str {
        "constant_logits"
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec {
            max_length: MAX_LENGTH,
            batch_size: 4,
        }
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "bias",
            vec![REL_TOT],
            ParamInit::Constant { value: 0. },
        )]
    }

    fn build(&self, ctx: &BuildContext<'_>) -> machine_learning::Result<ModelOutputs> {
        let b = ctx.inputs.bag_count();
        let logits = Array2::from_shape_fn((b, REL_TOT), |(_, j)| [0.1, 0.7, 0.2][j]);

        Ok(ModelOutputs {
            loss: 1.,
            train_logits: logits.clone(),
            test_logits: logits,
            gradients: ctx
                .backward
                .then(|| vec![ArrayD::zeros(IxDyn(&[REL_TOT]))]),
        })
    }
}

/// Gets exactly the scripted amount of test bags right on each evaluation.
///
/// Training steps push `bias` down by a gradient of ones, so the weights differ after
/// every step.
#[derive(Debug)]
pub struct ScriptedAccuracy {
    correct: Mutex<VecDeque<usize>>,
}

impl ScriptedAccuracy {
    pub fn new(correct: &[usize]) -> Self {
        Self {
            correct: Mutex::new(correct.iter().copied().collect()),
        }
    }
}

impl Model for ScriptedAccuracy {
    fn name(&self) -> &str {
        "scripted_accuracy"
    }

    fn input_spec(&self) -> InputSpec {
        ConstantLogits.input_spec()
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        ConstantLogits.parameters()
    }

    fn build(&self, ctx: &BuildContext<'_>) -> machine_learning::Result<ModelOutputs> {
        let batch = ctx.inputs;
        let b = batch.bag_count();

        let correct = if ctx.backward {
            0
        } else {
            self.correct.lock().unwrap().pop_front().unwrap_or(0)
        };
        let logits = Array2::from_shape_fn((b, REL_TOT), |(i, j)| {
            let predicted = if i < correct { batch.rel[i] as usize } else { 0 };
            (j == predicted) as i32 as f32
        });

        Ok(ModelOutputs {
            loss: 1.,
            train_logits: logits.clone(),
            test_logits: logits,
            gradients: ctx
                .backward
                .then(|| vec![ArrayD::ones(IxDyn(&[REL_TOT]))]),
        })
    }
}

pub fn word_vec() -> Arc<Array2<f32>> {
    Arc::new(Array2::from_shape_fn((4, 2), |(i, j)| (i * 2 + j) as f32 / 8.))
}

pub fn bag(token: i32, relations: &[i32]) -> Bag {
    let rel = relations.iter().copied().find(|&r| r != 0).unwrap_or(0);
    Bag {
        instances: vec![Instance {
            word: vec![token, 3],
            pos1: vec![2, 3],
            pos2: vec![1, 2],
            length: 1,
            rel,
        }],
        rel,
        relations: relations.iter().copied().collect::<BTreeSet<_>>(),
    }
}

/// Four training bags, two of them NA.
pub fn train_source(batch_size: usize) -> DataLoader {
    let bags = vec![bag(0, &[1]), bag(1, &[0]), bag(2, &[2]), bag(0, &[0])];
    let dataset = InMemoryDataset::new(bags, word_vec(), MAX_LENGTH, REL_TOT, false).unwrap();
    DataLoader::new(dataset, batch_size, Some(0)).unwrap()
}

/// Two test pairs, one per non-NA relation.
pub fn test_source() -> DataLoader {
    let bags = vec![bag(0, &[1]), bag(2, &[2])];
    let dataset = InMemoryDataset::new(bags, word_vec(), MAX_LENGTH, REL_TOT, true).unwrap();
    DataLoader::new(dataset, 4, None).unwrap()
}

/// A test source with no relation facts at all.
pub fn na_only_source() -> DataLoader {
    let bags = vec![bag(0, &[0]), bag(1, &[0])];
    let dataset = InMemoryDataset::new(bags, word_vec(), MAX_LENGTH, REL_TOT, true).unwrap();
    DataLoader::new(dataset, 4, None).unwrap()
}

/// Counts how many batches were pulled from the wrapped source.
pub struct CountingSource<S> {
    pub inner: S,
    pub pulled: Arc<AtomicUsize>,
}

impl<S: DataSource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<S: DataSource> DataSource for CountingSource<S> {
    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn rel_tot(&self) -> usize {
        self.inner.rel_tot()
    }

    fn relfact_tot(&self) -> usize {
        self.inner.relfact_tot()
    }

    fn word_vec_mat(&self) -> ArrayView2<'_, f32> {
        self.inner.word_vec_mat()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn next_batch(&mut self) -> Option<Batch> {
        self.pulled.fetch_add(1, Ordering::SeqCst);
        self.inner.next_batch()
    }
}

/// Reports `batch_size` whatever the wrapped source actually batches.
pub struct ReportedBatchSize<S> {
    pub inner: S,
    pub batch_size: usize,
}

impl<S: DataSource> DataSource for ReportedBatchSize<S> {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn rel_tot(&self) -> usize {
        self.inner.rel_tot()
    }

    fn relfact_tot(&self) -> usize {
        self.inner.relfact_tot()
    }

    fn word_vec_mat(&self) -> ArrayView2<'_, f32> {
        self.inner.word_vec_mat()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn next_batch(&mut self) -> Option<Batch> {
        self.inner.next_batch()
    }
}
