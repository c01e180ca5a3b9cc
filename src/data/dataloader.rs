use machine_learning::Batch;
use ndarray::{Array1, Array2, ArrayView2};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{DataSource, InMemoryDataset};
use crate::error::{FrameworkErr, Result};

/// Produces batches of whole bags from an `InMemoryDataset`.
///
/// Bags are visited in dataset order, or in a fresh seeded permutation on every
/// `reset` when shuffling is enabled. The final batch may hold fewer bags.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InMemoryDataset,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: Option<StdRng>,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The bags to iterate.
    /// * `batch_size` - The maximum amount of bags per batch, must be positive.
    /// * `shuffle_seed` - Shuffle the bags every epoch with this seed, if any.
    ///
    /// # Returns
    /// A `Config` error if `batch_size` is zero.
    pub fn new(
        dataset: InMemoryDataset,
        batch_size: usize,
        shuffle_seed: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(FrameworkErr::Config("batch_size must be greater than 0".into()));
        }

        let order = (0..dataset.len()).collect();
        let mut loader = Self {
            dataset,
            batch_size,
            order,
            cursor: 0,
            rng: shuffle_seed.map(StdRng::seed_from_u64),
        };

        loader.reset();
        Ok(loader)
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }

    /// The amount of batches in one pass.
    pub fn batches_per_epoch(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn assemble(&self, bag_ids: &[usize]) -> Batch {
        let bags: Vec<_> = bag_ids.iter().map(|&i| &self.dataset.bags()[i]).collect();
        let instances: Vec<_> = bags
            .iter()
            .copied()
            .flat_map(|bag| bag.instances.iter())
            .collect();
        let (n, l) = (instances.len(), self.dataset.max_length());

        let mut scope = Array2::zeros((bags.len(), 2));
        let mut start = 0;
        for (i, bag) in bags.iter().enumerate() {
            let end = start + bag.instances.len() as i32;
            scope[[i, 0]] = start;
            scope[[i, 1]] = end;
            start = end;
        }

        let multi_rel = self.dataset.multi_label().then(|| {
            Array2::from_shape_fn((bags.len(), self.dataset.rel_tot()), |(i, r)| {
                bags[i].relations.contains(&(r as i32)) as i32
            })
        });

        Batch {
            word: Array2::from_shape_fn((n, l), |(i, j)| instances[i].word[j]),
            pos1: Array2::from_shape_fn((n, l), |(i, j)| instances[i].pos1[j]),
            pos2: Array2::from_shape_fn((n, l), |(i, j)| instances[i].pos2[j]),
            rel: bags.iter().map(|bag| bag.rel).collect::<Array1<_>>(),
            ins_rel: instances.iter().map(|inst| inst.rel).collect::<Array1<_>>(),
            length: instances.iter().map(|inst| inst.length).collect::<Array1<_>>(),
            scope,
            multi_rel,
        }
    }
}

impl DataSource for DataLoader {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn rel_tot(&self) -> usize {
        self.dataset.rel_tot()
    }

    fn relfact_tot(&self) -> usize {
        self.dataset.relfact_tot()
    }

    fn word_vec_mat(&self) -> ArrayView2<'_, f32> {
        self.dataset.word_vec().view()
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if let Some(rng) = &mut self.rng {
            self.order.shuffle(rng);
        }
    }

    fn next_batch(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.assemble(&self.order[self.cursor..end]);

        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::{bag, word_vec};
    use machine_learning::InputSpec;
    use ndarray::arr2;

    fn create_test_dataset(multi_label: bool) -> InMemoryDataset {
        let bags = vec![bag(0, 1), bag(1, 2), bag(2, 1), bag(1, 3), bag(0, 1)];
        InMemoryDataset::new(bags, word_vec(), 2, 3, multi_label).unwrap()
    }

    #[test]
    fn batches_respect_size_and_emit_tail() {
        let mut dl = DataLoader::new(create_test_dataset(false), 2, None).unwrap();
        assert_eq!(dl.batches_per_epoch(), 3);

        let b1 = dl.next_batch().unwrap();
        assert_eq!(b1.rel.to_vec(), vec![0, 1]);
        assert_eq!(b1.scope, arr2(&[[0, 1], [1, 3]]));
        assert!(b1.multi_rel.is_none());

        let b2 = dl.next_batch().unwrap();
        assert_eq!(b2.rel.to_vec(), vec![2, 1]);
        assert_eq!(b2.instance_count(), 4);

        let b3 = dl.next_batch().unwrap();
        assert_eq!(b3.bag_count(), 1);
        assert!(dl.next_batch().is_none());

        dl.reset();
        assert_eq!(dl.next_batch().unwrap(), b1);
    }

    #[test]
    fn batches_are_valid_model_inputs() {
        let mut dl = DataLoader::new(create_test_dataset(true), 2, None).unwrap();
        let spec = InputSpec {
            max_length: 2,
            batch_size: 2,
        };

        while let Some(batch) = dl.next_batch() {
            batch.validate(&spec).unwrap();
            let multi_rel = batch.multi_rel.unwrap();
            for (row, rel) in multi_rel.outer_iter().zip(batch.rel.iter()) {
                assert_eq!(row[*rel as usize], 1);
            }
        }
    }

    #[test]
    fn shuffle_is_a_seeded_permutation() {
        let collect = |seed| {
            let mut dl = DataLoader::new(create_test_dataset(false), 5, Some(seed)).unwrap();
            dl.next_batch().unwrap().rel.to_vec()
        };

        let mut a = collect(1);
        assert_eq!(a, collect(1));

        a.sort();
        assert_eq!(a, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = DataLoader::new(create_test_dataset(false), 0, None);
        assert!(matches!(result, Err(FrameworkErr::Config(_))));
    }
}
