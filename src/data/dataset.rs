use std::{collections::BTreeSet, sync::Arc};

use ndarray::Array2;

use crate::error::{FrameworkErr, Result};

/// The relation id of the "no relation" class.
pub const NA_REL: i32 = 0;

/// One tokenized sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// `max_length` token ids, padded with the blank token.
    pub word: Vec<i32>,
    pub pos1: Vec<i32>,
    pub pos2: Vec<i32>,
    /// The amount of real tokens.
    pub length: i32,
    pub rel: i32,
}

/// The sentences that mention one entity pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Bag {
    pub instances: Vec<Instance>,
    /// The label used for training accuracy.
    pub rel: i32,
    /// Every relation that holds for the entity pair.
    pub relations: BTreeSet<i32>,
}

/// A fully materialized set of bags.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    bags: Vec<Bag>,
    word_vec: Arc<Array2<f32>>,
    max_length: usize,
    rel_tot: usize,
    relfact_tot: usize,
    multi_label: bool,
}

impl InMemoryDataset {
    /// Creates a new dataset.
    ///
    /// # Arguments
    /// * `bags` - The bags in iteration order.
    /// * `word_vec` - The embedding matrix the token ids index into.
    /// * `max_length` - The length every instance is padded to.
    /// * `rel_tot` - The amount of relation classes.
    /// * `multi_label` - Whether batches carry the multi-label ground truth.
    ///
    /// # Returns
    /// A `Data` error if a bag is empty or an instance is inconsistent.
    pub fn new(
        bags: Vec<Bag>,
        word_vec: Arc<Array2<f32>>,
        max_length: usize,
        rel_tot: usize,
        multi_label: bool,
    ) -> Result<Self> {
        let vocab = word_vec.nrows() as i32;
        let in_range = |rel: i32| rel >= 0 && (rel as usize) < rel_tot;

        for (i, bag) in bags.iter().enumerate() {
            if bag.instances.is_empty() {
                return Err(FrameworkErr::Data(format!("bag {i} has no instances")));
            }

            if !in_range(bag.rel) || !bag.relations.iter().all(|&r| in_range(r)) {
                return Err(FrameworkErr::Data(format!(
                    "bag {i} has a relation outside [0, {rel_tot})"
                )));
            }

            for instance in &bag.instances {
                let lengths = [instance.word.len(), instance.pos1.len(), instance.pos2.len()];
                if lengths.iter().any(|&l| l != max_length) {
                    return Err(FrameworkErr::Data(format!(
                        "bag {i} holds an instance of lengths {lengths:?}, expected {max_length}"
                    )));
                }

                if instance.word.iter().any(|&w| w < 0 || w >= vocab) {
                    return Err(FrameworkErr::Data(format!(
                        "bag {i} holds a token outside the vocabulary"
                    )));
                }
            }
        }

        let relfact_tot = bags
            .iter()
            .map(|bag| bag.relations.iter().filter(|&&r| r != NA_REL).count())
            .sum();

        Ok(Self {
            bags,
            word_vec,
            max_length,
            rel_tot,
            relfact_tot,
            multi_label,
        })
    }

    pub fn len(&self) -> usize {
        self.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }

    pub fn bags(&self) -> &[Bag] {
        &self.bags
    }

    pub fn word_vec(&self) -> &Arc<Array2<f32>> {
        &self.word_vec
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn rel_tot(&self) -> usize {
        self.rel_tot
    }

    pub fn relfact_tot(&self) -> usize {
        self.relfact_tot
    }

    pub fn multi_label(&self) -> bool {
        self.multi_label
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn instance(token: i32, rel: i32) -> Instance {
        Instance {
            word: vec![token, token],
            pos1: vec![2, 3],
            pos2: vec![1, 2],
            length: 2,
            rel,
        }
    }

    pub(crate) fn bag(rel: i32, size: usize) -> Bag {
        Bag {
            instances: (0..size).map(|i| instance(i as i32, rel)).collect(),
            rel,
            relations: BTreeSet::from([rel]),
        }
    }

    pub(crate) fn word_vec() -> Arc<Array2<f32>> {
        Arc::new(Array2::from_shape_fn((4, 3), |(i, j)| (i + j) as f32))
    }

    #[test]
    fn counts_non_na_facts() {
        let mut multi = bag(1, 1);
        multi.relations.extend([0, 2]);

        let dataset =
            InMemoryDataset::new(vec![bag(0, 2), bag(1, 1), multi], word_vec(), 2, 3, true)
                .unwrap();

        assert_eq!(dataset.relfact_tot(), 3);
    }

    #[test]
    fn empty_bag_is_rejected() {
        let result = InMemoryDataset::new(vec![bag(0, 0)], word_vec(), 2, 3, false);
        assert!(matches!(result, Err(FrameworkErr::Data(_))));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let result = InMemoryDataset::new(vec![bag(1, 5)], word_vec(), 2, 3, false);
        assert!(matches!(result, Err(FrameworkErr::Data(_))));
    }

    #[test]
    fn relation_out_of_range_is_rejected() {
        let result = InMemoryDataset::new(vec![bag(3, 1)], word_vec(), 2, 3, false);
        assert!(matches!(result, Err(FrameworkErr::Data(_))));
    }
}
