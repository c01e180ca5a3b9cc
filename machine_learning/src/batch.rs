use std::ops::Range;

use ndarray::{Array1, Array2, Axis, s};

use crate::{
    error::{MlErr, Result},
    model::InputSpec,
};

/// One step's worth of model inputs.
///
/// Instances are sentences, bags are groups of instances that mention the same entity
/// pair. `scope[i]` holds the half-open instance range `[start, end)` of bag `i`, scopes
/// are contiguous and cover every instance exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Token ids, `[instances, max_length]`.
    pub word: Array2<i32>,
    /// Relative position to the head entity, `[instances, max_length]`.
    pub pos1: Array2<i32>,
    /// Relative position to the tail entity, `[instances, max_length]`.
    pub pos2: Array2<i32>,
    /// Relation label of each bag, `[bags]`.
    pub rel: Array1<i32>,
    /// Relation label of each instance, `[instances]`.
    pub ins_rel: Array1<i32>,
    /// Amount of real tokens per instance, `[instances]`.
    pub length: Array1<i32>,
    /// Instance range of each bag, `[bags, 2]`.
    pub scope: Array2<i32>,
    /// Multi-label ground truth, `[bags, rel_tot]`. Only test sources provide it.
    pub multi_rel: Option<Array2<i32>>,
}

impl Batch {
    /// The amount of bags in this batch.
    pub fn bag_count(&self) -> usize {
        self.rel.len()
    }

    /// The amount of instances in this batch.
    pub fn instance_count(&self) -> usize {
        self.word.nrows()
    }

    /// Checks every field against the declared model inputs.
    ///
    /// # Arguments
    /// * `spec` - The input declaration of the model that will consume this batch.
    ///
    /// # Returns
    /// A `ShapeMismatch` error naming the first offending field.
    pub fn validate(&self, spec: &InputSpec) -> Result<()> {
        let n = self.instance_count();
        let b = self.bag_count();
        let l = spec.max_length;

        for (name, field) in [("word", &self.word), ("pos1", &self.pos1), ("pos2", &self.pos2)] {
            if field.dim() != (n, l) {
                return Err(MlErr::shape(name, field.shape(), &[n, l]));
            }
        }

        if b == 0 || b > spec.batch_size {
            return Err(MlErr::shape("rel", &[b], &[spec.batch_size]));
        }

        if self.ins_rel.len() != n {
            return Err(MlErr::shape("ins_rel", self.ins_rel.shape(), &[n]));
        }

        if self.length.len() != n {
            return Err(MlErr::shape("length", self.length.shape(), &[n]));
        }

        if self.scope.dim() != (b, 2) {
            return Err(MlErr::shape("scope", self.scope.shape(), &[b, 2]));
        }

        if let Some(multi_rel) = &self.multi_rel {
            if multi_rel.nrows() != b {
                return Err(MlErr::shape(
                    "multi_rel",
                    multi_rel.shape(),
                    &[b, multi_rel.ncols()],
                ));
            }
        }

        let mut expected_start = 0;
        for (bag, row) in self.scope.outer_iter().enumerate() {
            let (start, end) = (row[0], row[1]);
            if start < 0 || start as usize != expected_start || end <= start {
                return Err(MlErr::InvalidInput(format!(
                    "scope of bag {bag} is [{start}, {end}), expected it to start at {expected_start}"
                )));
            }
            expected_start = end as usize;
        }

        if expected_start != n {
            return Err(MlErr::InvalidInput(format!(
                "scopes cover {expected_start} instances but the batch holds {n}"
            )));
        }

        Ok(())
    }

    /// Returns a new batch holding only the bags in `bags`, with scopes rebased to it.
    ///
    /// # Arguments
    /// * `bags` - A non-empty range of bag indices.
    ///
    /// # Returns
    /// An error if the range is empty or out of bounds.
    pub fn slice_bags(&self, bags: Range<usize>) -> Result<Batch> {
        if bags.is_empty() || bags.end > self.bag_count() {
            return Err(MlErr::InvalidInput(format!(
                "bag range {bags:?} is out of bounds for {} bags",
                self.bag_count()
            )));
        }

        let first = self.scope[[bags.start, 0]];
        let last = self.scope[[bags.end - 1, 1]];
        let instances = first as usize..last as usize;

        let mut scope = self.scope.slice(s![bags.clone(), ..]).to_owned();
        scope.mapv_inplace(|x| x - first);

        Ok(Batch {
            word: self.word.slice(s![instances.clone(), ..]).to_owned(),
            pos1: self.pos1.slice(s![instances.clone(), ..]).to_owned(),
            pos2: self.pos2.slice(s![instances.clone(), ..]).to_owned(),
            rel: self.rel.slice(s![bags.clone()]).to_owned(),
            ins_rel: self.ins_rel.slice(s![instances.clone()]).to_owned(),
            length: self.length.slice(s![instances]).to_owned(),
            scope,
            multi_rel: self
                .multi_rel
                .as_ref()
                .map(|m| m.select(Axis(0), &bags.collect::<Vec<_>>())),
        })
    }
}
