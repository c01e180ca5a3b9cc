use ndarray::{ArrayView1, ArrayView2};

use crate::data::NA_REL;

/// Running accuracy counters over one epoch or one test pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningStats {
    pub total: usize,
    pub total_not_na: usize,
    pub correct: usize,
    pub not_na_correct: usize,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Accounts for one batch of predictions.
    ///
    /// The prediction of each row is the index of its largest logit, the first one
    /// winning ties.
    ///
    /// # Arguments
    /// * `logits` - The class scores, `[bags, rel_tot]`.
    /// * `labels` - The true relation of each bag.
    pub fn update(&mut self, logits: ArrayView2<'_, f32>, labels: ArrayView1<'_, i32>) {
        for (row, &label) in logits.outer_iter().zip(labels.iter()) {
            let hit = argmax(row) == Some(label);

            self.total += 1;
            self.correct += hit as usize;

            if label != NA_REL {
                self.total_not_na += 1;
                self.not_na_correct += hit as usize;
            }
        }
    }

    /// `correct / total`, `0` before any update.
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    /// Accuracy over bags whose true relation isn't NA, `0` when there are none.
    pub fn not_na_accuracy(&self) -> f64 {
        ratio(self.not_na_correct, self.total_not_na)
    }
}

fn argmax(row: ArrayView1<'_, f32>) -> Option<i32> {
    row.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &x)| match best {
            Some((_, max)) if x <= max => best,
            _ => Some((i, x)),
        })
        .map(|(i, _)| i as i32)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.
    } else {
        num as f64 / den as f64
    }
}
