use std::{
    cmp::Ordering,
    io::{self, Write},
};

use log::{debug, info};
use machine_learning::{Fetch, MlErr, Session, StepExecutor};

use crate::{
    data::{DataSource, NA_REL},
    error::{FrameworkErr, Result},
    stats::RunningStats,
};

/// The score a model gave to one (bag, relation) pair and whether the pair is a true fact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub score: f32,
    pub flag: bool,
}

impl ScoredCandidate {
    pub fn new(score: f32, flag: bool) -> Self {
        Self { score, flag }
    }
}

/// Sorts candidates by descending score.
///
/// The sort is stable, candidates with equal scores keep their emission order.
pub fn rank(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

/// A precision-recall curve, one point per ranked candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
}

/// Walks a ranking and computes precision and recall after every candidate.
///
/// # Arguments
/// * `ranked` - Candidates sorted by descending score.
/// * `relfact_tot` - The amount of true facts in the test set, the recall denominator.
///
/// # Returns
/// An `InvalidTestSet` error if `relfact_tot` is zero.
pub fn precision_recall(ranked: &[ScoredCandidate], relfact_tot: usize) -> Result<PrCurve> {
    if relfact_tot == 0 {
        return Err(FrameworkErr::InvalidTestSet(
            "the test set holds no relation facts".into(),
        ));
    }

    let mut curve = PrCurve {
        precision: Vec::with_capacity(ranked.len()),
        recall: Vec::with_capacity(ranked.len()),
    };

    let mut correct = 0usize;
    for (i, candidate) in ranked.iter().enumerate() {
        correct += candidate.flag as usize;
        curve.precision.push(correct as f64 / (i + 1) as f64);
        curve.recall.push(correct as f64 / relfact_tot as f64);
    }

    Ok(curve)
}

/// The area under a curve using the trapezoidal rule.
///
/// `x` must be monotonic. Curves of fewer than two points have no area.
pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    let area: f64 = x
        .windows(2)
        .zip(y.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.)
        .sum();

    match x.first().zip(x.last()).map(|(a, b)| a.partial_cmp(b)) {
        Some(Some(Ordering::Greater)) => -area,
        _ => area,
    }
}

/// The outcome of one test pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    /// The returned metric, accuracy or AUC.
    pub metric: f64,
    pub stats: RunningStats,
    /// Present when ranking was performed.
    pub auc: Option<f64>,
    pub candidates: usize,
}

/// Runs a model over a test source and scores it.
pub struct EvaluationEngine {
    executor: StepExecutor,
}

impl EvaluationEngine {
    /// Creates a new `EvaluationEngine`.
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    /// Runs one full inference pass over `source`.
    ///
    /// # Arguments
    /// * `session` - The session holding the parameters to evaluate.
    /// * `source` - The test source, rewound before the pass.
    /// * `eval_by_accuracy` - Return plain accuracy instead of the ranking AUC.
    ///
    /// # Returns
    /// The report of the pass, or `InvalidTestSet` if the metric is undefined.
    pub fn evaluate(
        &self,
        session: &mut Session,
        source: &mut dyn DataSource,
        eval_by_accuracy: bool,
    ) -> Result<EvalReport> {
        let relfact_tot = source.relfact_tot();
        if !eval_by_accuracy && relfact_tot == 0 {
            return Err(FrameworkErr::InvalidTestSet(
                "the test set holds no relation facts".into(),
            ));
        }

        println!("\nTesting...");
        source.reset();

        let rel_tot = source.rel_tot();
        let mut stats = RunningStats::new();
        let mut candidates = Vec::new();
        let mut stdout = io::stdout();
        let mut step = 0;

        while let Some(batch) = source.next_batch() {
            let logits = self
                .executor
                .run(session, &batch, &[Fetch::TestLogits], 1., 0)?
                .remove(0)
                .into_logits()?;

            if logits.ncols() != rel_tot {
                return Err(MlErr::ShapeMismatch {
                    what: "test_logits".into(),
                    got: logits.shape().to_vec(),
                    expected: vec![batch.bag_count(), rel_tot],
                }
                .into());
            }

            stats.update(logits.view(), batch.rel.view());
            write!(
                stdout,
                "[TEST] step {step} | not NA accuracy: {:.6}, accuracy: {:.6}\r",
                stats.not_na_accuracy(),
                stats.accuracy()
            )?;
            stdout.flush()?;

            if !eval_by_accuracy {
                let multi_rel = batch.multi_rel.as_ref().ok_or_else(|| MlErr::ShapeMismatch {
                    what: "multi_rel".into(),
                    got: Vec::new(),
                    expected: vec![batch.bag_count(), rel_tot],
                })?;

                if multi_rel.ncols() != rel_tot {
                    return Err(MlErr::ShapeMismatch {
                        what: "multi_rel".into(),
                        got: multi_rel.shape().to_vec(),
                        expected: vec![batch.bag_count(), rel_tot],
                    }
                    .into());
                }

                for (scores, flags) in logits.outer_iter().zip(multi_rel.outer_iter()) {
                    for rel in (NA_REL as usize + 1)..rel_tot {
                        candidates.push(ScoredCandidate::new(scores[rel], flags[rel] != 0));
                    }
                }
            }

            debug!(step = step, bags = batch.bag_count(); "test step");
            step += 1;
        }

        if eval_by_accuracy {
            if stats.total == 0 {
                return Err(FrameworkErr::InvalidTestSet("the test set is empty".into()));
            }

            info!(accuracy = stats.accuracy(); "finished testing");
            return Ok(EvalReport {
                metric: stats.accuracy(),
                stats,
                auc: None,
                candidates: 0,
            });
        }

        let count = candidates.len();
        let ranked = rank(candidates);
        let curve = precision_recall(&ranked, relfact_tot)?;
        let area = auc(&curve.recall, &curve.precision);

        println!("\n[TEST] auc: {area}");
        info!(auc = area, candidates = count; "finished testing");

        Ok(EvalReport {
            metric: area,
            stats,
            auc: Some(area),
            candidates: count,
        })
    }
}
