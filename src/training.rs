use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use log::{debug, info};
use machine_learning::{Model, Session, StepExecutor};

use crate::{
    config::TrainConfig,
    data::DataSource,
    error::Result,
    evaluation::EvaluationEngine,
    replica::ReplicaSet,
    stats::RunningStats,
    summary::{EpochSummary, SummaryWriter},
};

/// Where a `TrainingLoop` is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    EpochRunning { epoch: usize },
    EpochEvaluating { epoch: usize },
    Done,
}

/// What a finished training run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs: usize,
    /// The best evaluation metric seen, `0` if no evaluation beat it.
    pub best_metric: f64,
    /// Every checkpoint write, in order. They all target the same file.
    pub saves: Vec<PathBuf>,
    pub history: Vec<EpochSummary>,
}

/// Trains a model for a fixed amount of epochs, keeping its best checkpoint.
pub struct TrainingLoop {
    model: Arc<dyn Model>,
    config: TrainConfig,
    phase: Phase,
}

impl TrainingLoop {
    /// Creates a new `TrainingLoop`.
    pub fn new(model: Arc<dyn Model>, config: TrainConfig) -> Self {
        Self {
            model,
            config,
            phase: Phase::Uninitialized,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from:? = self.phase, to:? = phase; "training phase change");
        self.phase = phase;
    }

    /// Runs every epoch.
    ///
    /// # Arguments
    /// * `session` - The session to initialize and train.
    /// * `train` - The training source.
    /// * `test` - The held-out source evaluated every `test_epoch` epochs.
    ///
    /// # Returns
    /// The run's report, or the first error. Nothing is retried.
    pub async fn run(
        &mut self,
        session: &mut Session,
        train: &mut dyn DataSource,
        test: &mut dyn DataSource,
    ) -> Result<TrainReport> {
        self.enter(Phase::Initializing);
        println!("Start training...");

        let config = self.config.clone();
        config.validate(train.batch_size())?;

        let replicas = ReplicaSet::new(
            Arc::clone(&self.model),
            config.worker_count,
            train.batch_size(),
        )?;

        let specs = self.model.parameters();
        match &config.pretrain_model {
            Some(path) => {
                session.restore(path, &specs, config.optimizer_spec())?;
            }
            None => session.initialize(&specs, config.optimizer_spec(), config.seed)?,
        }

        let engine = EvaluationEngine::new(StepExecutor::new(Arc::clone(&self.model)));
        let mut summaries = match &config.summary_dir {
            Some(dir) => Some(SummaryWriter::create(dir)?),
            None => None,
        };

        info!(
            model = self.model.name(),
            workers = replicas.len(),
            epochs = config.max_epoch;
            "training initialized"
        );

        let mut report = TrainReport {
            epochs: 0,
            best_metric: 0.,
            saves: Vec::new(),
            history: Vec::new(),
        };
        let mut stats = RunningStats::new();
        let mut stdout = io::stdout();

        for epoch in 0..config.max_epoch {
            self.enter(Phase::EpochRunning { epoch });
            println!("Epoch {epoch} starts...");

            stats.reset();
            train.reset();
            let mut loss_sum = 0.;
            let mut step = 0;

            while let Some(batch) = train.next_batch() {
                let seed = config.seed.wrapping_add(session.global_step());

                let start = Instant::now();
                let output = replicas
                    .train_step(session, &batch, config.keep_prob, seed)
                    .await?;
                let elapsed = start.elapsed().as_secs_f64();

                stats.update(output.logits.view(), batch.rel.view());
                loss_sum += output.loss as f64;

                write!(
                    stdout,
                    "epoch {epoch} step {step} time {elapsed:.2} | loss: {:.6}, not NA accuracy: {:.6}, accuracy: {:.6}\r",
                    output.loss,
                    stats.not_na_accuracy(),
                    stats.accuracy()
                )?;
                stdout.flush()?;
                step += 1;
            }

            let mut summary = EpochSummary {
                epoch,
                mean_loss: if step == 0 { 0. } else { loss_sum / step as f64 },
                accuracy: stats.accuracy(),
                not_na_accuracy: stats.not_na_accuracy(),
                metric: None,
                best_metric: report.best_metric,
            };

            if (epoch + 1) % config.test_epoch == 0 {
                self.enter(Phase::EpochEvaluating { epoch });

                let metric = engine
                    .evaluate(session, test, config.eval_by_accuracy)?
                    .metric;
                summary.metric = Some(metric);

                if metric > report.best_metric {
                    println!("Best model, storing...");
                    let path = session.save(&config.ckpt_dir, &config.model_name)?;
                    println!("Finish storing");

                    info!(epoch = epoch, metric = metric; "new best model");
                    report.best_metric = metric;
                    report.saves.push(path);
                }

                summary.best_metric = report.best_metric;
            }

            if let Some(writer) = &mut summaries {
                writer.write(&summary)?;
            }

            report.history.push(summary);
            report.epochs = epoch + 1;
        }

        self.enter(Phase::Done);
        info!(best_metric = report.best_metric, saves = report.saves.len(); "training finished");
        Ok(report)
    }
}
