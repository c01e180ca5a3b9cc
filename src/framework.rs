use std::{path::Path, sync::Arc};

use machine_learning::{Model, Session, StepExecutor, optimization::OptimizerSpec};
use ndarray::ArrayView2;

use crate::{
    config::TrainConfig,
    data::DataSource,
    error::{FrameworkErr, Result},
    evaluation::{EvalReport, EvaluationEngine},
    training::{TrainReport, TrainingLoop},
};

/// The entry point of the harness: owns the data sources and the session.
pub struct Framework {
    train: Option<Box<dyn DataSource>>,
    test: Box<dyn DataSource>,
    session: Session,
    optimizer: OptimizerSpec,
}

impl Framework {
    /// Creates a `Framework` able to evaluate models on `test`.
    pub fn new(test: Box<dyn DataSource>) -> Self {
        Self {
            train: None,
            test,
            session: Session::new(),
            optimizer: OptimizerSpec::default(),
        }
    }

    /// Adds a training source, required by `train`.
    pub fn with_train_source(mut self, train: Box<dyn DataSource>) -> Self {
        self.train = Some(train);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The embedding matrix of the training source, or of the test one without it.
    pub fn word_vec_mat(&self) -> ArrayView2<'_, f32> {
        match &self.train {
            Some(train) => train.word_vec_mat(),
            None => self.test.word_vec_mat(),
        }
    }

    pub fn rel_tot(&self) -> usize {
        match &self.train {
            Some(train) => train.rel_tot(),
            None => self.test.rel_tot(),
        }
    }

    /// Trains `model` with `config`, keeping the best checkpoint in `config.ckpt_dir`.
    pub async fn train(
        &mut self,
        model: Arc<dyn Model>,
        config: &TrainConfig,
    ) -> Result<TrainReport> {
        let train = self
            .train
            .as_deref_mut()
            .ok_or_else(|| FrameworkErr::Config("no training source was provided".into()))?;

        self.optimizer = config.optimizer_spec();
        let mut training = TrainingLoop::new(model, config.clone());
        training
            .run(&mut self.session, train, self.test.as_mut())
            .await
    }

    /// Evaluates `model` on the test source.
    ///
    /// # Arguments
    /// * `model` - The model to evaluate.
    /// * `ckpt` - A checkpoint to restore first, the current session is used otherwise.
    /// * `eval_by_accuracy` - Return plain accuracy instead of the ranking AUC.
    ///
    /// # Returns
    /// The metric, or `SessionNotReady` when there's neither a checkpoint nor a trained session.
    pub fn test(
        &mut self,
        model: Arc<dyn Model>,
        ckpt: Option<&Path>,
        eval_by_accuracy: bool,
    ) -> Result<f64> {
        Ok(self.evaluate(model, ckpt, eval_by_accuracy)?.metric)
    }

    /// Same as `test`, returning the whole report.
    pub fn evaluate(
        &mut self,
        model: Arc<dyn Model>,
        ckpt: Option<&Path>,
        eval_by_accuracy: bool,
    ) -> Result<EvalReport> {
        if let Some(path) = ckpt {
            self.session.restore(path, &model.parameters(), self.optimizer)?;
        }

        let engine = EvaluationEngine::new(StepExecutor::new(model));
        let report = engine.evaluate(&mut self.session, self.test.as_mut(), eval_by_accuracy)?;
        println!("Finish testing");
        Ok(report)
    }
}
