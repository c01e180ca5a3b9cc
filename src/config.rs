use std::{
    fs,
    path::{Path, PathBuf},
};

use machine_learning::optimization::OptimizerSpec;
use serde::{Deserialize, Serialize};

use crate::error::{FrameworkErr, Result};

const DEFAULT_MAX_LENGTH: usize = 120;
const DEFAULT_BATCH_SIZE: usize = 160;
const DEFAULT_LEARNING_RATE: f32 = 0.5;
const DEFAULT_MAX_EPOCH: usize = 60;
const DEFAULT_KEEP_PROB: f32 = 0.5;
const DEFAULT_SEED: u64 = 42;

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

fn default_model_name() -> String {
    "model".to_string()
}

fn default_summary_dir() -> Option<PathBuf> {
    Some(PathBuf::from("./summary"))
}

fn default_learning_rate() -> f32 {
    DEFAULT_LEARNING_RATE
}

fn default_max_epoch() -> usize {
    DEFAULT_MAX_EPOCH
}

fn default_one() -> usize {
    1
}

fn default_keep_prob() -> f32 {
    DEFAULT_KEEP_PROB
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

/// Where the data lives and how it is batched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub word_vec_path: PathBuf,
    pub rel2id_path: PathBuf,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Whether the training bags are reshuffled every epoch.
    #[serde(default = "default_true")]
    pub shuffle: bool,
}

/// The optimization algorithm, the learning rate lives in `TrainConfig`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    #[default]
    GradientDescent,
    Momentum {
        momentum: f32,
    },
    Adam {
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

impl OptimizerConfig {
    /// Combines this algorithm with a learning rate.
    pub fn spec(self, learning_rate: f32) -> OptimizerSpec {
        match self {
            OptimizerConfig::GradientDescent => OptimizerSpec::GradientDescent { learning_rate },
            OptimizerConfig::Momentum { momentum } => OptimizerSpec::Momentum {
                learning_rate,
                momentum,
            },
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
            } => OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            },
        }
    }
}

/// The training loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub ckpt_dir: PathBuf,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_summary_dir")]
    pub summary_dir: Option<PathBuf>,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_max_epoch")]
    pub max_epoch: usize,
    /// A checkpoint to start from instead of random initialization.
    #[serde(default)]
    pub pretrain_model: Option<PathBuf>,
    /// Evaluate every this many epochs.
    #[serde(default = "default_one")]
    pub test_epoch: usize,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// The amount of replicas every batch is split across.
    #[serde(default = "default_one")]
    pub worker_count: usize,
    #[serde(default = "default_keep_prob")]
    pub keep_prob: f32,
    /// Select checkpoints by accuracy instead of AUC.
    #[serde(default)]
    pub eval_by_accuracy: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with every default and the given checkpoint directory.
    pub fn new(ckpt_dir: impl Into<PathBuf>) -> Self {
        Self {
            ckpt_dir: ckpt_dir.into(),
            model_name: default_model_name(),
            summary_dir: default_summary_dir(),
            learning_rate: DEFAULT_LEARNING_RATE,
            max_epoch: DEFAULT_MAX_EPOCH,
            pretrain_model: None,
            test_epoch: 1,
            optimizer: OptimizerConfig::default(),
            worker_count: 1,
            keep_prob: DEFAULT_KEEP_PROB,
            eval_by_accuracy: false,
            seed: DEFAULT_SEED,
        }
    }

    /// The optimizer to build the session with.
    pub fn optimizer_spec(&self) -> OptimizerSpec {
        self.optimizer.spec(self.learning_rate)
    }

    /// Checks this configuration against the training source's batch size.
    ///
    /// # Arguments
    /// * `batch_size` - The amount of bags per training batch.
    ///
    /// # Returns
    /// A `Config` error describing the first invalid setting.
    pub fn validate(&self, batch_size: usize) -> Result<()> {
        if self.worker_count == 0 {
            return Err(FrameworkErr::Config(
                "at least one worker is required".into(),
            ));
        }

        if batch_size == 0 || batch_size % self.worker_count != 0 {
            return Err(FrameworkErr::Config(format!(
                "batch size ({batch_size}) must be a positive multiple of the worker count ({})",
                self.worker_count
            )));
        }

        if self.test_epoch == 0 {
            return Err(FrameworkErr::Config(
                "test_epoch must be greater than 0".into(),
            ));
        }

        if !(self.keep_prob > 0. && self.keep_prob <= 1.) {
            return Err(FrameworkErr::Config(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return Err(FrameworkErr::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        if self.model_name.is_empty() {
            return Err(FrameworkErr::Config("model_name cannot be empty".into()));
        }

        Ok(())
    }
}

/// The evaluation entry point configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// The checkpoint to evaluate, the best one of `train.ckpt_dir` when absent.
    #[serde(default)]
    pub ckpt: Option<PathBuf>,
    #[serde(default)]
    pub eval_by_accuracy: bool,
}

/// The configuration file read by the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: DataConfig,
    pub train: TrainConfig,
    #[serde(default)]
    pub test: TestConfig,
}

impl RunConfig {
    /// Reads a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_filled_in() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "data": {
                    "train_path": "train.json",
                    "test_path": "test.json",
                    "word_vec_path": "word_vec.json",
                    "rel2id_path": "rel2id.json"
                },
                "train": { "ckpt_dir": "ckpt" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.data.max_length, 120);
        assert_eq!(config.data.batch_size, 160);
        assert_eq!(config.train, TrainConfig::new("ckpt"));
        assert_eq!(config.test, TestConfig::default());
        assert_eq!(
            config.train.optimizer_spec(),
            OptimizerSpec::GradientDescent { learning_rate: 0.5 }
        );
    }

    #[test]
    fn optimizer_is_tagged() {
        let train: TrainConfig = serde_json::from_str(
            r#"{ "ckpt_dir": "ckpt", "learning_rate": 0.01, "optimizer": { "type": "adam" } }"#,
        )
        .unwrap();

        assert_eq!(
            train.optimizer_spec(),
            OptimizerSpec::Adam {
                learning_rate: 0.01,
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            }
        );
    }

    #[test]
    fn batch_size_must_divide_across_workers() {
        let mut train = TrainConfig::new("ckpt");
        train.worker_count = 3;

        assert!(matches!(train.validate(160), Err(FrameworkErr::Config(_))));
        assert!(train.validate(159).is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let train = TrainConfig::new("ckpt");
        assert!(matches!(train.validate(0), Err(FrameworkErr::Config(_))));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let base = TrainConfig::new("ckpt");
        let cases: Vec<Box<dyn Fn(&mut TrainConfig)>> = vec![
            Box::new(|c| c.worker_count = 0),
            Box::new(|c| c.test_epoch = 0),
            Box::new(|c| c.keep_prob = 0.),
            Box::new(|c| c.keep_prob = 1.5),
            Box::new(|c| c.learning_rate = -1.),
            Box::new(|c| c.learning_rate = f32::NAN),
            Box::new(|c| c.model_name.clear()),
        ];

        for mutate in cases {
            let mut config = base.clone();
            mutate(&mut config);
            assert!(matches!(config.validate(160), Err(FrameworkErr::Config(_))));
        }
    }
}
