pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod framework;
pub mod models;
pub mod replica;
pub mod stats;
pub mod summary;
pub mod training;

pub use config::{DataConfig, RunConfig, TestConfig, TrainConfig};
pub use error::{FrameworkErr, Result};
pub use framework::Framework;
