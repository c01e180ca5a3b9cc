pub mod batch;
pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod gradients;
pub mod initialization;
pub mod model;
pub mod optimization;
pub mod parameters;
pub mod session;

pub use batch::Batch;
pub use error::{MlErr, Result};
pub use executor::{Fetch, FetchValue, StepExecutor};
pub use gradients::{Gradient, GradientSet, average_gradients};
pub use model::{BuildContext, InputSpec, Model, ModelOutputs};
pub use session::Session;
