use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The harness's result type.
pub type Result<T> = std::result::Result<T, FrameworkErr>;

/// Every failure of the training and evaluation harness.
#[derive(Debug)]
pub enum FrameworkErr {
    /// An invalid configuration, caught before any work starts.
    Config(String),
    /// The test set cannot produce a meaningful metric.
    InvalidTestSet(String),
    /// A data file is malformed or inconsistent.
    Data(String),
    /// A replica task panicked or was cancelled.
    Worker { worker_id: usize, msg: String },
    /// A failure in the computation layer (shape mismatch, session not ready, ...).
    Ml(MlErr),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for FrameworkErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidTestSet(msg) => write!(f, "invalid test set: {msg}"),
            Self::Data(msg) => write!(f, "invalid data: {msg}"),
            Self::Worker { worker_id, msg } => write!(f, "worker {worker_id} error: {msg}"),
            Self::Ml(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for FrameworkErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for FrameworkErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<io::Error> for FrameworkErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for FrameworkErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
