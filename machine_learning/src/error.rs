use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    /// A batch field, gradient or parameter doesn't have the declared shape.
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// Inference or training was requested before the session was initialized.
    SessionNotReady,
    /// Two gradient sets disagree on which parameter sits at a given position.
    ParameterMismatch {
        position: usize,
        expected: String,
        got: String,
    },
    /// A parameter name that the store doesn't hold.
    UnknownParameter(String),
    /// An input is invalid for semantic or domain reasons.
    InvalidInput(String),
    /// A parameter initializer couldn't be built.
    Init(String),
    /// A checkpoint couldn't be encoded or decoded.
    Checkpoint(String),
    Io(io::Error),
}

impl MlErr {
    pub(crate) fn shape(what: impl Into<String>, got: &[usize], expected: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            got: got.to_vec(),
            expected: expected.to_vec(),
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}: got {got:?}, expected {expected:?}"
            ),
            MlErr::SessionNotReady => {
                f.write_str("the session has not been initialized or restored")
            }
            MlErr::ParameterMismatch {
                position,
                expected,
                got,
            } => write!(
                f,
                "gradient at position {position} targets parameter {got}, expected {expected}"
            ),
            MlErr::UnknownParameter(name) => write!(f, "unknown parameter: {name}"),
            MlErr::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlErr::Init(msg) => write!(f, "initialization error: {msg}"),
            MlErr::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<safetensors::SafeTensorError> for MlErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}
