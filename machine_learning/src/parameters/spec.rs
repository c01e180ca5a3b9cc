use std::fmt;

use serde::{Deserialize, Serialize};

use crate::initialization::ParamInit;

/// Identity of one trainable parameter inside a `ParameterStore`.
///
/// Every replica resolves names against the same store, so two gradients that
/// target the same underlying parameter always carry the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

impl ParamId {
    /// The position of the parameter in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A trainable parameter as declared by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: ParamInit,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, init: ParamInit) -> Self {
        Self {
            name: name.into(),
            shape,
            init,
        }
    }

    /// The amount of scalars the parameter holds.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
