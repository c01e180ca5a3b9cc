use std::{collections::HashMap, sync::Arc};

use ndarray::ArrayD;
use parking_lot::RwLockReadGuard;

use super::{ParamId, ParameterSlot};
use crate::error::{MlErr, Result};

/// A read-only handle to the tensors of a `ParameterStore`.
///
/// Cloning a view is cheap, every clone observes the same underlying values.
#[derive(Debug, Clone)]
pub struct ParameterView {
    slots: Arc<[ParameterSlot]>,
    index: Arc<HashMap<String, ParamId>>,
}

impl ParameterView {
    pub(super) fn new(slots: Arc<[ParameterSlot]>, index: Arc<HashMap<String, ParamId>>) -> Self {
        Self { slots, index }
    }

    /// Resolves a parameter name.
    pub fn id(&self, name: &str) -> Result<ParamId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| MlErr::UnknownParameter(name.to_string()))
    }

    /// Read access to the values of a parameter.
    pub fn get(&self, name: &str) -> Result<RwLockReadGuard<'_, ArrayD<f32>>> {
        let id = self.id(name)?;
        Ok(self.slots[id.0].values.read())
    }

    /// The declared shape of a parameter.
    pub fn shape(&self, id: ParamId) -> Result<&[usize]> {
        self.slots
            .get(id.0)
            .map(|slot| slot.shape.as_slice())
            .ok_or_else(|| MlErr::UnknownParameter(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
