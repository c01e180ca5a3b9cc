use std::{cell::RefCell, collections::HashMap, rc::Rc, sync::Arc};

use log::debug;
use ndarray::ArrayD;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rayon::prelude::*;

use super::{ParamId, ParamSpec, ParameterView};
use crate::{
    error::{MlErr, Result},
    gradients::Gradient,
    optimization::{Optimizer, OptimizerSpec},
};

/// One parameter tensor together with the optimizer that updates it.
#[derive(Debug)]
pub(crate) struct ParameterSlot {
    pub(crate) name: String,
    pub(crate) shape: Vec<usize>,
    pub(crate) values: RwLock<ArrayD<f32>>,
    pub(crate) optimizer: Mutex<Box<dyn Optimizer>>,
}

/// The primary storage of every trainable parameter of a model.
///
/// There is exactly one owner of a `ParameterStore` and it is the only one allowed to
/// mutate it. Replicas read through `ParameterView`s, which share the same tensors.
#[derive(Debug)]
pub struct ParameterStore {
    slots: Arc<[ParameterSlot]>,
    index: Arc<HashMap<String, ParamId>>,
    optimizer: OptimizerSpec,
}

impl ParameterStore {
    /// Creates a new `ParameterStore` with freshly initialized values.
    ///
    /// # Arguments
    /// * `specs` - The parameters declared by the model, in declaration order.
    /// * `optimizer` - The optimizer to instantiate once per parameter.
    /// * `rng` - The random source for the initializers.
    ///
    /// # Returns
    /// An error if two parameters share a name or an initializer fails.
    pub fn new<R: Rng>(
        specs: &[ParamSpec],
        optimizer: OptimizerSpec,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        let mut slots = Vec::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), ParamId(i)).is_some() {
                return Err(MlErr::InvalidInput(format!(
                    "parameter {} is declared twice",
                    spec.name
                )));
            }

            let values = spec.init.generate(&spec.shape, rng)?;
            debug!(name = spec.name.as_str(), len = spec.len(); "initialized parameter");

            slots.push(ParameterSlot {
                name: spec.name.clone(),
                shape: spec.shape.clone(),
                values: RwLock::new(values),
                optimizer: Mutex::new(optimizer.build(&spec.shape)),
            });
        }

        Ok(Self {
            slots: Arc::from(slots),
            index: Arc::new(index),
            optimizer,
        })
    }

    /// Returns a read-only handle sharing this store's tensors.
    pub fn view(&self) -> ParameterView {
        ParameterView::new(Arc::clone(&self.slots), Arc::clone(&self.index))
    }

    /// Returns the amount of parameters in the store.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The optimizer every slot was built with.
    pub fn optimizer(&self) -> OptimizerSpec {
        self.optimizer
    }

    /// Resolves a parameter name.
    pub fn id(&self, name: &str) -> Result<ParamId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| MlErr::UnknownParameter(name.to_string()))
    }

    /// Applies one optimizer step with the given gradients.
    ///
    /// Parameters without a gradient in `grads` are left untouched. All gradients are
    /// validated before any parameter is updated.
    ///
    /// # Arguments
    /// * `grads` - At most one gradient per parameter.
    ///
    /// # Returns
    /// An error if a gradient targets an unknown parameter or has the wrong shape.
    pub fn apply(&mut self, grads: &[Gradient]) -> Result<()> {
        let mut per_slot: Vec<Option<&ArrayD<f32>>> = vec![None; self.slots.len()];

        for gradient in grads {
            let slot = self
                .slots
                .get(gradient.param.0)
                .ok_or_else(|| MlErr::UnknownParameter(gradient.param.to_string()))?;

            if gradient.grad.shape() != slot.shape.as_slice() {
                return Err(MlErr::shape(
                    format!("gradient of {}", slot.name),
                    gradient.grad.shape(),
                    &slot.shape,
                ));
            }

            per_slot[gradient.param.0] = Some(&gradient.grad);
        }

        self.slots
            .par_iter()
            .zip(per_slot.par_iter())
            .try_for_each(|(slot, grad)| {
                let Some(grad) = grad else {
                    return Ok(());
                };

                let mut values = slot.values.write();
                slot.optimizer
                    .lock()
                    .update_params(grad.view(), values.view_mut())
            })
    }

    /// Overwrites the values of one parameter.
    ///
    /// # Returns
    /// An error if `values` doesn't have the declared shape.
    pub fn assign(&mut self, id: ParamId, values: ArrayD<f32>) -> Result<()> {
        let slot = self.slot(id)?;

        if values.shape() != slot.shape.as_slice() {
            return Err(MlErr::shape(&slot.name, values.shape(), &slot.shape));
        }

        *slot.values.write() = values.as_standard_layout().into_owned();
        Ok(())
    }

    /// Restores one optimizer state buffer of a parameter.
    pub fn load_optimizer_state(&mut self, id: ParamId, key: &str, values: &[f32]) -> Result<()> {
        self.slot(id)?.optimizer.lock().load_state(key, values)
    }

    pub(crate) fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    fn slot(&self, id: ParamId) -> Result<&ParameterSlot> {
        self.slots
            .get(id.0)
            .ok_or_else(|| MlErr::UnknownParameter(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::ParamInit;
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    fn create_test_store() -> ParameterStore {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let specs = [
            ParamSpec::new("w", vec![2, 2], ParamInit::Constant { value: 1. }),
            ParamSpec::new("b", vec![2], ParamInit::Constant { value: 0. }),
        ];
        ParameterStore::new(
            &specs,
            OptimizerSpec::GradientDescent { learning_rate: 1. },
            &rng,
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_names() {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let specs = [
            ParamSpec::new("w", vec![1], ParamInit::Constant { value: 1. }),
            ParamSpec::new("w", vec![1], ParamInit::Constant { value: 1. }),
        ];

        let store = ParameterStore::new(&specs, OptimizerSpec::default(), &rng);
        assert!(matches!(store, Err(MlErr::InvalidInput(_))));
    }

    #[test]
    fn apply_updates_only_given_parameters() {
        let mut store = create_test_store();
        let w = store.id("w").unwrap();

        let grad = Gradient {
            grad: ArrayD::from_elem(IxDyn(&[2, 2]), 0.5),
            param: w,
        };
        store.apply(&[grad]).unwrap();

        let view = store.view();
        assert!(view.get("w").unwrap().iter().all(|&x| x == 0.5));
        assert!(view.get("b").unwrap().iter().all(|&x| x == 0.));
    }

    #[test]
    fn apply_rejects_wrong_shape_before_updating() {
        let mut store = create_test_store();
        let w = store.id("w").unwrap();
        let b = store.id("b").unwrap();

        let grads = [
            Gradient {
                grad: ArrayD::from_elem(IxDyn(&[2]), 1.),
                param: b,
            },
            Gradient {
                grad: ArrayD::from_elem(IxDyn(&[4]), 1.),
                param: w,
            },
        ];

        assert!(matches!(
            store.apply(&grads),
            Err(MlErr::ShapeMismatch { .. })
        ));
        assert!(store.view().get("b").unwrap().iter().all(|&x| x == 0.));
    }

    #[test]
    fn views_observe_updates() {
        let mut store = create_test_store();
        let view = store.view();
        let b = store.id("b").unwrap();

        store
            .assign(b, ArrayD::from_elem(IxDyn(&[2]), 3.))
            .unwrap();
        assert!(view.get("b").unwrap().iter().all(|&x| x == 3.));
    }
}
