use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use log::info;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    checkpoint::{self, CheckpointInfo},
    error::{MlErr, Result},
    gradients::Gradient,
    optimization::OptimizerSpec,
    parameters::{ParamSpec, ParameterStore, ParameterView},
};

#[derive(Debug, Default)]
enum State {
    #[default]
    Uninitialized,
    Ready(ParameterStore),
}

/// The explicitly owned computation context of a run.
///
/// A session starts uninitialized and becomes ready once its parameters are either
/// randomly initialized or restored from a checkpoint. It is the only handle able to
/// mutate parameters.
#[derive(Debug, Default)]
pub struct Session {
    state: State,
    global_step: u64,
}

impl Session {
    /// Creates a new uninitialized `Session`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether parameters are available.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// The amount of optimizer updates applied since initialization or restore.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Randomly initializes every parameter, discarding any previous state.
    ///
    /// # Arguments
    /// * `specs` - The parameters declared by the model.
    /// * `optimizer` - The optimizer every parameter will be updated with.
    /// * `seed` - The seed of the initializers' random source.
    pub fn initialize(
        &mut self,
        specs: &[ParamSpec],
        optimizer: OptimizerSpec,
        seed: u64,
    ) -> Result<()> {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let store = ParameterStore::new(specs, optimizer, &rng)?;

        info!(params = store.len(), seed = seed; "session initialized");
        self.state = State::Ready(store);
        self.global_step = 0;
        Ok(())
    }

    /// Replaces every parameter with the values saved in a checkpoint.
    ///
    /// # Arguments
    /// * `path` - The checkpoint file.
    /// * `specs` - The parameters declared by the model.
    /// * `optimizer` - The optimizer every parameter will be updated with.
    pub fn restore(
        &mut self,
        path: &Path,
        specs: &[ParamSpec],
        optimizer: OptimizerSpec,
    ) -> Result<CheckpointInfo> {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let mut store = ParameterStore::new(specs, optimizer, &rng)?;
        let info = checkpoint::restore(&mut store, path)?;

        self.state = State::Ready(store);
        self.global_step = info.global_step;
        Ok(info)
    }

    /// Persists the current parameters as the checkpoint named `model_name` in `dir`.
    ///
    /// # Returns
    /// The path of the written checkpoint.
    pub fn save(&self, dir: &Path, model_name: &str) -> Result<PathBuf> {
        let store = self.store()?;
        let optimizer = store.optimizer().kind().to_string();

        let info = CheckpointInfo {
            model_name: model_name.to_string(),
            global_step: self.global_step,
            optimizer,
        };

        checkpoint::save(store, dir, &info)
    }

    /// A read-only handle to the current parameters.
    pub fn view(&self) -> Result<ParameterView> {
        Ok(self.store()?.view())
    }

    /// Applies one optimizer update and advances the global step.
    pub fn apply_gradients(&mut self, grads: &[Gradient]) -> Result<()> {
        let State::Ready(store) = &mut self.state else {
            return Err(MlErr::SessionNotReady);
        };

        store.apply(grads)?;
        self.global_step += 1;
        Ok(())
    }

    fn store(&self) -> Result<&ParameterStore> {
        match &self.state {
            State::Ready(store) => Ok(store),
            State::Uninitialized => Err(MlErr::SessionNotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::ParamInit;
    use ndarray::{ArrayD, IxDyn};

    fn specs() -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "w",
            vec![2],
            ParamInit::Normal {
                mean: 0.,
                std_dev: 1.,
            },
        )]
    }

    #[test]
    fn uninitialized_session_is_not_ready() {
        let mut session = Session::new();

        assert!(!session.is_ready());
        assert!(matches!(session.view(), Err(MlErr::SessionNotReady)));
        assert!(matches!(
            session.apply_gradients(&[]),
            Err(MlErr::SessionNotReady)
        ));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            session.save(dir.path(), "model"),
            Err(MlErr::SessionNotReady)
        ));
    }

    #[test]
    fn same_seed_same_parameters() {
        let mut a = Session::new();
        let mut b = Session::new();
        a.initialize(&specs(), OptimizerSpec::default(), 3).unwrap();
        b.initialize(&specs(), OptimizerSpec::default(), 3).unwrap();

        assert_eq!(
            *a.view().unwrap().get("w").unwrap(),
            *b.view().unwrap().get("w").unwrap()
        );
    }

    #[test]
    fn save_and_restore_keep_global_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        session
            .initialize(&specs(), OptimizerSpec::default(), 3)
            .unwrap();

        let w = session.view().unwrap().id("w").unwrap();
        let grad = Gradient::new(ArrayD::from_elem(IxDyn(&[2]), 1.), w);
        session.apply_gradients(&[grad.clone()]).unwrap();
        session.apply_gradients(&[grad]).unwrap();

        let path = session.save(dir.path(), "best").unwrap();

        let mut restored = Session::new();
        let info = restored
            .restore(&path, &specs(), OptimizerSpec::default())
            .unwrap();

        assert_eq!(info.model_name, "best");
        assert_eq!(restored.global_step(), 2);
        assert_eq!(
            *session.view().unwrap().get("w").unwrap(),
            *restored.view().unwrap().get("w").unwrap()
        );
    }
}
