use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    error::{MlErr, Result},
    parameters::ParameterStore,
};

const PARAM_PREFIX: &str = "param/";
const OPTIMIZER_PREFIX: &str = "optimizer/";
const EXTENSION: &str = "safetensors";

/// The metadata stored alongside the tensors of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub model_name: String,
    pub global_step: u64,
    pub optimizer: String,
}

/// Returns the file a checkpoint named `model_name` lives in.
pub fn checkpoint_path(dir: &Path, model_name: &str) -> PathBuf {
    dir.join(format!("{model_name}.{EXTENSION}"))
}

/// Writes every parameter and optimizer buffer of `store` to `dir`.
///
/// The directory is created if absent. The file is written next to its final location
/// and then renamed over it, so a previous checkpoint is only replaced by a complete one.
///
/// # Arguments
/// * `store` - The parameters to persist.
/// * `dir` - The checkpoint directory.
/// * `info` - The metadata to tag the checkpoint with.
///
/// # Returns
/// The path of the written checkpoint.
pub fn save(store: &ParameterStore, dir: &Path, info: &CheckpointInfo) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let mut buffers: Vec<(String, Vec<usize>, Vec<f32>)> = Vec::new();
    for slot in store.slots() {
        let values = slot.values.read();
        buffers.push((
            format!("{PARAM_PREFIX}{}", slot.name),
            slot.shape.clone(),
            values.iter().copied().collect(),
        ));

        for (key, state) in slot.optimizer.lock().state() {
            let len = state.len();
            buffers.push((
                format!("{OPTIMIZER_PREFIX}{}/{key}", slot.name),
                vec![len],
                state,
            ));
        }
    }

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, data) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(data))?;
        views.push((name.as_str(), view));
    }

    let metadata = HashMap::from([
        ("model_name".to_string(), info.model_name.clone()),
        ("global_step".to_string(), info.global_step.to_string()),
        ("optimizer".to_string(), info.optimizer.clone()),
    ]);

    let bytes = safetensors::serialize(views, &Some(metadata))?;

    let path = checkpoint_path(dir, &info.model_name);
    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, &path)?;

    info!(path:? = path, global_step = info.global_step; "checkpoint saved");
    Ok(path)
}

/// Loads a checkpoint into `store`.
///
/// Every parameter of the store must be present with its declared shape. Optimizer
/// buffers are only restored when the checkpoint was written with the same optimizer.
///
/// # Arguments
/// * `store` - The parameters to overwrite.
/// * `path` - The checkpoint file.
///
/// # Returns
/// The metadata of the loaded checkpoint.
pub fn restore(store: &mut ParameterStore, path: &Path) -> Result<CheckpointInfo> {
    let bytes = fs::read(path)?;
    let info = read_info(&bytes)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let names: Vec<(String, Vec<usize>)> = store
        .slots()
        .iter()
        .map(|slot| (slot.name.clone(), slot.shape.clone()))
        .collect();

    for (name, shape) in &names {
        let key = format!("{PARAM_PREFIX}{name}");
        let tensor = tensors
            .tensor(&key)
            .map_err(|_| MlErr::UnknownParameter(format!("{name} is missing from {path:?}")))?;

        if tensor.shape() != shape.as_slice() {
            return Err(MlErr::shape(name, tensor.shape(), shape));
        }

        let values = ArrayD::from_shape_vec(IxDyn(shape), read_f32(tensor.dtype(), tensor.data())?)
            .map_err(|e| MlErr::Checkpoint(e.to_string()))?;

        let id = store.id(name)?;
        store.assign(id, values)?;
    }

    let optimizer = store.optimizer().kind();
    if info.optimizer == optimizer {
        for (name, _) in &names {
            let id = store.id(name)?;
            let prefix = format!("{OPTIMIZER_PREFIX}{name}/");

            for (key, tensor) in tensors.tensors() {
                if let Some(state) = key.strip_prefix(&prefix) {
                    let values = read_f32(tensor.dtype(), tensor.data())?;
                    store.load_optimizer_state(id, state, &values)?;
                }
            }
        }
    } else {
        warn!(
            saved = info.optimizer.as_str(),
            current = optimizer;
            "checkpoint was written by another optimizer, its state is ignored"
        );
    }

    info!(path:? = path, global_step = info.global_step; "checkpoint restored");
    Ok(info)
}

/// Reads only the metadata of a checkpoint file.
pub fn read_metadata(path: &Path) -> Result<CheckpointInfo> {
    read_info(&fs::read(path)?)
}

fn read_info(bytes: &[u8]) -> Result<CheckpointInfo> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)?;
    let Some(metadata) = metadata.metadata() else {
        return Err(MlErr::Checkpoint("the checkpoint carries no metadata".into()));
    };

    let field = |key: &str| {
        metadata
            .get(key)
            .cloned()
            .ok_or_else(|| MlErr::Checkpoint(format!("missing metadata field {key}")))
    };

    let global_step = field("global_step")?
        .parse()
        .map_err(|e| MlErr::Checkpoint(format!("invalid global_step: {e}")))?;

    Ok(CheckpointInfo {
        model_name: field("model_name")?,
        global_step,
        optimizer: field("optimizer")?,
    })
}

fn read_f32(dtype: Dtype, data: &[u8]) -> Result<Vec<f32>> {
    if dtype != Dtype::F32 {
        return Err(MlErr::Checkpoint(format!("expected f32 tensors, got {dtype:?}")));
    }

    Ok(data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
