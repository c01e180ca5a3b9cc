use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fs,
    path::Path,
    rc::Rc,
    sync::Arc,
};

use log::{info, warn};
use machine_learning::initialization::ParamInit;
use ndarray::{Array2, Axis, concatenate};
use rand::{SeedableRng, rngs::StdRng};
use serde::Deserialize;

use super::{Bag, DataLoader, InMemoryDataset, Instance, NA_REL};
use crate::{
    config::DataConfig,
    error::{FrameworkErr, Result},
};

#[derive(Debug, Deserialize)]
struct RawEntity {
    word: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    sentence: String,
    head: RawEntity,
    tail: RawEntity,
    relation: String,
}

#[derive(Debug, Deserialize)]
struct RawWordVec {
    word: String,
    vec: Vec<f32>,
}

/// How instances are grouped into bags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BagMode {
    /// One bag per (entity pair, relation), used for training.
    RelationFact,
    /// One bag per entity pair carrying every relation it holds, used for testing.
    EntityPair,
}

/// Builds datasets out of the JSON files of a relation extraction corpus.
#[derive(Debug, Clone)]
pub struct JsonLoader {
    word2id: HashMap<String, i32>,
    word_vec: Arc<Array2<f32>>,
    rel2id: HashMap<String, i32>,
    max_length: usize,
}

impl JsonLoader {
    /// Reads the vocabulary and the relation ids.
    ///
    /// # Arguments
    /// * `word_vec_path` - A JSON list of `{word, vec}` entries.
    /// * `rel2id_path` - A JSON object mapping relation names to ids, NA being 0.
    /// * `max_length` - The length every instance is truncated or padded to.
    /// * `seed` - The seed of the unknown-word vector.
    pub fn new(
        word_vec_path: &Path,
        rel2id_path: &Path,
        max_length: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::from_json(
            &fs::read_to_string(word_vec_path)?,
            &fs::read_to_string(rel2id_path)?,
            max_length,
            seed,
        )
    }

    pub fn from_config(config: &DataConfig, seed: u64) -> Result<Self> {
        Self::new(
            &config.word_vec_path,
            &config.rel2id_path,
            config.max_length,
            seed,
        )
    }

    /// Same as `new`, reading the JSON documents from memory.
    pub fn from_json(word_vec: &str, rel2id: &str, max_length: usize, seed: u64) -> Result<Self> {
        if max_length == 0 {
            return Err(FrameworkErr::Config("max_length must be greater than 0".into()));
        }

        let raw: Vec<RawWordVec> = serde_json::from_str(word_vec)?;
        let dim = raw
            .first()
            .map(|entry| entry.vec.len())
            .filter(|&dim| dim > 0)
            .ok_or_else(|| FrameworkErr::Data("the word vectors are empty".into()))?;

        let mut word2id = HashMap::with_capacity(raw.len() + 2);
        let mut values = Vec::with_capacity((raw.len() + 2) * dim);
        for entry in raw {
            if entry.vec.len() != dim {
                return Err(FrameworkErr::Data(format!(
                    "vector of {} has {} dimensions, expected {dim}",
                    entry.word,
                    entry.vec.len()
                )));
            }
            let id = (values.len() / dim) as i32;
            word2id.entry(entry.word.to_lowercase()).or_insert(id);
            values.extend(entry.vec);
        }

        let known = values.len() / dim;
        let known = Array2::from_shape_vec((known, dim), values)
            .map_err(|e| FrameworkErr::Data(e.to_string()))?;

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let unk: Array2<f32> = ParamInit::Normal {
            mean: 0.,
            std_dev: 0.05,
        }
        .generate(&[1, dim], &rng)?
        .into_dimensionality()
        .map_err(|e| FrameworkErr::Data(e.to_string()))?;
        let blank: Array2<f32> = Array2::zeros((1, dim));

        let word_vec = concatenate(Axis(0), &[known.view(), unk.view(), blank.view()])
            .map_err(|e| FrameworkErr::Data(e.to_string()))?;

        let rel2id: HashMap<String, i32> = serde_json::from_str(rel2id)?;
        let ids: BTreeSet<i32> = rel2id.values().copied().collect();
        if rel2id.is_empty()
            || ids.len() != rel2id.len()
            || !ids.iter().copied().eq(0..ids.len() as i32)
        {
            return Err(FrameworkErr::Data(
                "relation ids must be exactly 0..rel_tot".into(),
            ));
        }

        info!(words = word_vec.nrows(), dim = dim, relations = rel2id.len(); "vocabulary loaded");

        Ok(Self {
            word2id,
            word_vec: Arc::new(word_vec),
            rel2id,
            max_length,
        })
    }

    /// The amount of relation classes.
    pub fn rel_tot(&self) -> usize {
        self.rel2id.len()
    }

    /// The embedding matrix, the unknown and blank vectors being the last two rows.
    pub fn word_vec(&self) -> &Arc<Array2<f32>> {
        &self.word_vec
    }

    fn unk(&self) -> i32 {
        self.word_vec.nrows() as i32 - 2
    }

    fn blank(&self) -> i32 {
        self.word_vec.nrows() as i32 - 1
    }

    /// Reads a dataset file.
    pub fn load(&self, path: &Path, mode: BagMode) -> Result<InMemoryDataset> {
        info!(path:? = path, mode:? = mode; "loading dataset");
        self.dataset_from_json(&fs::read_to_string(path)?, mode)
    }

    /// Builds the shuffled training source described by `config`.
    pub fn train_source(&self, config: &DataConfig, seed: u64) -> Result<DataLoader> {
        let dataset = self.load(&config.train_path, BagMode::RelationFact)?;
        let shuffle = config.shuffle.then_some(seed);
        DataLoader::new(dataset, config.batch_size, shuffle)
    }

    /// Builds the ordered test source described by `config`.
    pub fn test_source(&self, config: &DataConfig) -> Result<DataLoader> {
        let dataset = self.load(&config.test_path, BagMode::EntityPair)?;
        DataLoader::new(dataset, config.batch_size, None)
    }

    /// Builds a dataset from a JSON list of `{sentence, head, tail, relation}` entries.
    ///
    /// Bags are ordered by entity pair, then by relation.
    pub fn dataset_from_json(&self, text: &str, mode: BagMode) -> Result<InMemoryDataset> {
        let raw: Vec<RawInstance> = serde_json::from_str(text)?;
        let mut unknown = HashSet::new();
        let mut groups: BTreeMap<(String, i32), Vec<Instance>> = BTreeMap::new();

        for (i, item) in raw.iter().enumerate() {
            let rel = match self.rel2id.get(&item.relation) {
                Some(&rel) => rel,
                None => {
                    if unknown.insert(item.relation.as_str()) {
                        warn!(relation = item.relation.as_str(); "unknown relation mapped to NA");
                    }
                    NA_REL
                }
            };

            let instance = self.instance(item, rel).map_err(|e| match e {
                FrameworkErr::Data(msg) => FrameworkErr::Data(format!("instance {i}: {msg}")),
                other => other,
            })?;

            let pair = format!("{}#{}", item.head.id, item.tail.id);
            let key = match mode {
                BagMode::RelationFact => (pair, rel),
                BagMode::EntityPair => (pair, NA_REL),
            };
            groups.entry(key).or_default().push(instance);
        }

        let bags = groups
            .into_values()
            .map(|instances| {
                let relations: BTreeSet<i32> = instances.iter().map(|inst| inst.rel).collect();
                let rel = relations
                    .iter()
                    .copied()
                    .find(|&r| r != NA_REL)
                    .unwrap_or(NA_REL);
                Bag {
                    instances,
                    rel,
                    relations,
                }
            })
            .collect();

        InMemoryDataset::new(
            bags,
            Arc::clone(&self.word_vec),
            self.max_length,
            self.rel_tot(),
            mode == BagMode::EntityPair,
        )
    }

    fn instance(&self, item: &RawInstance, rel: i32) -> Result<Instance> {
        let sentence = item.sentence.to_lowercase();
        let tokens: Vec<&str> = sentence.split_whitespace().collect();

        let head = entity_position(&tokens, &item.head.word)?;
        let tail = entity_position(&tokens, &item.tail.word)?;

        let l = self.max_length;
        let position = |j: usize, entity: usize| {
            (j as i64 - entity as i64 + l as i64).clamp(0, 2 * l as i64 - 1) as i32
        };

        let word = (0..l)
            .map(|j| match tokens.get(j) {
                Some(token) => self.word2id.get(*token).copied().unwrap_or(self.unk()),
                None => self.blank(),
            })
            .collect();

        Ok(Instance {
            word,
            pos1: (0..l).map(|j| position(j, head)).collect(),
            pos2: (0..l).map(|j| position(j, tail)).collect(),
            length: tokens.len().min(l) as i32,
            rel,
        })
    }
}

/// Returns the index of the first token of `entity` inside `tokens`.
fn entity_position(tokens: &[&str], entity: &str) -> Result<usize> {
    let entity = entity.to_lowercase();
    let needle: Vec<&str> = entity.split_whitespace().collect();

    if needle.is_empty() {
        return Err(FrameworkErr::Data("empty entity mention".into()));
    }

    tokens
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
        .ok_or_else(|| FrameworkErr::Data(format!("the sentence doesn't mention {entity}")))
}
