//! Gradient boosted tree model: the handle workers load and evaluate.
//!
//! A `Booster` carries no interior synchronisation. Sharing one between
//! threads requires external exclusivity, which the predictor provides by
//! giving every worker its own instance.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::params::TrainParam;
use super::repo_fs::{self, ModelFile};
use super::tree::{GradPair, RegTree, TreeBuilder};
use crate::common::error::{BoostError, BoostResult};
use crate::data::DMatrix;

/// Option mask bit: return raw margins instead of transformed predictions.
pub const OPTION_OUTPUT_MARGIN: u32 = 0x01;
/// Option mask bit: return leaf indices, one per row and tree.
pub const OPTION_PRED_LEAF: u32 = 0x02;
/// Option mask bit: feature contributions. Not supported by this engine.
// TODO: compute per-feature contributions by walking each tree's decision path.
pub const OPTION_PRED_CONTRIBS: u32 = 0x04;

/// How predictions are computed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictOptions {
    pub output_margin: bool,
    pub pred_leaf: bool,
    /// Number of trees to evaluate; 0 uses every tree.
    pub ntree_limit: u32,
}

impl PredictOptions {
    /// Decode the classic integer option mask.
    pub fn from_option_mask(mask: u32, ntree_limit: u32) -> BoostResult<Self> {
        if mask & OPTION_PRED_CONTRIBS != 0 {
            return Err(BoostError::config("feature contributions are not supported"));
        }
        let known = OPTION_OUTPUT_MARGIN | OPTION_PRED_LEAF;
        if mask & !known != 0 {
            return Err(BoostError::config(format!("unknown option mask bits {mask:#x}")));
        }
        Ok(Self {
            output_margin: mask & OPTION_OUTPUT_MARGIN != 0,
            pred_leaf: mask & OPTION_PRED_LEAF != 0,
            ntree_limit,
        })
    }
}

#[derive(Debug)]
struct MarginCache {
    applied: usize,
    margins: Vec<f32>,
}

/// A trained (or training) tree ensemble.
#[derive(Debug, Default)]
pub struct Booster {
    params: BTreeMap<String, String>,
    param: TrainParam,
    num_feature: usize,
    trees: Vec<RegTree>,
    cache: HashMap<u64, MarginCache>,
}

impl Booster {
    /// Create a booster, registering matrices whose margins should be cached between iterations.
    pub fn create(cache: &[&DMatrix]) -> BoostResult<Self> {
        let mut booster = Self::default();
        for matrix in cache {
            booster.num_feature = booster.num_feature.max(matrix.num_col());
            booster.cache.insert(
                matrix.id(),
                MarginCache {
                    applied: 0,
                    margins: Vec::new(),
                },
            );
        }
        Ok(booster)
    }

    /// Load a booster previously written by [`Booster::save_model`].
    pub fn from_file(path: impl AsRef<Path>) -> BoostResult<Self> {
        let mut booster = Self::default();
        booster.load_model(path)?;
        Ok(booster)
    }

    /// Replace this booster's model with the one stored at `path`.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> BoostResult<()> {
        let file = repo_fs::read_model(path.as_ref())?;
        self.params = file.params;
        self.param = file.param;
        self.num_feature = file.num_feature;
        self.trees = file.trees;
        self.cache.clear();
        Ok(())
    }

    pub fn save_model(&self, path: impl AsRef<Path>) -> BoostResult<()> {
        let file = ModelFile::new(
            self.num_feature,
            self.params.clone(),
            self.param.clone(),
            self.trees.clone(),
        );
        repo_fs::write_model(path.as_ref(), &file)
    }

    /// Set a hyperparameter. Values for recognised keys are validated immediately.
    pub fn set_param(&mut self, key: &str, value: &str) -> BoostResult<()> {
        let mut params = self.params.clone();
        params.insert(key.to_string(), value.to_string());
        self.param = TrainParam::from_params(&params)?;
        self.params = params;
        Ok(())
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    /// Run one boosting round against `train`, which must carry labels.
    pub fn update_one_iter(&mut self, iter: usize, train: &DMatrix) -> BoostResult<()> {
        let labels = train
            .labels()
            .ok_or_else(|| BoostError::invalid("training matrix has no labels"))?;
        let param = self.param.clone();
        param.objective.check_labels(labels)?;
        let base = param.objective.base_margin(param.base_score)?;
        self.num_feature = self.num_feature.max(train.num_col());

        self.refresh_margins(train, base);
        let margins = &self.cache[&train.id()].margins;

        let weights = train.weights();
        let gpairs: Vec<GradPair> = margins
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(row, (&m, &y))| {
                let (g, h) = param.objective.gradient(m, y);
                let w = weights.map_or(1.0, |w| w[row] as f64);
                GradPair::new(g * w, h * w)
            })
            .collect();

        let shrinkage = param.eta / param.num_parallel_tree as f64;
        for k in 0..param.num_parallel_tree {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(round_seed(param.seed, iter, k));
            let rows = sample_rows(train.num_row(), param.subsample, &mut rng);
            let features = sample_columns(train.num_col(), param.colsample_bytree, &mut rng);
            let tree = TreeBuilder::new(train, &gpairs, &features, &param, shrinkage).build(&rows);
            self.trees.push(tree);
        }

        self.refresh_margins(train, base);
        Ok(())
    }

    /// Evaluate the ensemble on every row of `matrix`.
    pub fn predict(&self, matrix: &DMatrix, options: &PredictOptions) -> BoostResult<Vec<f32>> {
        if self.num_feature > 0 && matrix.num_col() > self.num_feature {
            return Err(BoostError::ShapeMismatch {
                expected: self.num_feature,
                actual: matrix.num_col(),
            });
        }

        let limit = match options.ntree_limit as usize {
            0 => self.trees.len(),
            n => n.min(self.trees.len()),
        };
        let trees = &self.trees[..limit];

        if options.pred_leaf {
            let mut out = Vec::with_capacity(matrix.num_row() * trees.len());
            for row in 0..matrix.num_row() {
                let features = matrix.row(row);
                out.extend(trees.iter().map(|t| t.leaf_index(features) as f32));
            }
            return Ok(out);
        }

        let objective = self.param.objective;
        let base = objective.base_margin(self.param.base_score)?;
        let out = (0..matrix.num_row())
            .map(|row| {
                let features = matrix.row(row);
                let margin = trees
                    .iter()
                    .fold(base, |acc, tree| acc + tree.predict(features));
                if options.output_margin {
                    margin
                } else {
                    objective.transform(margin)
                }
            })
            .collect();
        Ok(out)
    }

    fn refresh_margins(&mut self, matrix: &DMatrix, base: f32) {
        let entry = self.cache.entry(matrix.id()).or_insert(MarginCache {
            applied: 0,
            margins: Vec::new(),
        });
        if entry.margins.len() != matrix.num_row() {
            entry.applied = 0;
            entry.margins = vec![base; matrix.num_row()];
        }
        for tree in &self.trees[entry.applied..] {
            for (row, margin) in entry.margins.iter_mut().enumerate() {
                *margin += tree.predict(matrix.row(row));
            }
        }
        entry.applied = self.trees.len();
    }
}

fn round_seed(seed: u64, iter: usize, tree: usize) -> u64 {
    seed ^ (iter as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (tree as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

fn sample_rows(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    (0..n).filter(|_| rng.gen::<f64>() < ratio).collect()
}

fn sample_columns(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    if ratio >= 1.0 {
        return indices;
    }
    let keep = ((n as f64) * ratio).ceil().max(1.0) as usize;
    indices.shuffle(rng);
    indices.truncate(keep);
    indices.sort_unstable();
    indices
}
