//! Booster hyperparameters set through string key/value pairs.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::error::{BoostError, BoostResult};

/// Learning objective. Decides gradients and the output transform.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    SquaredError,
    Logistic,
    BinaryLogistic,
}

impl Objective {
    pub fn parse(value: &str) -> BoostResult<Self> {
        match value {
            "reg:linear" | "reg:squarederror" => Ok(Objective::SquaredError),
            "reg:logistic" => Ok(Objective::Logistic),
            "binary:logistic" => Ok(Objective::BinaryLogistic),
            other => Err(BoostError::param("objective", other, "unsupported objective")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::SquaredError => "reg:squarederror",
            Objective::Logistic => "reg:logistic",
            Objective::BinaryLogistic => "binary:logistic",
        }
    }

    fn is_logistic(&self) -> bool {
        matches!(self, Objective::Logistic | Objective::BinaryLogistic)
    }

    /// First and second order gradient of the loss at `margin`.
    pub fn gradient(&self, margin: f32, label: f32) -> (f64, f64) {
        if self.is_logistic() {
            let p = sigmoid(margin as f64);
            (p - label as f64, (p * (1.0 - p)).max(1e-16))
        } else {
            (margin as f64 - label as f64, 1.0)
        }
    }

    /// Map a raw margin to the output space.
    pub fn transform(&self, margin: f32) -> f32 {
        if self.is_logistic() {
            sigmoid(margin as f64) as f32
        } else {
            margin
        }
    }

    /// Convert `base_score` into the margin every prediction starts from.
    pub fn base_margin(&self, base_score: f32) -> BoostResult<f32> {
        if !self.is_logistic() {
            return Ok(base_score);
        }
        if base_score <= 0.0 || base_score >= 1.0 {
            return Err(BoostError::param(
                "base_score",
                &base_score.to_string(),
                "must be in (0, 1) for logistic objectives",
            ));
        }
        let p = base_score as f64;
        Ok((p / (1.0 - p)).ln() as f32)
    }

    pub fn check_labels(&self, labels: &[f32]) -> BoostResult<()> {
        if self.is_logistic() && labels.iter().any(|&y| !(0.0..=1.0).contains(&y)) {
            return Err(BoostError::invalid(format!(
                "{} requires labels in [0, 1]",
                self.as_str()
            )));
        }
        Ok(())
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Parsed tree-booster parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainParam {
    pub objective: Objective,
    /// Shrinkage applied to every new tree.
    pub eta: f64,
    pub max_depth: usize,
    /// Minimum hessian sum required in each child.
    pub min_child_weight: f64,
    /// Minimum loss reduction to keep a split.
    pub gamma: f64,
    /// L2 regularisation on leaf weights.
    pub lambda: f64,
    /// L1 regularisation on leaf weights.
    pub alpha: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub num_parallel_tree: usize,
    pub base_score: f32,
    pub seed: u64,
}

impl Default for TrainParam {
    fn default() -> Self {
        Self {
            objective: Objective::SquaredError,
            eta: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            gamma: 0.0,
            lambda: 1.0,
            alpha: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            num_parallel_tree: 1,
            base_score: 0.5,
            seed: 0,
        }
    }
}

impl TrainParam {
    /// Resolve a full parameter set from raw key/value pairs.
    pub fn from_params(params: &BTreeMap<String, String>) -> BoostResult<Self> {
        let mut out = Self::default();
        for (key, value) in params {
            out.set(key, value)?;
        }
        Ok(out)
    }

    /// Apply one parameter. Keys this engine does not use are accepted and ignored.
    pub fn set(&mut self, key: &str, value: &str) -> BoostResult<()> {
        match key {
            "booster" => {
                if value != "gbtree" {
                    return Err(BoostError::param(key, value, "only gbtree is supported"));
                }
            }
            "objective" => self.objective = Objective::parse(value)?,
            "eta" | "learning_rate" => {
                self.eta = parse(key, value)?;
                ensure(key, value, self.eta >= 0.0, "must be non-negative")?;
            }
            "max_depth" => {
                self.max_depth = parse(key, value)?;
                ensure(key, value, self.max_depth >= 1, "must be at least 1")?;
            }
            "min_child_weight" => {
                self.min_child_weight = parse(key, value)?;
                ensure(key, value, self.min_child_weight >= 0.0, "must be non-negative")?;
            }
            "gamma" | "min_split_loss" => {
                self.gamma = parse(key, value)?;
                ensure(key, value, self.gamma >= 0.0, "must be non-negative")?;
            }
            "lambda" | "reg_lambda" => {
                self.lambda = parse(key, value)?;
                ensure(key, value, self.lambda >= 0.0, "must be non-negative")?;
            }
            "alpha" | "reg_alpha" => {
                self.alpha = parse(key, value)?;
                ensure(key, value, self.alpha >= 0.0, "must be non-negative")?;
            }
            "subsample" => {
                self.subsample = parse(key, value)?;
                ensure(key, value, in_unit(self.subsample), "must be in (0, 1]")?;
            }
            "colsample_bytree" => {
                self.colsample_bytree = parse(key, value)?;
                ensure(key, value, in_unit(self.colsample_bytree), "must be in (0, 1]")?;
            }
            "num_parallel_tree" => {
                self.num_parallel_tree = parse(key, value)?;
                ensure(key, value, self.num_parallel_tree >= 1, "must be at least 1")?;
            }
            "base_score" => self.base_score = parse(key, value)?,
            "seed" | "random_state" => self.seed = parse(key, value)?,
            "silent" | "verbosity" | "nthread" => {
                parse::<i64>(key, value)?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> BoostResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BoostError::param(key, value, "malformed value"))
}

fn ensure(key: &str, value: &str, ok: bool, reason: &str) -> BoostResult<()> {
    if ok {
        Ok(())
    } else {
        Err(BoostError::param(key, value, reason))
    }
}

fn in_unit(v: f64) -> bool {
    v > 0.0 && v <= 1.0
}
