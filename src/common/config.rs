//! Predictor configuration: named construction options and an
//! environment-backed snapshot.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::common::error::{BoostError, BoostResult};
use crate::training::PredictOptions;

/// Options forwarded uniformly to every worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorOptions {
    /// Sentinel marking absent feature values in submitted vectors. NaN is always absent.
    pub missing: f32,
    pub predict: PredictOptions,
    /// Passthrough parameters applied to each model after loading (device selection etc).
    pub params: BTreeMap<String, String>,
}

impl Default for PredictorOptions {
    fn default() -> Self {
        Self {
            missing: f32::NAN,
            predict: PredictOptions::default(),
            params: BTreeMap::new(),
        }
    }
}

impl PredictorOptions {
    pub fn with_missing(mut self, missing: f32) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_predict_options(mut self, predict: PredictOptions) -> Self {
        self.predict = predict;
        self
    }

    pub fn with_ntree_limit(mut self, ntree_limit: u32) -> Self {
        self.predict.ntree_limit = ntree_limit;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of everything needed to start a predictor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub model_path: PathBuf,
    pub workers: usize,
    pub options: PredictorOptions,
}

impl PredictorConfig {
    pub fn new(model_path: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            model_path: model_path.into(),
            workers,
            options: PredictorOptions::default(),
        }
    }

    /// Create a configuration snapshot from the process environment.
    ///
    /// | variable | default |
    /// |---|---|
    /// | `BOOSTPOOL_MODEL_PATH` | required |
    /// | `BOOSTPOOL_WORKERS` | available parallelism |
    /// | `BOOSTPOOL_MISSING` | `NaN` |
    /// | `BOOSTPOOL_OPTION_MASK` | `0` |
    /// | `BOOSTPOOL_NTREE_LIMIT` | `0` |
    /// | `BOOSTPOOL_PARAMS` | empty, `key=value` pairs separated by `,` |
    pub fn load() -> BoostResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`PredictorConfig::load`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> BoostResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_path = lookup("BOOSTPOOL_MODEL_PATH")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BoostError::config("BOOSTPOOL_MODEL_PATH is not set"))?;
        let workers = parse_or(&lookup, "BOOSTPOOL_WORKERS", default_workers())?;
        let missing = parse_or(&lookup, "BOOSTPOOL_MISSING", f32::NAN)?;
        let mask = parse_or(&lookup, "BOOSTPOOL_OPTION_MASK", 0u32)?;
        let ntree_limit = parse_or(&lookup, "BOOSTPOOL_NTREE_LIMIT", 0u32)?;
        let params = match lookup("BOOSTPOOL_PARAMS") {
            Some(raw) => parse_params(&raw)?,
            None => BTreeMap::new(),
        };

        let cfg = Self {
            model_path: PathBuf::from(model_path),
            workers,
            options: PredictorOptions {
                missing,
                predict: PredictOptions::from_option_mask(mask, ntree_limit)?,
                params,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> BoostResult<()> {
        if self.workers == 0 {
            return Err(BoostError::config("workers must be at least 1"));
        }
        if self.model_path.as_os_str().is_empty() {
            return Err(BoostError::config("model path is empty"));
        }
        Ok(())
    }
}

/// Number of parallel execution units, falling back to one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> BoostResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BoostError::config(format!("{key} has malformed value `{raw}`"))),
    }
}

fn parse_params(raw: &str) -> BoostResult<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| BoostError::config(format!("BOOSTPOOL_PARAMS entry `{pair}` is not key=value")))?;
        params.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = PredictorConfig::from_lookup(lookup(&[("BOOSTPOOL_MODEL_PATH", "/models/a.json")]))
            .unwrap();
        assert_eq!(cfg.model_path, PathBuf::from("/models/a.json"));
        assert_eq!(cfg.workers, default_workers());
        assert!(cfg.options.missing.is_nan());
        assert_eq!(cfg.options.predict, PredictOptions::default());
        assert!(cfg.options.params.is_empty());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = PredictorConfig::from_lookup(lookup(&[
            ("BOOSTPOOL_MODEL_PATH", "m.json"),
            ("BOOSTPOOL_WORKERS", "3"),
            ("BOOSTPOOL_MISSING", "-1"),
            ("BOOSTPOOL_OPTION_MASK", "1"),
            ("BOOSTPOOL_NTREE_LIMIT", "10"),
            ("BOOSTPOOL_PARAMS", "predictor=cpu_predictor, gpu_id=0"),
        ]))
        .unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.options.missing, -1.0);
        assert!(cfg.options.predict.output_margin);
        assert_eq!(cfg.options.predict.ntree_limit, 10);
        assert_eq!(cfg.options.params.get("gpu_id").map(String::as_str), Some("0"));
    }

    #[test]
    fn malformed_values_are_errors() {
        let missing_path = PredictorConfig::from_lookup(lookup(&[]));
        assert!(matches!(missing_path, Err(BoostError::InvalidConfig(_))));

        let bad_workers = PredictorConfig::from_lookup(lookup(&[
            ("BOOSTPOOL_MODEL_PATH", "m.json"),
            ("BOOSTPOOL_WORKERS", "many"),
        ]));
        assert!(bad_workers.is_err());

        let zero_workers = PredictorConfig::from_lookup(lookup(&[
            ("BOOSTPOOL_MODEL_PATH", "m.json"),
            ("BOOSTPOOL_WORKERS", "0"),
        ]));
        assert!(zero_workers.is_err());

        let bad_params = PredictorConfig::from_lookup(lookup(&[
            ("BOOSTPOOL_MODEL_PATH", "m.json"),
            ("BOOSTPOOL_PARAMS", "nthread"),
        ]));
        assert!(bad_params.is_err());
    }

    #[test]
    fn builder_sets_options() {
        let opts = PredictorOptions::default()
            .with_missing(-1.0)
            .with_ntree_limit(5)
            .with_param("nthread", "1");
        assert_eq!(opts.missing, -1.0);
        assert_eq!(opts.predict.ntree_limit, 5);
        assert_eq!(opts.params.len(), 1);
    }
}
