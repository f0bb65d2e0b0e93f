//! Filesystem persistence for trained boosters.
//!
//! A model file is one JSON document tagged with a format name and version.
//! Writes go to a sibling temporary file first and are renamed into place, so
//! readers never observe a half-written model.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::params::TrainParam;
use super::tree::RegTree;
use crate::common::error::{BoostError, BoostResult};

pub const MODEL_FORMAT: &str = "boostpool-gbtree";
pub const MODEL_VERSION: u32 = 1;

/// On-disk representation of a booster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelFile {
    pub format: String,
    pub version: u32,
    pub num_feature: usize,
    pub params: BTreeMap<String, String>,
    pub param: TrainParam,
    pub trees: Vec<RegTree>,
}

impl ModelFile {
    pub fn new(
        num_feature: usize,
        params: BTreeMap<String, String>,
        param: TrainParam,
        trees: Vec<RegTree>,
    ) -> Self {
        Self {
            format: MODEL_FORMAT.to_string(),
            version: MODEL_VERSION,
            num_feature,
            params,
            param,
            trees,
        }
    }

    fn validate(&self) -> BoostResult<()> {
        if self.format != MODEL_FORMAT {
            return Err(BoostError::invalid(format!(
                "unknown model format `{}`",
                self.format
            )));
        }
        if self.version != MODEL_VERSION {
            return Err(BoostError::invalid(format!(
                "unsupported model version {} (expected {MODEL_VERSION})",
                self.version
            )));
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.num_feature)
                .map_err(|e| BoostError::invalid(format!("tree {idx}: {e}")))?;
        }
        Ok(())
    }
}

/// Persist a model atomically at `path`.
pub fn write_model(path: &Path, model: &ModelFile) -> BoostResult<()> {
    let tmp = temp_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, model)?;
        writer.flush()?;
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Read and validate a model written by [`write_model`].
pub fn read_model(path: &Path) -> BoostResult<ModelFile> {
    let reader = BufReader::new(File::open(path)?);
    let model: ModelFile = serde_json::from_reader(reader)?;
    model.validate()?;
    Ok(model)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
