//! Training domain: the gradient boosted tree engine behind every model handle.
//!
//! Training happens offline; the predictor only loads finished models. The
//! engine lives here so models can be produced, saved and reloaded in-process.

pub mod booster;
pub mod params;
pub mod repo_fs;
pub mod tree;

pub use booster::{
    Booster, PredictOptions, OPTION_OUTPUT_MARGIN, OPTION_PRED_CONTRIBS, OPTION_PRED_LEAF,
};
pub use params::{Objective, TrainParam};
pub use tree::RegTree;
