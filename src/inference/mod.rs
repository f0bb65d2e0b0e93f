//! Inference domain: a pool of single-threaded models behind a synchronous,
//! concurrently callable `Predictor`.

pub mod context;
pub mod domain;
pub mod model;
pub mod service;
mod workers;

pub use context::{CancelHandle, Context};
pub use domain::{Lifecycle, PredictorStats, Response};
pub use model::{BoosterLoader, FnLoader, Model, ModelLoader, ModelParams};
pub use service::Predictor;
