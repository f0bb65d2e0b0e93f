//! Concurrent prediction over a pool of gradient boosted tree models.
//!
//! A [`Predictor`] loads one model per worker thread from the same file and
//! hands each request to whichever worker is idle. Callers see a plain
//! blocking `predict`; models are never touched by two threads at once.
//!
//! ```no_run
//! use boostpool::{Context, FloatSliceVector, Predictor, PredictorOptions};
//!
//! let predictor = Predictor::new("model.json", 4, PredictorOptions::default())?;
//! let out = predictor.predict(FloatSliceVector(vec![1.0, 2.0, 3.0]))?;
//! println!("{out:?}");
//! predictor.close(&Context::background())?;
//! # Ok::<(), boostpool::BoostError>(())
//! ```

pub mod common;
pub mod data;
pub mod inference;
pub mod training;

pub use common::{BoostError, BoostResult, ErrorCode, PredictorConfig, PredictorOptions};
pub use data::{DMatrix, FeatureVector, FloatRows, FloatSliceVector};
pub use inference::{
    BoosterLoader, CancelHandle, Context, FnLoader, Lifecycle, Model, ModelLoader, ModelParams,
    Predictor, PredictorStats,
};
pub use training::{Booster, PredictOptions};
