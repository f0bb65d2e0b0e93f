//! Shared utilities that glue the different domains together.

pub mod config;
pub mod error;
pub mod log;

pub use config::{PredictorConfig, PredictorOptions};
pub use error::{BoostError, BoostResult, ErrorCode};
