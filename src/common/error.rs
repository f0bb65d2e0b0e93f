//! Error handling primitives shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Stable error codes, one per error family.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Construction rejected the supplied configuration.
    InvalidConfig = 1,
    /// A model file could not be loaded.
    ModelLoad = 2,
    /// Input failed validation or had the wrong shape.
    InvalidInput = 3,
    /// Model evaluation failed.
    Evaluation = 4,
    /// The predictor is closing or closed.
    Unavailable = 5,
    /// A deadline expired while waiting.
    DeadlineExceeded = 6,
    /// The caller cancelled the wait, or the request was cancelled by shutdown.
    Cancelled = 7,
    /// Filesystem or serialisation failure.
    Io = 8,
    /// Catch-all for bugs.
    Internal = 9,
}

/// Canonical error type for the crate.
#[derive(Debug, Error)]
pub enum BoostError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker {worker} failed to load model from {}: {source}", path.display())]
    ModelLoad {
        path: PathBuf,
        worker: usize,
        #[source]
        source: Box<BoostError>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("shape mismatch: expected at most {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid parameter {key}={value}: {reason}")]
    InvalidParam {
        key: String,
        value: String,
        reason: String,
    },

    #[error("model evaluation failed: {0}")]
    Evaluation(String),

    #[error("predictor is closed")]
    Unavailable,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type BoostResult<T> = Result<T, BoostError>;

impl BoostError {
    /// Validation helper.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Configuration helper.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Parameter helper.
    pub fn param(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Machine readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BoostError::InvalidConfig(_) | BoostError::InvalidParam { .. } => {
                ErrorCode::InvalidConfig
            }
            BoostError::ModelLoad { .. } => ErrorCode::ModelLoad,
            BoostError::InvalidInput(_) | BoostError::ShapeMismatch { .. } => {
                ErrorCode::InvalidInput
            }
            BoostError::Evaluation(_) => ErrorCode::Evaluation,
            BoostError::Unavailable => ErrorCode::Unavailable,
            BoostError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            BoostError::Cancelled => ErrorCode::Cancelled,
            BoostError::Io(_) | BoostError::Serialization(_) => ErrorCode::Io,
            BoostError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True when the request was rejected because the predictor is shutting down.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BoostError::Unavailable)
    }

    /// True for deadline expiry and cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BoostError::DeadlineExceeded | BoostError::Cancelled)
    }
}
