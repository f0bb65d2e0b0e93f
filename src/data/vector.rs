//! Input representations accepted by the predictor.

use super::matrix::DMatrix;
use crate::common::error::BoostResult;

/// Anything that can be turned into a prediction matrix.
///
/// Conversion happens on the worker thread, so implementations must be `Send`.
pub trait FeatureVector: Send + 'static {
    fn to_matrix(&self, missing: f32) -> BoostResult<DMatrix>;
}

/// A single feature row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatSliceVector(pub Vec<f32>);

impl FloatSliceVector {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self(values.into())
    }
}

impl From<Vec<f32>> for FloatSliceVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl From<&[f32]> for FloatSliceVector {
    fn from(values: &[f32]) -> Self {
        Self(values.to_vec())
    }
}

impl FeatureVector for FloatSliceVector {
    fn to_matrix(&self, missing: f32) -> BoostResult<DMatrix> {
        DMatrix::from_dense(&self.0, 1, self.0.len(), missing)
    }
}

/// A batch of feature rows predicted in one call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatRows(pub Vec<Vec<f32>>);

impl From<Vec<Vec<f32>>> for FloatRows {
    fn from(rows: Vec<Vec<f32>>) -> Self {
        Self(rows)
    }
}

impl FeatureVector for FloatRows {
    fn to_matrix(&self, missing: f32) -> BoostResult<DMatrix> {
        DMatrix::from_rows(&self.0, missing)
    }
}

impl FeatureVector for Vec<f32> {
    fn to_matrix(&self, missing: f32) -> BoostResult<DMatrix> {
        DMatrix::from_dense(self, 1, self.len(), missing)
    }
}

impl FeatureVector for Vec<Vec<f32>> {
    fn to_matrix(&self, missing: f32) -> BoostResult<DMatrix> {
        DMatrix::from_rows(self, missing)
    }
}

impl FeatureVector for DMatrix {
    fn to_matrix(&self, _missing: f32) -> BoostResult<DMatrix> {
        Ok(self.clone())
    }
}
