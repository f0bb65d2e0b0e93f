//! Data domain: feature matrices and the input shapes callers submit.

pub mod matrix;
pub mod vector;

pub use matrix::{DMatrix, FloatInfo};
pub use vector::{FeatureVector, FloatRows, FloatSliceVector};
