//! Seams between workers and the model layer.

use std::collections::BTreeMap;
use std::path::Path;

use crate::common::error::BoostResult;
use crate::data::DMatrix;
use crate::training::{Booster, PredictOptions};

/// Passthrough key/value parameters applied to every loaded model.
pub type ModelParams = BTreeMap<String, String>;

/// A loaded predictor that may only be used by one thread at a time.
///
/// Exclusive access is expressed through `&mut self`; the model is released
/// when it is dropped.
pub trait Model: Send + 'static {
    fn predict(&mut self, matrix: &DMatrix, options: &PredictOptions) -> BoostResult<Vec<f32>>;
}

impl Model for Booster {
    fn predict(&mut self, matrix: &DMatrix, options: &PredictOptions) -> BoostResult<Vec<f32>> {
        Booster::predict(self, matrix, options)
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn predict(&mut self, matrix: &DMatrix, options: &PredictOptions) -> BoostResult<Vec<f32>> {
        (**self).predict(matrix, options)
    }
}

/// Produces one independent model instance per call.
pub trait ModelLoader: Send + Sync {
    type Model: Model;

    fn load(&self, path: &Path, params: &ModelParams) -> BoostResult<Self::Model>;
}

/// Loads [`Booster`] model files and applies the passthrough parameters.
#[derive(Copy, Clone, Debug, Default)]
pub struct BoosterLoader;

impl ModelLoader for BoosterLoader {
    type Model = Booster;

    fn load(&self, path: &Path, params: &ModelParams) -> BoostResult<Booster> {
        let mut booster = Booster::from_file(path)?;
        for (key, value) in params {
            booster.set_param(key, value)?;
        }
        Ok(booster)
    }
}

/// Adapts a closure into a [`ModelLoader`].
#[derive(Clone, Debug)]
pub struct FnLoader<F>(pub F);

impl<F, M> ModelLoader for FnLoader<F>
where
    F: Fn(&Path, &ModelParams) -> BoostResult<M> + Send + Sync,
    M: Model,
{
    type Model = M;

    fn load(&self, path: &Path, params: &ModelParams) -> BoostResult<M> {
        (self.0)(path, params)
    }
}
