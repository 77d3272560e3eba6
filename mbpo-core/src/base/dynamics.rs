//! Dynamics model.
use crate::record::Record;
use anyhow::Result;
use ndarray::{Array2, Array3};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parameters of a single model training pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainParams {
    /// Minibatch size.
    pub batch_size: usize,

    /// Maximum number of epochs. `None` trains until the holdout loss plateaus.
    pub max_epochs: Option<usize>,

    /// Fraction of samples held out for validation.
    pub holdout_ratio: f32,

    /// Wall-clock limit in seconds.
    pub max_t: Option<f32>,
}

impl Default for ModelTrainParams {
    fn default() -> Self {
        Self {
            batch_size: 256,
            max_epochs: None,
            holdout_ratio: 0.2,
            max_t: None,
        }
    }
}

/// Per-elite Gaussian predictions of `[reward, delta_obs]`.
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    /// Means, `[n_elites, n, 1 + obs_dim]`.
    pub mean: Array3<f32>,

    /// Variances, `[n_elites, n, 1 + obs_dim]`.
    pub var: Array3<f32>,
}

impl EnsemblePrediction {
    /// The number of elites.
    pub fn n_elites(&self) -> usize {
        self.mean.shape()[0]
    }

    /// The number of samples.
    pub fn n_samples(&self) -> usize {
        self.mean.shape()[1]
    }
}

/// A probabilistic ensemble forward model `[obs, act] -> [reward, next_obs - obs]`.
pub trait DynamicsModel {
    /// Fits the ensemble and recomputes the elites.
    ///
    /// Returns metrics such as `val_loss` and `train_epochs`. When the data is too
    /// small for a holdout split the call logs a warning, leaves the model unchanged
    /// and returns an empty record.
    fn train(
        &mut self,
        inputs: &Array2<f32>,
        targets: &Array2<f32>,
        params: &ModelTrainParams,
    ) -> Result<Record>;

    /// Predicts with every elite.
    fn predict(&self, inputs: &Array2<f32>) -> Result<EnsemblePrediction>;

    /// Indices of the elites, best first.
    fn elites(&self) -> &[usize];

    /// The number of networks in the ensemble.
    fn num_networks(&self) -> usize;

    /// Saves the ensemble in `dir` under the given index and returns the file path.
    fn save(&self, dir: &Path, index: usize) -> Result<PathBuf>;

    /// Loads the ensemble from a file written by [`DynamicsModel::save`].
    fn load(&mut self, path: &Path) -> Result<()>;
}

/// Indices of the `n` smallest losses in ascending order, ties broken by index.
pub fn select_elites(losses: &[f32], n: usize) -> Vec<usize> {
    let mut ixs: Vec<usize> = (0..losses.len()).collect();
    ixs.sort_by_key(|&i| OrderedFloat(losses[i]));
    ixs.truncate(n);
    ixs
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_select_elites() {
        let losses = [0.5, 0.2, 0.9, 0.1, 0.3, 0.4, 0.6];
        assert_eq!(select_elites(&losses, 3), vec![3, 1, 4]);
    }

    #[test]
    fn test_select_elites_ties_by_index() {
        let losses = [0.3, 0.1, 0.3, 0.1];
        assert_eq!(select_elites(&losses, 3), vec![1, 3, 0]);
    }
}
