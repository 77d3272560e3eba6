//! Configuration of the ensemble dynamics model.
use crate::{opt::OptimizerConfig, Device};
use anyhow::Result;
use mbpo_core::error::MbpoError;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`EnsembleDynamics`](super::EnsembleDynamics).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EnsembleConfig {
    /// Dimension of observations.
    pub obs_dim: usize,

    /// Dimension of actions.
    pub act_dim: usize,

    /// The number of networks in the ensemble.
    pub num_networks: usize,

    /// The number of elites used for prediction.
    pub num_elites: usize,

    /// Units of hidden layers.
    pub units: Vec<usize>,

    /// L2 coefficient of each layer's weights, hidden layers then the output layer.
    pub weight_decays: Vec<f64>,

    /// Optimizer of all networks.
    pub opt_config: OptimizerConfig,

    /// Initial upper bound of the log variance.
    pub max_logvar: f64,

    /// Initial lower bound of the log variance.
    pub min_logvar: f64,

    /// Coefficient of the log-variance bound regularizer.
    pub logvar_bound_coef: f64,

    /// Epochs without improvement before training stops.
    pub max_epochs_since_update: usize,

    /// Relative holdout loss decrease counted as an improvement.
    pub improvement_threshold: f32,

    /// Upper bound of the number of holdout samples.
    pub max_holdout: usize,

    /// Seed of the bootstrap and the holdout split.
    pub seed: u64,

    /// Device of the networks.
    pub device: Option<Device>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            obs_dim: 0,
            act_dim: 0,
            num_networks: 7,
            num_elites: 5,
            units: vec![200; 4],
            weight_decays: vec![0.000025, 0.00005, 0.000075, 0.000075, 0.0001],
            opt_config: OptimizerConfig::Adam { lr: 0.001 },
            max_logvar: 0.5,
            min_logvar: -10.0,
            logvar_bound_coef: 0.01,
            max_epochs_since_update: 5,
            improvement_threshold: 0.01,
            max_holdout: 5000,
            seed: 42,
            device: None,
        }
    }
}

impl EnsembleConfig {
    /// Sets dimensions of observations and actions.
    pub fn dims(mut self, obs_dim: usize, act_dim: usize) -> Self {
        self.obs_dim = obs_dim;
        self.act_dim = act_dim;
        self
    }

    /// Sets the ensemble size and the number of elites.
    pub fn networks(mut self, num_networks: usize, num_elites: usize) -> Self {
        self.num_networks = num_networks;
        self.num_elites = num_elites;
        self
    }

    /// Sets hidden units with their weight decays; the last decay is for the output layer.
    pub fn layers(mut self, units: Vec<usize>, weight_decays: Vec<f64>) -> Self {
        self.units = units;
        self.weight_decays = weight_decays;
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = Some(v);
        self
    }

    /// Width of the model inputs, `obs_dim + act_dim`.
    pub fn in_dim(&self) -> usize {
        self.obs_dim + self.act_dim
    }

    /// Width of the model outputs, reward then observation delta.
    pub fn out_dim(&self) -> usize {
        self.obs_dim + 1
    }

    /// Checks invariants between fields.
    pub fn validate(&self) -> Result<(), MbpoError> {
        if self.obs_dim == 0 || self.act_dim == 0 {
            return Err(MbpoError::InvalidConfig(
                "obs_dim and act_dim must be positive".into(),
            ));
        }
        if self.num_elites == 0 || self.num_elites > self.num_networks {
            return Err(MbpoError::InvalidConfig(format!(
                "num_elites ({}) must be in 1..={}",
                self.num_elites, self.num_networks
            )));
        }
        if self.weight_decays.len() != self.units.len() + 1 {
            return Err(MbpoError::InvalidConfig(format!(
                "{} weight decays given for {} layers",
                self.weight_decays.len(),
                self.units.len() + 1
            )));
        }
        Ok(())
    }

    /// Loads [`EnsembleConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`EnsembleConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        let config = EnsembleConfig::default().dims(11, 3);
        assert!(config.validate().is_ok());
        assert_eq!(config.out_dim(), 12);
        assert!(config.clone().networks(3, 5).validate().is_err());
        assert!(config
            .layers(vec![200, 200], vec![1e-4])
            .validate()
            .is_err());
    }
}
