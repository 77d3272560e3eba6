//! Configuration of [`Mbpo`](crate::Mbpo).
use crate::{base::ModelTrainParams, error::MbpoError, rollout::RolloutSchedule};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Configuration of [`Mbpo`](crate::Mbpo).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MbpoConfig {
    /// The number of epochs.
    pub n_epochs: usize,

    /// Environment steps per epoch.
    pub epoch_length: usize,

    /// Environment steps with a uniform random policy before training.
    pub n_initial_exploration_steps: usize,

    /// Paths are truncated after this many steps.
    pub max_path_length: usize,

    /// Training starts once the real pool holds this many samples.
    pub min_pool_size: usize,

    /// Capacity of the real pool.
    pub pool_capacity: usize,

    /// Rows per training batch.
    pub batch_size: usize,

    /// Training runs every this many environment steps.
    pub train_every_n_steps: usize,

    /// Skips training when the epoch has run more than this many training
    /// steps per environment step.
    pub max_train_repeat_per_timestep: usize,

    /// Episodes per evaluation.
    pub eval_n_episodes: usize,

    /// The model is refit every this many environment steps.
    pub model_train_freq: usize,

    /// The model is refit only on every this many refit attempts.
    pub model_train_slower: usize,

    /// Epochs of rollouts retained in the model pool.
    pub model_retain_epochs: usize,

    /// Start states per rollout phase.
    pub rollout_batch_size: usize,

    /// Branches the start states are divided into.
    pub sample_repeat: usize,

    /// Rollouts use the mean prediction of the selected elite.
    pub deterministic: bool,

    /// Fraction of real transitions in a training batch.
    pub real_ratio: f64,

    /// Schedule of the rollout length.
    pub rollout_schedule: RolloutSchedule,

    /// Parameters of model training.
    pub model_train: ModelTrainParams,

    /// Critics train on the mixed batch. If `false`, critics train on the real part only.
    pub critic_same_as_actor: bool,

    /// Exploration diagnostics run every this many epochs; `0` disables them.
    pub evaluate_explore_freq: usize,

    /// Observations per exploration diagnostics pass.
    pub exploration_eval_size: usize,

    /// Policy actions per observation in the exploration diagnostics.
    pub exploration_action_repeat: usize,

    /// Directory of the exploration diagnostics.
    pub exploration_dir: Option<PathBuf>,

    /// The model is saved every this many timesteps of a refit; `0` disables saving.
    pub model_log_freq: usize,

    /// Directory of model and policy checkpoints.
    pub model_dir: Option<PathBuf>,

    /// Directory of a model checkpoint loaded before training.
    pub load_model_dir: Option<PathBuf>,

    /// Index of the loaded checkpoint. The latest one is used if `None`.
    pub model_load_index: Option<usize>,

    /// Random seed.
    pub seed: u64,
}

impl Default for MbpoConfig {
    fn default() -> Self {
        Self {
            n_epochs: 1000,
            epoch_length: 1000,
            n_initial_exploration_steps: 5000,
            max_path_length: 1000,
            min_pool_size: 1,
            pool_capacity: 1_000_000,
            batch_size: 256,
            train_every_n_steps: 1,
            max_train_repeat_per_timestep: 5,
            eval_n_episodes: 1,
            model_train_freq: 250,
            model_train_slower: 1,
            model_retain_epochs: 20,
            rollout_batch_size: 100_000,
            sample_repeat: 1,
            deterministic: false,
            real_ratio: 0.1,
            rollout_schedule: RolloutSchedule::default(),
            model_train: ModelTrainParams::default(),
            critic_same_as_actor: true,
            evaluate_explore_freq: 0,
            exploration_eval_size: 3000,
            exploration_action_repeat: 20,
            exploration_dir: None,
            model_log_freq: 0,
            model_dir: None,
            load_model_dir: None,
            model_load_index: None,
            seed: 42,
        }
    }
}

impl MbpoConfig {
    /// Sets the number of epochs.
    pub fn n_epochs(mut self, v: usize) -> Self {
        self.n_epochs = v;
        self
    }

    /// Sets the number of environment steps per epoch.
    pub fn epoch_length(mut self, v: usize) -> Self {
        self.epoch_length = v;
        self
    }

    /// Sets the number of initial exploration steps.
    pub fn n_initial_exploration_steps(mut self, v: usize) -> Self {
        self.n_initial_exploration_steps = v;
        self
    }

    /// Sets the maximum path length.
    pub fn max_path_length(mut self, v: usize) -> Self {
        self.max_path_length = v;
        self
    }

    /// Sets the minimum real pool size for training.
    pub fn min_pool_size(mut self, v: usize) -> Self {
        self.min_pool_size = v;
        self
    }

    /// Sets the capacity of the real pool.
    pub fn pool_capacity(mut self, v: usize) -> Self {
        self.pool_capacity = v;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the training cadence in environment steps.
    pub fn train_every_n_steps(mut self, v: usize) -> Self {
        self.train_every_n_steps = v;
        self
    }

    /// Sets the guard on training steps per environment step.
    pub fn max_train_repeat_per_timestep(mut self, v: usize) -> Self {
        self.max_train_repeat_per_timestep = v;
        self
    }

    /// Sets the number of evaluation episodes.
    pub fn eval_n_episodes(mut self, v: usize) -> Self {
        self.eval_n_episodes = v;
        self
    }

    /// Sets the model refit interval.
    pub fn model_train_freq(mut self, v: usize) -> Self {
        self.model_train_freq = v;
        self
    }

    /// Sets the model training slowdown.
    pub fn model_train_slower(mut self, v: usize) -> Self {
        self.model_train_slower = v;
        self
    }

    /// Sets the number of epochs retained in the model pool.
    pub fn model_retain_epochs(mut self, v: usize) -> Self {
        self.model_retain_epochs = v;
        self
    }

    /// Sets the number of rollout start states.
    pub fn rollout_batch_size(mut self, v: usize) -> Self {
        self.rollout_batch_size = v;
        self
    }

    /// Sets the number of rollout branches.
    pub fn sample_repeat(mut self, v: usize) -> Self {
        self.sample_repeat = v;
        self
    }

    /// Sets deterministic model rollouts.
    pub fn deterministic(mut self, v: bool) -> Self {
        self.deterministic = v;
        self
    }

    /// Sets the fraction of real transitions in a batch.
    pub fn real_ratio(mut self, v: f64) -> Self {
        self.real_ratio = v;
        self
    }

    /// Sets the rollout schedule.
    pub fn rollout_schedule(mut self, v: RolloutSchedule) -> Self {
        self.rollout_schedule = v;
        self
    }

    /// Sets the model training parameters.
    pub fn model_train(mut self, v: ModelTrainParams) -> Self {
        self.model_train = v;
        self
    }

    /// Sets whether critics use the actor batch.
    pub fn critic_same_as_actor(mut self, v: bool) -> Self {
        self.critic_same_as_actor = v;
        self
    }

    /// Enables exploration diagnostics every `freq` epochs, written in `dir`.
    pub fn exploration_diagnostics(mut self, freq: usize, dir: impl Into<PathBuf>) -> Self {
        self.evaluate_explore_freq = freq;
        self.exploration_dir = Some(dir.into());
        self
    }

    /// Sets the sizes of the exploration diagnostics.
    pub fn exploration_sizes(mut self, eval_size: usize, action_repeat: usize) -> Self {
        self.exploration_eval_size = eval_size;
        self.exploration_action_repeat = action_repeat;
        self
    }

    /// Enables checkpoints every `freq` timesteps, written in `dir`.
    pub fn model_checkpoints(mut self, freq: usize, dir: impl Into<PathBuf>) -> Self {
        self.model_log_freq = freq;
        self.model_dir = Some(dir.into());
        self
    }

    /// Loads a model checkpoint from `dir` before training.
    pub fn load_model(mut self, dir: impl Into<PathBuf>, index: Option<usize>) -> Self {
        self.load_model_dir = Some(dir.into());
        self.model_load_index = index;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Rows taken from the real pool in a batch of `batch_size`.
    pub fn env_batch_size(&self) -> usize {
        (self.batch_size as f64 * self.real_ratio).floor() as usize
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), MbpoError> {
        let positive = [
            ("epoch_length", self.epoch_length),
            ("max_path_length", self.max_path_length),
            ("pool_capacity", self.pool_capacity),
            ("batch_size", self.batch_size),
            ("train_every_n_steps", self.train_every_n_steps),
            ("model_train_freq", self.model_train_freq),
            ("model_train_slower", self.model_train_slower),
            ("model_retain_epochs", self.model_retain_epochs),
            ("sample_repeat", self.sample_repeat),
        ];
        for (name, v) in positive.iter() {
            if *v == 0 {
                return Err(MbpoError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if !(0.0..=1.0).contains(&self.real_ratio) {
            return Err(MbpoError::InvalidConfig(format!(
                "real_ratio must be in [0, 1], got {}",
                self.real_ratio
            )));
        }
        if !self.critic_same_as_actor && self.env_batch_size() == 0 {
            return Err(MbpoError::InvalidConfig(format!(
                "critics trained on real rows only need floor(batch_size * real_ratio) > 0, \
                 got batch_size {} and real_ratio {}",
                self.batch_size, self.real_ratio
            )));
        }
        if self.rollout_batch_size < self.sample_repeat {
            return Err(MbpoError::InvalidConfig(format!(
                "rollout_batch_size ({}) must not be smaller than sample_repeat ({})",
                self.rollout_batch_size, self.sample_repeat
            )));
        }
        let h = self.model_train.holdout_ratio;
        if !(0.0..1.0).contains(&h) {
            return Err(MbpoError::InvalidConfig(format!(
                "holdout_ratio must be in [0, 1), got {}",
                h
            )));
        }
        if self.evaluate_explore_freq > 0 && self.exploration_dir.is_none() {
            return Err(MbpoError::InvalidConfig(
                "exploration diagnostics need exploration_dir".into(),
            ));
        }
        if self.model_log_freq > 0 && self.model_dir.is_none() {
            return Err(MbpoError::InvalidConfig(
                "model checkpoints need model_dir".into(),
            ));
        }
        self.rollout_schedule.validate()
    }

    /// Constructs [`MbpoConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MbpoConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_env_batch_size() {
        let config = MbpoConfig::default().batch_size(256).real_ratio(0.05);
        assert_eq!(config.env_batch_size(), 12);
        let config = config.real_ratio(1.0);
        assert_eq!(config.env_batch_size(), 256);
        for (batch_size, real_ratio, expected) in [(1000, 0.9, 900), (100, 0.7, 70), (10, 0.7, 7)]
        {
            let config = MbpoConfig::default()
                .batch_size(batch_size)
                .real_ratio(real_ratio);
            assert_eq!(config.env_batch_size(), expected, "{} * {}", batch_size, real_ratio);
        }
    }

    #[test]
    fn test_validate() {
        assert!(MbpoConfig::default().validate().is_ok());
        assert!(MbpoConfig::default().real_ratio(1.5).validate().is_err());
        assert!(MbpoConfig::default().model_train_freq(0).validate().is_err());
        assert!(MbpoConfig::default()
            .rollout_batch_size(2)
            .sample_repeat(3)
            .validate()
            .is_err());
        assert!(MbpoConfig::default()
            .critic_same_as_actor(false)
            .real_ratio(0.0)
            .validate()
            .is_err());
        assert!(MbpoConfig::default()
            .critic_same_as_actor(false)
            .batch_size(10)
            .real_ratio(0.05)
            .validate()
            .is_err());
        assert!(MbpoConfig::default().real_ratio(0.0).validate().is_ok());
        let mut config = MbpoConfig::default();
        config.evaluate_explore_freq = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_mbpo_config() -> Result<()> {
        let config = MbpoConfig::default()
            .n_epochs(10)
            .real_ratio(0.05)
            .rollout_schedule(RolloutSchedule::new(20, 150, 1, 15)?)
            .model_checkpoints(1000, "some/directory");

        let dir = TempDir::new("mbpo_config")?;
        let path = dir.path().join("mbpo_config.yaml");
        config.save(&path)?;
        let config_ = MbpoConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
