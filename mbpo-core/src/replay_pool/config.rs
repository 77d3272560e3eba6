//! Configuration of [`SimpleReplayPool`](super::SimpleReplayPool).
use crate::error::MbpoError;
use serde::{Deserialize, Serialize};

/// Configuration of [`SimpleReplayPool`](super::SimpleReplayPool).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPoolConfig {
    /// The maximum number of transitions.
    pub capacity: usize,

    /// Dimension of observations.
    pub obs_dim: usize,

    /// Dimension of actions.
    pub act_dim: usize,

    /// Random seed for sampling.
    pub seed: u64,
}

impl Default for ReplayPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            obs_dim: 1,
            act_dim: 1,
            seed: 42,
        }
    }
}

impl ReplayPoolConfig {
    /// Sets the capacity of the pool.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the dimensions of observations and actions.
    pub fn dims(mut self, obs_dim: usize, act_dim: usize) -> Self {
        self.obs_dim = obs_dim;
        self.act_dim = act_dim;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), MbpoError> {
        if self.capacity == 0 {
            return Err(MbpoError::InvalidConfig(
                "replay pool capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
