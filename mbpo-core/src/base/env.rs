//! Environment.
use crate::record::Record;
use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A box-shaped continuous space, `low[i] <= x[i] <= high[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    /// Lower bounds.
    pub low: Vec<f32>,

    /// Upper bounds.
    pub high: Vec<f32>,
}

impl BoxSpace {
    /// A box with the same bounds on every dimension.
    pub fn uniform_bounds(dim: usize, low: f32, high: f32) -> Self {
        Self {
            low: vec![low; dim],
            high: vec![high; dim],
        }
    }

    /// Dimension of the space.
    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Draws a point uniformly from the box.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f32> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&lo, &hi)| lo + (hi - lo) * rng.gen::<f32>())
            .collect()
    }

    /// Clips a point into the box.
    pub fn clip(&self, x: &[f32]) -> Vec<f32> {
        x.iter()
            .zip(self.low.iter().zip(self.high.iter()))
            .map(|(&v, (&lo, &hi))| v.clamp(lo, hi))
            .collect()
    }
}

/// The outcome of an environment step.
#[derive(Debug, Clone)]
pub struct EnvStep {
    /// Observation after the step.
    pub obs: Vec<f32>,

    /// Reward.
    pub reward: f32,

    /// `true` if the episode terminated.
    pub is_terminated: bool,

    /// Environment-specific information.
    pub info: Record,
}

/// Represents an environment, typically an MDP, with continuous observations and actions.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Dimension of observations.
    fn obs_dim(&self) -> usize;

    /// The action space.
    fn action_space(&self) -> &BoxSpace;

    /// Dimension of actions.
    fn act_dim(&self) -> usize {
        self.action_space().dim()
    }

    /// Resets the environment and returns the initial observation.
    fn reset(&mut self) -> Result<Vec<f32>>;

    /// Performs an environment step.
    fn step(&mut self, act: &[f32]) -> Result<EnvStep>;
}
