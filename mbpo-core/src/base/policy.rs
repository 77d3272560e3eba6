//! Policy.
use super::BoxSpace;
use anyhow::Result;
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};

/// A policy mapping a batch of observations to a batch of actions.
pub trait Policy {
    /// Samples actions for observations `[n, obs_dim]`, returning `[n, act_dim]`.
    ///
    /// If `deterministic` is `true`, the mode of the action distribution is returned.
    fn sample(&mut self, obs: &Array2<f32>, deterministic: bool) -> Result<Array2<f32>>;
}

/// Samples actions uniformly from the action space.
///
/// Used for the initial exploration before the agent is trained.
pub struct UniformPolicy {
    space: BoxSpace,
    rng: StdRng,
}

impl UniformPolicy {
    /// Creates a uniform policy over the given space.
    pub fn new(space: BoxSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Policy for UniformPolicy {
    fn sample(&mut self, obs: &Array2<f32>, _deterministic: bool) -> Result<Array2<f32>> {
        let n = obs.nrows();
        let dim = self.space.dim();
        let mut data = Vec::with_capacity(n * dim);
        for _ in 0..n {
            data.extend(self.space.sample(&mut self.rng));
        }
        Ok(Array2::from_shape_vec((n, dim), data)?)
    }
}
