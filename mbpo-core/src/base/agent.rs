//! Agent.
use super::Policy;
use crate::{batch::TrainingBatch, record::Record};
use anyhow::Result;
use ndarray::Array2;
use std::path::Path;

/// Represents a trainable actor-critic policy.
///
/// The agent owns its critics, target critics, policy and temperature. The
/// training loop hands it one [`TrainingBatch`] per training step, together with
/// the shared training-step counter; the agent decides which of its update
/// streams (critic, actor and temperature, target) run at that step.
pub trait Agent: Policy {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Prepares training, copying critic parameters to the target critics.
    fn init_training(&mut self) -> Result<()>;

    /// The number of training steps per environment step.
    fn n_train_repeat(&self) -> usize;

    /// The number of critic groups trained on disjoint batches, if the critics
    /// are group-diverse.
    fn num_critic_groups(&self) -> Option<usize>;

    /// Performs the updates scheduled at training step `t` and returns diagnostics.
    fn opt_with_record(&mut self, t: usize, batch: &TrainingBatch) -> Result<Record>;

    /// Q-values of every critic, `[n_critics, n]`, with critics ordered by group.
    fn q_values(&self, obs: &Array2<f32>, act: &Array2<f32>) -> Result<Array2<f32>>;

    /// Product of the policy standard deviations for each observation.
    fn policy_std(&self, obs: &Array2<f32>) -> Result<Vec<f32>>;

    /// Per-step diagnostics on a batch: `Q-avg`, `Q-std`, `alpha` and `policy/*`.
    fn diagnostics(&mut self, batch: &TrainingBatch) -> Result<Record>;

    /// Save the parameters of the agent in the given directory.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
