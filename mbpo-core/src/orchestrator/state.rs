/// Counters of the training loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingState {
    /// Current epoch.
    pub epoch: usize,

    /// Environment steps in the current epoch.
    pub timestep: usize,

    /// Environment steps since the start of training, excluding initial exploration.
    pub total_timestep: usize,

    /// Training steps since the start of training; the clock of the update streams.
    pub num_train_steps: usize,

    /// Training steps in the current epoch.
    pub train_steps_this_epoch: usize,

    /// Model refit attempts, including the ones skipped by `model_train_slower`.
    pub model_train_attempts: usize,

    /// Current rollout length.
    pub rollout_length: usize,

    /// `true` once the targets were initialized and the initial exploration ran.
    pub training_started: bool,
}
