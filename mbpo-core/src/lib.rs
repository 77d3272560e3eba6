#![warn(missing_docs)]
//! Core of model-based policy optimization (MBPO).
//!
//! This crate is independent of any neural network backend. It provides the
//! abstractions an MBPO run is built from and the training loop driving them:
//!
//! * [`Env`], [`TerminationFn`], [`Policy`], [`Agent`] and [`DynamicsModel`] are the
//!   seams to environments, actor-critic agents and ensemble dynamics models.
//! * [`SimpleReplayPool`](replay_pool::SimpleReplayPool) stores real and
//!   model-generated transitions.
//! * [`RolloutSchedule`](rollout::RolloutSchedule) and
//!   [`UpdateSchedule`](update_schedule::UpdateSchedule) clock rollouts and updates.
//! * [`SyntheticEnv`](synthetic_env::SyntheticEnv) steps batches of particles
//!   through the learned model.
//! * [`Mbpo`] sequences model fitting, rollouts, environment sampling and updates.
pub mod batch;
pub mod checkpoint;
pub mod dummy;
pub mod error;
pub mod evaluator;
pub mod exploration;
pub mod record;
pub mod replay_pool;
pub mod rollout;
pub mod sampler;
pub mod synthetic_env;
pub mod update_schedule;

mod base;
pub use base::{
    select_elites, Agent, BoxSpace, DynamicsModel, EnsemblePrediction, Env, EnvStep,
    ModelTrainParams, NeverTerminate, Policy, TerminationFn, UniformPolicy,
};

mod config;
pub use config::MbpoConfig;

mod orchestrator;
pub use orchestrator::{Mbpo, TrainingState};
