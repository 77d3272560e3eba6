//! Core abstractions.
mod agent;
mod dynamics;
mod env;
mod policy;
mod termination;
pub use agent::Agent;
pub use dynamics::{select_elites, DynamicsModel, EnsemblePrediction, ModelTrainParams};
pub use env::{BoxSpace, Env, EnvStep};
pub use policy::{Policy, UniformPolicy};
pub use termination::{NeverTerminate, TerminationFn};
