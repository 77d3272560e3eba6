//! Soft actor-critic (SAC) agent.
mod base;
mod config;
pub use base::Sac;
pub use config::{ActionPrior, CriticMode, SacConfig};
