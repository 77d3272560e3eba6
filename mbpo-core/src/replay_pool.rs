//! Fixed-capacity replay pools of transitions.
mod base;
mod config;
pub use base::SimpleReplayPool;
pub use config::ReplayPoolConfig;
