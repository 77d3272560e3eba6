//! Model-based policy optimization (MBPO) in Rust.
//!
//! MBPO consists of the following crates:
//!
//! * [mbpo-core](mbpo_core) provides the traits for environments, termination
//!   functions, agents and dynamics models, the replay pools, the rollout
//!   scheduler and [`Mbpo`](mbpo_core::Mbpo), the epoch loop tying them together.
//!   It does not depend on any deep learning backend.
//! * [mbpo-candle-agent](mbpo_candle_agent) implements the SAC agent and the
//!   probabilistic ensemble dynamics model with
//!   [candle](https://crates.io/crates/candle-core).
//! * [mbpo-tensorboard](mbpo_tensorboard) has `TensorboardRecorder` to write
//!   the per-epoch diagnostics, based on
//!   [tensorboard-rs](https://crates.io/crates/tensorboard-rs).
//!
//! This crate re-exports them and adds the [`ContinuousGrid`](env::ContinuousGrid)
//! environment and termination functions of common locomotion tasks.
pub mod env;
pub mod termination;

pub use mbpo_candle_agent as candle_agent;
pub use mbpo_core as core;
pub use mbpo_tensorboard as tensorboard;
