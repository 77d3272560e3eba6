//! Environments.
mod continuous_grid;
pub use continuous_grid::{ContinuousGrid, ContinuousGridConfig, ContinuousGridTermination};
