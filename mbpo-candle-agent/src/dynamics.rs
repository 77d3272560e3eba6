//! Probabilistic ensemble dynamics model.
mod config;
mod ensemble;
mod scaler;
pub use config::EnsembleConfig;
pub use ensemble::EnsembleDynamics;
pub use scaler::StandardScaler;
