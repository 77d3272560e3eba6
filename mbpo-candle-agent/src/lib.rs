//! SAC agent and ensemble dynamics model for MBPO, implemented with
//! [candle](https://crates.io/crates/candle-core).
//!
//! * [`Sac`](sac::Sac) implements [`mbpo_core::Agent`] with a tanh-squashed
//!   Gaussian actor, an ensemble of critics with REDQ-style target subsets and an
//!   automatically tuned entropy coefficient.
//! * [`EnsembleDynamics`](dynamics::EnsembleDynamics) implements
//!   [`mbpo_core::DynamicsModel`] with a bootstrap ensemble of probabilistic MLPs.
pub mod actor;
pub mod critic;
pub mod dynamics;
pub mod ent_coef;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod sac;
pub mod tensor;
pub mod util;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq, Default)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    #[default]
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl Device {
    /// Creates the corresponding candle device.
    pub fn to_candle(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}
