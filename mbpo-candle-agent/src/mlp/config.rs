use crate::util::OutDim;
use anyhow::Result;
use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// Activation function of hidden layers.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
pub enum Activation {
    /// `max(0, x)`.
    #[default]
    ReLU,

    /// `x * sigmoid(x)`.
    Swish,

    /// Identity.
    Identity,
}

impl Activation {
    /// Applies the activation.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(match self {
            Self::ReLU => xs.relu()?,
            Self::Swish => xs.silu()?,
            Self::Identity => xs.clone(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Mlp`](super::Mlp) and [`GaussianMlp`](super::GaussianMlp).
pub struct MlpConfig {
    pub(super) in_dim: usize,
    pub(super) units: Vec<usize>,
    pub(super) out_dim: usize,
    #[serde(default)]
    pub(super) activation: Activation,
    pub(super) activation_out: bool,
}

impl MlpConfig {
    /// Creates configuration of MLP with ReLU hidden layers.
    ///
    /// * `activation_out` - If `true`, the activation is also applied to the final layer.
    pub fn new(in_dim: usize, units: Vec<usize>, out_dim: usize, activation_out: bool) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
            activation: Activation::ReLU,
            activation_out,
        }
    }

    /// Sets the activation function.
    pub fn activation(mut self, v: Activation) -> Self {
        self.activation = v;
        self
    }
}

impl OutDim for MlpConfig {
    fn get_out_dim(&self) -> usize {
        self.out_dim
    }

    fn set_out_dim(&mut self, out_dim: usize) {
        self.out_dim = out_dim;
    }
}
