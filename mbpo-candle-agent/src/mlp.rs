//! Multilayer perceptrons.
mod base;
mod config;
mod gaussian;
use anyhow::Result;
pub use base::Mlp;
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
pub use config::{Activation, MlpConfig};
pub use gaussian::GaussianMlp;

/// Creates the hidden layers `in_dim -> units[0] -> ... -> units[n-1]`.
pub(crate) fn hidden_layers(vb: &VarBuilder, in_dim: usize, units: &[usize]) -> Result<Vec<Linear>> {
    let mut layers = Vec::with_capacity(units.len());
    let mut d = in_dim;
    for (i, &u) in units.iter().enumerate() {
        layers.push(linear(d, u, vb.pp(format!("ln{}", i)))?);
        d = u;
    }
    Ok(layers)
}

pub(crate) fn hidden_forward(xs: &Tensor, layers: &[Linear], act: &Activation) -> Result<Tensor> {
    let mut xs = xs.clone();
    for layer in layers {
        xs = act.forward(&layer.forward(&xs)?)?;
    }
    Ok(xs)
}
