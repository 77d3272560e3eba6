use super::{hidden_forward, hidden_layers, MlpConfig};
use crate::model::SubModel1;
use anyhow::Result;
use candle_core::{Device, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

/// Multilayer perceptron with two heads: the mean and the log standard deviation
/// of a diagonal Gaussian, each of size `out_dim`.
pub struct GaussianMlp {
    config: MlpConfig,
    device: Device,
    layers: Vec<Linear>,
    mean: Linear,
    log_std: Linear,
}

impl SubModel1 for GaussianMlp {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = (Tensor, Tensor);

    fn forward(&self, xs: &Self::Input) -> Result<Self::Output> {
        let xs = xs.to_device(&self.device)?;
        let xs = hidden_forward(&xs, &self.layers, &self.config.activation)?;
        Ok((self.mean.forward(&xs)?, self.log_std.forward(&xs)?))
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let device = vb.device().clone();
        let layers = hidden_layers(&vb.pp("mlp"), config.in_dim, &config.units)?;
        let last = config.units.last().copied().unwrap_or(config.in_dim);
        let mean = linear(last, config.out_dim, vb.pp("mean"))?;
        let log_std = linear(last, config.out_dim, vb.pp("log_std"))?;

        Ok(Self {
            config,
            device,
            layers,
            mean,
            log_std,
        })
    }
}
