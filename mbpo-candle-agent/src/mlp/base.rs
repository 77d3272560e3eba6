use super::{hidden_forward, hidden_layers, MlpConfig};
use crate::model::{SubModel1, SubModel2};
use anyhow::Result;
use candle_core::{Device, Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// Multilayer perceptron.
///
/// As a [`SubModel2`] it concatenates its two inputs along the last dimension,
/// which is how critics take observations and actions.
pub struct Mlp {
    config: MlpConfig,
    device: Device,
    layers: Vec<Linear>,
    out: Linear,
}

impl Mlp {
    fn build_(vb: VarBuilder, config: MlpConfig) -> Result<Self> {
        let device = vb.device().clone();
        let vb = vb.pp("mlp");
        let layers = hidden_layers(&vb, config.in_dim, &config.units)?;
        let last = config.units.last().copied().unwrap_or(config.in_dim);
        let out = linear(last, config.out_dim, vb.pp(format!("ln{}", config.units.len())))?;

        Ok(Self {
            config,
            device,
            layers,
            out,
        })
    }

    fn forward_(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = hidden_forward(xs, &self.layers, &self.config.activation)?;
        let xs = self.out.forward(&xs)?;
        match self.config.activation_out {
            false => Ok(xs),
            true => self.config.activation.forward(&xs),
        }
    }
}

impl SubModel1 for Mlp {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        self.forward_(&xs.to_device(&self.device)?)
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        Self::build_(vb, config)
    }
}

impl SubModel2 for Mlp {
    type Config = MlpConfig;
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Output = Tensor;

    fn forward(&self, input1: &Self::Input1, input2: &Self::Input2) -> Result<Tensor> {
        let input1 = input1.to_device(&self.device)?;
        let input2 = input2.to_device(&self.device)?;
        let input = Tensor::cat(&[input1, input2], D::Minus1)?;
        self.forward_(&input)
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        Self::build_(vb, config)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_critic_shape_and_names() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu).set_prefix("critic0");
        let q = <Mlp as SubModel2>::build(vb, MlpConfig::new(5, vec![8, 8], 1, false))?;
        let obs = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        let act = Tensor::zeros((4, 2), DType::F32, &Device::Cpu)?;
        assert_eq!(SubModel2::forward(&q, &obs, &act)?.dims(), &[4, 1]);

        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("critic0.mlp.ln0.weight"));
        assert!(data.contains_key("critic0.mlp.ln2.bias"));
        assert_eq!(data.len(), 6);
        Ok(())
    }
}
