//! Entropy coefficient of SAC.
use crate::opt::{Optimizer, OptimizerConfig};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{init::Init, VarBuilder, VarMap};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Target entropy of the policy.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub enum TargetEntropy {
    /// `-act_dim`.
    #[default]
    Auto,

    /// A given value.
    Value(f64),

    /// The coefficient is kept at its initial value.
    Disabled,
}

impl TargetEntropy {
    /// Resolves the target for the given action dimension, `None` if disabled.
    pub fn resolve(&self, act_dim: usize) -> Option<f64> {
        match self {
            Self::Auto => Some(-(act_dim as f64)),
            Self::Value(v) => Some(*v),
            Self::Disabled => None,
        }
    }
}

/// The entropy coefficient (temperature) of SAC.
///
/// `log(alpha)` is the variable. With a target entropy it is tuned by minimizing
/// `-log_alpha * stopgrad(log_pi + target_entropy)`.
pub struct EntCoef {
    varmap: VarMap,
    log_alpha: Tensor,
    target_entropy: Option<f64>,
    opt: Option<Optimizer>,
}

impl EntCoef {
    /// Constructs an instance of `EntCoef`.
    pub fn new(
        init_alpha: f64,
        target_entropy: Option<f64>,
        opt_config: OptimizerConfig,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let log_alpha = vb.get_with_hints(1, "log_alpha", Init::Const(init_alpha.ln()))?;
        let opt = match target_entropy {
            Some(_) => Some(opt_config.build(varmap.all_vars())?),
            None => None,
        };

        Ok(Self {
            varmap,
            log_alpha,
            target_entropy,
            opt,
        })
    }

    /// Returns the entropy coefficient, detached from the graph, shape `[1]`.
    pub fn alpha(&self) -> Result<Tensor> {
        Ok(self.log_alpha.detach().exp()?)
    }

    /// Returns the entropy coefficient as a scalar.
    pub fn alpha_scalar(&self) -> Result<f32> {
        Ok(self.alpha()?.to_vec1::<f32>()?[0])
    }

    /// Updates the coefficient given log probabilities of sampled actions.
    ///
    /// Does nothing without a target entropy.
    pub fn update(&mut self, logp: &Tensor) -> Result<()> {
        if let (Some(target_entropy), Some(opt)) = (self.target_entropy, &mut self.opt) {
            let target = logp.affine(1.0, target_entropy)?.detach();
            let loss = target.broadcast_mul(&self.log_alpha)?.mean_all()?.neg()?;
            opt.backward_step(&loss)?;
        }
        Ok(())
    }

    /// Saves the parameter into a file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save entropy coefficient to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the parameter from a file.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load entropy coefficient from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_target_entropy() {
        assert_eq!(TargetEntropy::Auto.resolve(3), Some(-3.0));
        assert_eq!(TargetEntropy::Value(-1.0).resolve(3), Some(-1.0));
        assert_eq!(TargetEntropy::Disabled.resolve(3), None);
    }

    #[test]
    fn test_alpha_increases_when_entropy_is_low() -> Result<()> {
        let config = OptimizerConfig::Adam { lr: 0.1 };
        let mut ent_coef = EntCoef::new(1.0, Some(-1.0), config, &Device::Cpu)?;
        // log_pi + target > 0 means the policy entropy is below the target
        let logp = Tensor::from_slice(&[2.0f32, 3.0], (2,), &Device::Cpu)?;
        ent_coef.update(&logp)?;
        assert!(ent_coef.alpha_scalar()? > 1.0);
        Ok(())
    }

    #[test]
    fn test_disabled_keeps_alpha() -> Result<()> {
        let mut ent_coef = EntCoef::new(0.2, None, OptimizerConfig::default(), &Device::Cpu)?;
        let logp = Tensor::from_slice(&[2.0f32, 3.0], (2,), &Device::Cpu)?;
        ent_coef.update(&logp)?;
        assert!((ent_coef.alpha_scalar()? - 0.2).abs() < 1e-6);
        Ok(())
    }
}
