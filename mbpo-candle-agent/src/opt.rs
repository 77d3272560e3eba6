//! Optimizers of the actor, the critics, the temperature and the dynamics ensemble.
//!
//! The MBPO networks are trained with plain Adam. Weight decay of the dynamics
//! ensemble is part of its loss, so it is not applied here. AdamW is kept for
//! configurations that want decoupled decay on the policy or the critics.
use anyhow::Result;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use serde::{Deserialize, Serialize};

/// Optimizer of one group of variables, as written in agent and ensemble YAML.
///
/// ```yaml
/// Adam:
///   lr: 0.0003
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// Adam without weight decay.
    Adam {
        /// Learning rate.
        lr: f64,
    },

    /// AdamW. Omitted moments, epsilon and decay take candle's defaults.
    AdamW {
        lr: f64,
        #[serde(default = "adamw_beta1")]
        beta1: f64,
        #[serde(default = "adamw_beta2")]
        beta2: f64,
        #[serde(default = "adamw_eps")]
        eps: f64,
        #[serde(default = "adamw_weight_decay")]
        weight_decay: f64,
    },
}

fn adamw_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn adamw_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn adamw_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn adamw_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl Default for OptimizerConfig {
    /// Adam with the learning rate used by SAC and the dynamics ensemble.
    fn default() -> Self {
        Self::Adam { lr: 3e-4 }
    }
}

impl OptimizerConfig {
    /// Builds the optimizer over `vars`, usually `VarMap::all_vars()` of one network.
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        let opt = match *self {
            Self::Adam { lr } => Optimizer::Adam(Adam::new(
                vars,
                ParamsAdam {
                    lr,
                    ..Default::default()
                },
            )?),
            Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Optimizer::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    beta1,
                    beta2,
                    eps,
                    weight_decay,
                },
            )?),
        };
        Ok(opt)
    }

    pub fn lr(&self) -> f64 {
        match *self {
            Self::Adam { lr } | Self::AdamW { lr, .. } => lr,
        }
    }

    /// Replaces the learning rate, keeping the other parameters.
    pub fn learning_rate(mut self, v: f64) -> Self {
        match &mut self {
            Self::Adam { lr } | Self::AdamW { lr, .. } => *lr = v,
        }
        self
    }
}

/// An optimizer bound to the variables it was built over.
pub enum Optimizer {
    Adam(Adam),
    AdamW(AdamW),
}

impl Optimizer {
    /// Backpropagates `loss` and steps every bound variable once.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Adam(opt) => opt.backward_step(loss)?,
            Self::AdamW(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }
}
