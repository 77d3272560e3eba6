//! Ensemble of critics with target networks.
use crate::{
    model::SubModel2,
    opt::{Optimizer, OptimizerConfig},
    util::track_with_replace_substring,
};
use anyhow::{Context, Result};
use candle_core::{DType::F32, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`MultiCritic`].
pub struct MultiCriticConfig<Q> {
    /// The number of critic networks.
    pub n_nets: usize,

    /// Configuration of critic networks.
    pub q_config: Option<Q>,

    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,

    /// Soft update coefficient.
    pub tau: f64,
}

impl<Q> Default for MultiCriticConfig<Q> {
    fn default() -> Self {
        Self {
            n_nets: 2,
            q_config: None,
            opt_config: OptimizerConfig::Adam { lr: 0.0003 },
            tau: 0.005,
        }
    }
}

impl<Q> MultiCriticConfig<Q>
where
    Q: DeserializeOwned + Serialize,
{
    /// Sets the number of critic networks.
    pub fn n_nets(mut self, v: usize) -> Self {
        self.n_nets = v;
        self
    }

    /// Sets configurations for action-value function.
    pub fn q_config(mut self, v: Q) -> Self {
        self.q_config = Some(v);
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets soft update parameter tau.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Constructs [`MultiCriticConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MultiCriticConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Ensemble of action-value functions and their target networks.
///
/// Critic `i` lives under the prefix `critic{i}` of one [`VarMap`] and its target
/// under `critic_tgt{i}` of another. A single optimizer updates all critics, so a
/// loss summed over critics trains each of them on its own term.
pub struct MultiCritic<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize,
{
    tau: f64,
    varmap: VarMap,
    varmap_tgt: VarMap,
    qs: Vec<Q>,
    qs_tgt: Vec<Q>,
    opt: Optimizer,
}

impl<Q> MultiCritic<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`MultiCritic`]. Targets start as copies of the critics.
    pub fn build(config: MultiCriticConfig<Q::Config>, device: Device) -> Result<Self> {
        let q_config = config.q_config.context("q_config is not set.")?;
        let (varmap, qs) = Self::build_networks(&q_config, &device, config.n_nets, "critic")?;
        let (varmap_tgt, qs_tgt) =
            Self::build_networks(&q_config, &device, config.n_nets, "critic_tgt")?;
        let opt = config.opt_config.build(varmap.all_vars())?;
        track_with_replace_substring(&varmap_tgt, &varmap, 1.0, ("critic", "critic_tgt"))?;

        Ok(Self {
            tau: config.tau,
            varmap,
            varmap_tgt,
            qs,
            qs_tgt,
            opt,
        })
    }

    fn build_networks(
        q_config: &Q::Config,
        device: &Device,
        n_nets: usize,
        prefix: &str,
    ) -> Result<(VarMap, Vec<Q>)> {
        let varmap = VarMap::new();
        let qs = (0..n_nets)
            .map(|ix| {
                let vb = VarBuilder::from_varmap(&varmap, F32, device)
                    .set_prefix(format!("{}{}", prefix, ix));
                Q::build(vb, q_config.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((varmap, qs))
    }
}

impl<Q> MultiCritic<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize,
{
    /// The number of critics.
    pub fn n_nets(&self) -> usize {
        self.qs.len()
    }

    /// Action values of critic `i`, `[n]`.
    pub fn qval(&self, i: usize, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        Ok(self.qs[i].forward(obs, act)?.squeeze(D::Minus1)?)
    }

    /// Action values of all critics, each `[n]`.
    pub fn qvals(&self, obs: &Tensor, act: &Tensor) -> Result<Vec<Tensor>> {
        (0..self.qs.len()).map(|i| self.qval(i, obs, act)).collect()
    }

    /// Elementwise minimum over the target critics in `subset`, `[n]`.
    pub fn qvals_min_tgt(&self, subset: &[usize], obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        let qvals = subset
            .iter()
            .map(|&i| Ok(self.qs_tgt[i].forward(obs, act)?.squeeze(D::Minus1)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&qvals, 0)?.min(0)?)
    }

    /// Moves targets towards the critics by the configured `tau`.
    pub fn soft_update(&mut self) -> Result<()> {
        self.update_target(self.tau)
    }

    /// `target = tau * source + (1 - tau) * target`.
    pub fn update_target(&mut self, tau: f64) -> Result<()> {
        track_with_replace_substring(&self.varmap_tgt, &self.varmap, tau, ("critic", "critic_tgt"))
    }

    /// Backward step for all variables in critic networks.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.opt.backward_step(loss)
    }

    /// Saves critics and targets into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let path = dir.as_ref().join("critic.safetensors");
        self.varmap.save(&path)?;
        let path_tgt = dir.as_ref().join("critic_tgt.safetensors");
        self.varmap_tgt.save(&path_tgt)?;
        info!("Save critics to {:?}", dir.as_ref());
        Ok(())
    }

    /// Loads critics and targets from `dir`.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(dir.as_ref().join("critic.safetensors"))?;
        self.varmap_tgt
            .load(dir.as_ref().join("critic_tgt.safetensors"))?;
        info!("Load critics from {:?}", dir.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::{Mlp, MlpConfig};

    fn critics(tau: f64) -> Result<MultiCritic<Mlp>> {
        let config = MultiCriticConfig::default()
            .n_nets(3)
            .tau(tau)
            .q_config(MlpConfig::new(3, vec![8], 1, false));
        MultiCritic::build(config, Device::Cpu)
    }

    fn inputs() -> Result<(Tensor, Tensor)> {
        Ok((
            Tensor::randn(0f32, 1f32, (6, 2), &Device::Cpu)?,
            Tensor::randn(0f32, 1f32, (6, 1), &Device::Cpu)?,
        ))
    }

    #[test]
    fn test_targets_start_as_copies() -> Result<()> {
        let critics = critics(0.005)?;
        let (obs, act) = inputs()?;
        for i in 0..3 {
            let q = critics.qval(i, &obs, &act)?.to_vec1::<f32>()?;
            let q_tgt = critics.qvals_min_tgt(&[i], &obs, &act)?.to_vec1::<f32>()?;
            assert_eq!(q, q_tgt);
        }
        Ok(())
    }

    #[test]
    fn test_min_over_subset() -> Result<()> {
        let critics = critics(0.005)?;
        let (obs, act) = inputs()?;
        let q0 = critics.qval(0, &obs, &act)?.to_vec1::<f32>()?;
        let q2 = critics.qval(2, &obs, &act)?.to_vec1::<f32>()?;
        let m = critics.qvals_min_tgt(&[0, 2], &obs, &act)?.to_vec1::<f32>()?;
        for k in 0..6 {
            assert_eq!(m[k], q0[k].min(q2[k]));
        }
        Ok(())
    }

    #[test]
    fn test_soft_update_tau_zero_keeps_targets() -> Result<()> {
        let mut critics = critics(0.0)?;
        let (obs, act) = inputs()?;
        let before = critics.qvals_min_tgt(&[1], &obs, &act)?.to_vec1::<f32>()?;

        let loss = Tensor::stack(&critics.qvals(&obs, &act)?, 0)?.sqr()?.mean_all()?;
        critics.backward_step(&loss)?;
        critics.soft_update()?;
        let after = critics.qvals_min_tgt(&[1], &obs, &act)?.to_vec1::<f32>()?;
        assert_eq!(before, after);

        critics.update_target(1.0)?;
        let copied = critics.qvals_min_tgt(&[1], &obs, &act)?.to_vec1::<f32>()?;
        assert_eq!(copied, critics.qval(1, &obs, &act)?.to_vec1::<f32>()?);
        Ok(())
    }
}
