//! Actor with a tanh-squashed Gaussian policy.
use crate::{
    model::SubModel1,
    opt::{Optimizer, OptimizerConfig},
    util::{normal_logp, softplus, OutDim},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use mbpo_core::BoxSpace;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`GaussianActor`].
pub struct GaussianActorConfig<P: OutDim> {
    /// Configuration of the policy network.
    pub policy_config: Option<P>,

    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,

    /// Lower bound of the log standard deviation.
    pub min_log_std: f64,

    /// Upper bound of the log standard deviation.
    pub max_log_std: f64,

    /// Box the squashed actions are mapped onto. `None` keeps `[-1, 1]`.
    pub action_space: Option<BoxSpace>,
}

impl<P: OutDim> Default for GaussianActorConfig<P> {
    fn default() -> Self {
        Self {
            policy_config: None,
            opt_config: OptimizerConfig::Adam { lr: 0.0003 },
            min_log_std: -20.0,
            max_log_std: 2.0,
            action_space: None,
        }
    }
}

impl<P> GaussianActorConfig<P>
where
    P: DeserializeOwned + Serialize + OutDim,
{
    /// Sets the minimum value of log std.
    pub fn min_log_std(mut self, v: f64) -> Self {
        self.min_log_std = v;
        self
    }

    /// Sets the maximum value of log std.
    pub fn max_log_std(mut self, v: f64) -> Self {
        self.max_log_std = v;
        self
    }

    /// Sets configurations for policy function.
    pub fn policy_config(mut self, v: P) -> Self {
        self.policy_config = Some(v);
        self
    }

    /// Sets output dimension of the model.
    pub fn out_dim(mut self, v: usize) -> Self {
        if let Some(pi_config) = &mut self.policy_config {
            pi_config.set_out_dim(v);
        }
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the box actions are mapped onto.
    pub fn action_space(mut self, v: BoxSpace) -> Self {
        self.action_space = Some(v);
        self
    }

    /// Loads [`GaussianActorConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`GaussianActorConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Reparameterized sample of the policy.
pub struct PolicySample {
    /// Squashed action in `[-1, 1]`, `[n, act_dim]`.
    pub squashed: Tensor,

    /// Log probability of the squashed action, `[n]`.
    pub log_p: Tensor,

    /// Clamped log standard deviation, `[n, act_dim]`.
    pub log_std: Tensor,
}

/// Actor with a tanh-squashed Gaussian policy.
///
/// Log probabilities include the change of variables of `tanh`. Squashed actions
/// are mapped affinely onto the configured action box before they reach the
/// environment or the critics.
pub struct GaussianActor<P>
where
    P: SubModel1<Input = Tensor, Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    device: Device,
    varmap: VarMap,
    out_dim: usize,
    policy: P,
    opt: Optimizer,
    min_log_std: f64,
    max_log_std: f64,

    // Affine map from [-1, 1] to the action box, [1, act_dim]
    scale: Tensor,
    bias: Tensor,
}

impl<P> GaussianActor<P>
where
    P: SubModel1<Input = Tensor, Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    /// Constructs [`GaussianActor`].
    pub fn build(config: GaussianActorConfig<P::Config>, device: Device) -> Result<Self> {
        let policy_config = config.policy_config.context("policy_config is not set.")?;
        let out_dim = policy_config.get_out_dim();
        let varmap = VarMap::new();
        let policy = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device).set_prefix("actor");
            P::build(vb, policy_config)?
        };
        let opt = config.opt_config.build(varmap.all_vars())?;
        let space = config
            .action_space
            .unwrap_or_else(|| BoxSpace::uniform_bounds(out_dim, -1.0, 1.0));
        let scale: Vec<f32> = space
            .low
            .iter()
            .zip(&space.high)
            .map(|(l, h)| (h - l) / 2.0)
            .collect();
        let bias: Vec<f32> = space
            .low
            .iter()
            .zip(&space.high)
            .map(|(l, h)| (h + l) / 2.0)
            .collect();

        Ok(Self {
            scale: Tensor::from_vec(scale, (1, out_dim), &device)?,
            bias: Tensor::from_vec(bias, (1, out_dim), &device)?,
            device,
            out_dim,
            varmap,
            opt,
            policy,
            min_log_std: config.min_log_std,
            max_log_std: config.max_log_std,
        })
    }

    /// Returns the mean and the clamped log std of the pre-squash Gaussian.
    ///
    /// The shape of both tensors is `(batch_size, action_dimension)`.
    pub fn forward(&self, obs: &Tensor) -> Result<(Tensor, Tensor)> {
        let (mean, lstd) = self.policy.forward(obs)?;
        debug_assert_eq!(mean.dims()[1], self.out_dim);
        let lstd = lstd.clamp(self.min_log_std, self.max_log_std)?;
        Ok((mean, lstd))
    }

    /// Draws reparameterized actions with their log probabilities.
    pub fn sample_with_logp(&self, obs: &Tensor) -> Result<PolicySample> {
        let (mean, log_std) = self.forward(obs)?;
        let z = mean.randn_like(0., 1.)?;
        let u = (&mean + (log_std.exp()? * &z)?)?;
        let squashed = u.tanh()?;

        // log N(u; mean, std) - sum log(1 - tanh(u)^2)
        let log_p = ((normal_logp(&z)? - log_std.sum(D::Minus1)?)? - log_det_tanh(&u)?)?;

        Ok(PolicySample {
            squashed,
            log_p,
            log_std,
        })
    }

    /// Samples actions in the action box.
    ///
    /// If `deterministic` is `true`, the squashed mean is returned.
    pub fn sample(&self, obs: &Tensor, deterministic: bool) -> Result<Tensor> {
        let (mean, lstd) = self.forward(obs)?;
        let u = match deterministic {
            true => mean,
            false => (&mean + (lstd.exp()? * mean.randn_like(0., 1.)?)?)?,
        };
        self.to_action_space(&u.tanh()?)
    }

    /// Maps squashed actions onto the action box.
    pub fn to_action_space(&self, squashed: &Tensor) -> Result<Tensor> {
        Ok(squashed
            .broadcast_mul(&self.scale)?
            .broadcast_add(&self.bias)?)
    }

    /// Does an optimization step given a loss.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.opt.backward_step(loss)
    }

    /// The device the actor lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Saves variables to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path.as_ref())?;
        info!("Save actor parameters to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads variables from `path`.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(path.as_ref())?;
        info!("Load actor parameters from {:?}", path.as_ref());
        Ok(())
    }
}

/// `sum log(1 - tanh(u)^2)` over the last dimension, computed as
/// `2 * (log 2 - u - softplus(-2u))`.
fn log_det_tanh(u: &Tensor) -> Result<Tensor> {
    let t = (softplus(&u.affine(-2.0, 0.0)?)? + u)?;
    Ok(t.affine(-2.0, 2.0 * 2f64.ln())?.sum(D::Minus1)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::{GaussianMlp, MlpConfig};

    fn actor(space: Option<BoxSpace>) -> Result<GaussianActor<GaussianMlp>> {
        let mut config =
            GaussianActorConfig::default().policy_config(MlpConfig::new(3, vec![16], 2, false));
        if let Some(space) = space {
            config = config.action_space(space);
        }
        GaussianActor::build(config, Device::Cpu)
    }

    #[test]
    fn test_log_det_tanh() -> Result<()> {
        let u = Tensor::from_slice(&[0.3f32, -1.2], (1, 2), &Device::Cpu)?;
        let expected: f32 = [0.3f32, -1.2]
            .iter()
            .map(|x| (1.0 - x.tanh().powi(2)).ln())
            .sum();
        let v = log_det_tanh(&u)?.to_vec1::<f32>()?;
        assert!((v[0] - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_sample_shapes() -> Result<()> {
        let actor = actor(None)?;
        let obs = Tensor::randn(0f32, 1f32, (5, 3), &Device::Cpu)?;
        let s = actor.sample_with_logp(&obs)?;
        assert_eq!(s.squashed.dims(), &[5, 2]);
        assert_eq!(s.log_p.dims(), &[5]);
        let a = s.squashed.flatten_all()?.to_vec1::<f32>()?;
        assert!(a.iter().all(|x| (-1.0..=1.0).contains(x)));
        Ok(())
    }

    #[test]
    fn test_actions_in_box() -> Result<()> {
        let space = BoxSpace {
            low: vec![-3.0, 0.0],
            high: vec![3.0, 1.0],
        };
        let actor = actor(Some(space))?;
        let obs = Tensor::randn(0f32, 1f32, (64, 3), &Device::Cpu)?;
        let a = actor.sample(&obs, false)?.to_vec2::<f32>()?;
        assert!(a.iter().all(|r| (-3.0..=3.0).contains(&r[0])));
        assert!(a.iter().all(|r| (0.0..=1.0).contains(&r[1])));

        let zero = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        assert_eq!(actor.to_action_space(&zero)?.to_vec2::<f32>()?, vec![vec![0.0, 0.5]]);
        Ok(())
    }
}
