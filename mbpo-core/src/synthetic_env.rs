//! A batched environment backed by the learned dynamics model.
use crate::base::{DynamicsModel, TerminationFn};
use anyhow::Result;
use ndarray::{concatenate, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// Outcome of a batched model step.
#[derive(Debug, Clone)]
pub struct SyntheticStep {
    /// Predicted next observations, `[n, obs_dim]`.
    pub next_obs: Array2<f32>,

    /// Predicted rewards.
    pub reward: Vec<f32>,

    /// Termination flags from the termination function.
    pub is_terminated: Vec<i8>,

    /// Per-sample variance of the elite means, averaged over outputs.
    pub epistemic: Vec<f32>,

    /// Per-sample predicted variance, averaged over elites and outputs.
    pub aleatoric: Vec<f32>,
}

/// Exposes the dynamics model as a batched step function for rollouts.
///
/// Each particle is advanced by an elite drawn uniformly at random. Unless the
/// step is deterministic, Gaussian noise with the predicted variance is added to
/// the predicted mean.
pub struct SyntheticEnv<M, T> {
    model: M,
    termination_fn: T,
    rng: StdRng,
}

impl<M, T> SyntheticEnv<M, T>
where
    M: DynamicsModel,
    T: TerminationFn,
{
    /// Wraps a model and a termination function.
    pub fn new(model: M, termination_fn: T, seed: u64) -> Self {
        Self {
            model,
            termination_fn,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The wrapped model, mutably, for refitting.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Advances every particle by one model step.
    pub fn step(
        &mut self,
        obs: &Array2<f32>,
        act: &Array2<f32>,
        deterministic: bool,
    ) -> Result<SyntheticStep> {
        let inputs = concatenate(Axis(1), &[obs.view(), act.view()])?;
        let pred = self.model.predict(&inputs)?;
        let n_elites = pred.n_elites();
        let n = obs.nrows();
        let obs_dim = obs.ncols();
        let out_dim = obs_dim + 1;

        let mut reward = Vec::with_capacity(n);
        let mut next_obs = Array2::<f32>::zeros((n, obs_dim));
        let mut epistemic = Vec::with_capacity(n);
        let mut aleatoric = Vec::with_capacity(n);

        for i in 0..n {
            let e = self.rng.gen_range(0..n_elites);
            for d in 0..out_dim {
                let mut v = pred.mean[[e, i, d]];
                if !deterministic {
                    let z: f32 = StandardNormal.sample(&mut self.rng);
                    v += z * pred.var[[e, i, d]].max(0.0).sqrt();
                }
                if d == 0 {
                    reward.push(v);
                } else {
                    next_obs[[i, d - 1]] = obs[[i, d - 1]] + v;
                }
            }

            let mut ep = 0f32;
            let mut al = 0f32;
            for d in 0..out_dim {
                let m = (0..n_elites).map(|k| pred.mean[[k, i, d]]).sum::<f32>() / n_elites as f32;
                ep += (0..n_elites)
                    .map(|k| (pred.mean[[k, i, d]] - m).powi(2))
                    .sum::<f32>()
                    / n_elites as f32;
                al += (0..n_elites).map(|k| pred.var[[k, i, d]]).sum::<f32>() / n_elites as f32;
            }
            epistemic.push(ep / out_dim as f32);
            aleatoric.push(al / out_dim as f32);
        }

        let is_terminated = self.termination_fn.is_terminated(obs, act, &next_obs);

        Ok(SyntheticStep {
            next_obs,
            reward,
            is_terminated,
            epistemic,
            aleatoric,
        })
    }
}
