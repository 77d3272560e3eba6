//! Sampling of real transitions from the environment.
use crate::{
    base::{Env, Policy},
    batch::Transition,
    record::Record,
};
use anyhow::Result;
use ndarray::Array2;

/// Statistics of a finished path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStats {
    /// Sum of rewards.
    pub ret: f32,

    /// The number of steps.
    pub length: usize,
}

/// Steps the environment with a policy, one transition at a time.
///
/// A path ends when the environment terminates or after `max_path_length`
/// steps; the environment is reset lazily on the next call.
pub struct Sampler<E: Env> {
    env: E,
    max_path_length: usize,
    prev_obs: Option<Vec<f32>>,
    path_return: f32,
    path_length: usize,
    total_samples: usize,
    paths: Vec<PathStats>,
    last_path_return: Option<f32>,
    max_path_return: f32,
}

impl<E: Env> Sampler<E> {
    /// Creates a sampler.
    pub fn new(env: E, max_path_length: usize) -> Self {
        Self {
            env,
            max_path_length,
            prev_obs: None,
            path_return: 0.0,
            path_length: 0,
            total_samples: 0,
            paths: vec![],
            last_path_return: None,
            max_path_return: f32::NEG_INFINITY,
        }
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Total number of environment steps taken.
    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    /// Performs one environment step with the policy and returns the transition.
    pub fn sample<P: Policy + ?Sized>(&mut self, policy: &mut P) -> Result<Transition> {
        let obs = match self.prev_obs.take() {
            Some(obs) => obs,
            None => {
                self.path_return = 0.0;
                self.path_length = 0;
                self.env.reset()?
            }
        };

        let obs_arr = Array2::from_shape_vec((1, obs.len()), obs.clone())?;
        let act = policy.sample(&obs_arr, false)?.row(0).to_vec();
        let step = self.env.step(&act)?;

        self.total_samples += 1;
        self.path_length += 1;
        self.path_return += step.reward;

        if step.is_terminated || self.path_length >= self.max_path_length {
            let stats = PathStats {
                ret: self.path_return,
                length: self.path_length,
            };
            log::trace!("Path finished: {:?}", stats);
            self.last_path_return = Some(stats.ret);
            self.max_path_return = self.max_path_return.max(stats.ret);
            self.paths.push(stats);
        } else {
            self.prev_obs = Some(step.obs.clone());
        }

        Ok(Transition {
            obs,
            act,
            next_obs: step.obs,
            reward: step.reward,
            is_terminated: step.is_terminated as i8,
        })
    }

    /// Returns the paths finished since the last call and forgets them.
    pub fn take_paths(&mut self) -> Vec<PathStats> {
        std::mem::take(&mut self.paths)
    }

    /// Discards the current path so that the next call starts a new episode.
    pub fn terminate_path(&mut self) {
        self.prev_obs = None;
    }

    /// Diagnostics under `sampler/*`.
    pub fn diagnostics(&self) -> Record {
        let mut record = Record::empty();
        record.insert_scalar("sampler/total-samples", self.total_samples as f32);
        record.insert_scalar("sampler/episodes", self.paths.len() as f32);
        if let Some(r) = self.last_path_return {
            record.insert_scalar("sampler/last-path-return", r);
            record.insert_scalar("sampler/max-path-return", self.max_path_return);
        }
        record
    }
}
