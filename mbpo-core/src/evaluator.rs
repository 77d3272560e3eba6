//! Evaluation of the policy on a separate environment.
use crate::{
    base::{Env, Policy},
    record::Record,
};
use anyhow::Result;
use ndarray::Array2;

/// Runs episodes with a deterministic policy and reports return statistics.
pub struct Evaluator<E: Env> {
    env: E,
    n_episodes: usize,
    max_path_length: usize,
}

impl<E: Env> Evaluator<E> {
    /// Constructs an evaluator.
    pub fn new(env: E, n_episodes: usize, max_path_length: usize) -> Self {
        Self {
            env,
            n_episodes,
            max_path_length,
        }
    }

    /// Evaluates the policy, returning `evaluation/*` scalars.
    ///
    /// Returns an empty record when no evaluation episode is configured.
    pub fn evaluate<P: Policy + ?Sized>(&mut self, policy: &mut P) -> Result<Record> {
        if self.n_episodes == 0 {
            return Ok(Record::empty());
        }

        let mut returns = Vec::with_capacity(self.n_episodes);
        let mut lengths = Vec::with_capacity(self.n_episodes);

        for _ in 0..self.n_episodes {
            let mut obs = self.env.reset()?;
            let mut ret = 0f32;
            let mut len = 0;
            loop {
                let obs_arr = Array2::from_shape_vec((1, obs.len()), obs)?;
                let act = policy.sample(&obs_arr, true)?.row(0).to_vec();
                let step = self.env.step(&act)?;
                ret += step.reward;
                len += 1;
                if step.is_terminated || len >= self.max_path_length {
                    break;
                }
                obs = step.obs;
            }
            returns.push(ret);
            lengths.push(len as f32);
        }

        let mut record = Record::empty();
        insert_stats(&mut record, "evaluation/return", &returns);
        insert_stats(&mut record, "evaluation/episode-length", &lengths);
        Ok(record)
    }
}

fn insert_stats(record: &mut Record, key: &str, vs: &[f32]) {
    let n = vs.len() as f32;
    let mean = vs.iter().sum::<f32>() / n;
    let std = (vs.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
    record.insert_scalar(format!("{}-average", key), mean);
    record.insert_scalar(format!("{}-std", key), std);
    record.insert_scalar(
        format!("{}-min", key),
        vs.iter().copied().fold(f32::INFINITY, f32::min),
    );
    record.insert_scalar(
        format!("{}-max", key),
        vs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    );
}
