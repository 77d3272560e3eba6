//! Typed transition batches.
use crate::error::MbpoError;
use anyhow::Result;
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

/// A single transition observed in an environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Observation before the step.
    pub obs: Vec<f32>,

    /// Action taken.
    pub act: Vec<f32>,

    /// Observation after the step.
    pub next_obs: Vec<f32>,

    /// Reward.
    pub reward: f32,

    /// `1` if the episode terminated at this step.
    pub is_terminated: i8,
}

/// A batch of transitions stored column-wise.
///
/// Rows of `obs`, `act` and `next_obs` and elements of `reward` and `is_terminated`
/// correspond to each other.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionBatch {
    /// Observations, `[n, obs_dim]`.
    pub obs: Array2<f32>,

    /// Actions, `[n, act_dim]`.
    pub act: Array2<f32>,

    /// Next observations, `[n, obs_dim]`.
    pub next_obs: Array2<f32>,

    /// Rewards, length `n`.
    pub reward: Vec<f32>,

    /// Termination flags, length `n`.
    pub is_terminated: Vec<i8>,
}

impl TransitionBatch {
    /// Creates a batch, checking that all columns have the same number of rows.
    pub fn new(
        obs: Array2<f32>,
        act: Array2<f32>,
        next_obs: Array2<f32>,
        reward: Vec<f32>,
        is_terminated: Vec<i8>,
    ) -> Result<Self> {
        let n = obs.nrows();
        if act.nrows() != n
            || next_obs.nrows() != n
            || reward.len() != n
            || is_terminated.len() != n
        {
            return Err(MbpoError::ShapeMismatch(format!(
                "obs {}, act {}, next_obs {}, reward {}, is_terminated {}",
                n,
                act.nrows(),
                next_obs.nrows(),
                reward.len(),
                is_terminated.len()
            ))
            .into());
        }
        if next_obs.ncols() != obs.ncols() {
            return Err(MbpoError::ShapeMismatch(format!(
                "obs_dim {} != next_obs_dim {}",
                obs.ncols(),
                next_obs.ncols()
            ))
            .into());
        }
        Ok(Self {
            obs,
            act,
            next_obs,
            reward,
            is_terminated,
        })
    }

    /// Creates an empty batch with the given dimensions.
    pub fn empty(obs_dim: usize, act_dim: usize) -> Self {
        Self {
            obs: Array2::zeros((0, obs_dim)),
            act: Array2::zeros((0, act_dim)),
            next_obs: Array2::zeros((0, obs_dim)),
            reward: vec![],
            is_terminated: vec![],
        }
    }

    /// Stacks single transitions into a batch.
    pub fn from_transitions(
        transitions: &[Transition],
        obs_dim: usize,
        act_dim: usize,
    ) -> Result<Self> {
        let n = transitions.len();
        let mut obs = Vec::with_capacity(n * obs_dim);
        let mut act = Vec::with_capacity(n * act_dim);
        let mut next_obs = Vec::with_capacity(n * obs_dim);
        for t in transitions.iter() {
            obs.extend_from_slice(&t.obs);
            act.extend_from_slice(&t.act);
            next_obs.extend_from_slice(&t.next_obs);
        }
        Self::new(
            Array2::from_shape_vec((n, obs_dim), obs)?,
            Array2::from_shape_vec((n, act_dim), act)?,
            Array2::from_shape_vec((n, obs_dim), next_obs)?,
            transitions.iter().map(|t| t.reward).collect(),
            transitions.iter().map(|t| t.is_terminated).collect(),
        )
    }

    /// The number of transitions.
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// Returns `true` if the batch holds no transition.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }

    /// Dimension of observations.
    pub fn obs_dim(&self) -> usize {
        self.obs.ncols()
    }

    /// Dimension of actions.
    pub fn act_dim(&self) -> usize {
        self.act.ncols()
    }

    /// Concatenates batches along rows, in the given order.
    pub fn concat(batches: &[&TransitionBatch]) -> Result<Self> {
        let first = match batches.first() {
            Some(b) => b,
            None => return Err(MbpoError::ShapeMismatch("no batch to concatenate".into()).into()),
        };
        if batches.len() == 1 {
            return Ok((*first).clone());
        }
        let obs: Vec<ArrayView2<f32>> = batches.iter().map(|b| b.obs.view()).collect();
        let act: Vec<ArrayView2<f32>> = batches.iter().map(|b| b.act.view()).collect();
        let next_obs: Vec<ArrayView2<f32>> = batches.iter().map(|b| b.next_obs.view()).collect();
        Self::new(
            concatenate(Axis(0), &obs)?,
            concatenate(Axis(0), &act)?,
            concatenate(Axis(0), &next_obs)?,
            batches.iter().flat_map(|b| b.reward.iter().copied()).collect(),
            batches
                .iter()
                .flat_map(|b| b.is_terminated.iter().copied())
                .collect(),
        )
    }

    /// Returns the rows at the given indices.
    pub fn select(&self, ixs: &[usize]) -> Self {
        Self {
            obs: self.obs.select(Axis(0), ixs),
            act: self.act.select(Axis(0), ixs),
            next_obs: self.next_obs.select(Axis(0), ixs),
            reward: ixs.iter().map(|&i| self.reward[i]).collect(),
            is_terminated: ixs.iter().map(|&i| self.is_terminated[i]).collect(),
        }
    }

    /// Returns rows `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            obs: self.obs.slice(s![start..end, ..]).to_owned(),
            act: self.act.slice(s![start..end, ..]).to_owned(),
            next_obs: self.next_obs.slice(s![start..end, ..]).to_owned(),
            reward: self.reward[start..end].to_vec(),
            is_terminated: self.is_terminated[start..end].to_vec(),
        }
    }

    /// Indices of the transitions that did not terminate.
    pub fn nonterminal_indices(&self) -> Vec<usize> {
        self.is_terminated
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| if d == 0 { Some(i) } else { None })
            .collect()
    }

    /// Formats the batch as supervised data for the dynamics model.
    ///
    /// Inputs are `[obs, act]` and targets are `[reward, next_obs - obs]`.
    pub fn format_for_model(&self) -> Result<(Array2<f32>, Array2<f32>)> {
        let inputs = concatenate(Axis(1), &[self.obs.view(), self.act.view()])?;
        let delta = &self.next_obs - &self.obs;
        let reward = Array2::from_shape_vec((self.len(), 1), self.reward.clone())?;
        let targets = concatenate(Axis(1), &[reward.view(), delta.view()])?;
        Ok((inputs, targets))
    }
}

/// Batch used for the critic update.
#[derive(Debug, Clone)]
pub enum CriticBatch {
    /// All critics regress on the same batch.
    Shared(TransitionBatch),

    /// One batch per critic group, in group order.
    PerGroup(Vec<TransitionBatch>),
}

impl CriticBatch {
    /// True if any critic would regress on an empty batch.
    pub fn has_empty(&self) -> bool {
        match self {
            Self::Shared(b) => b.is_empty(),
            Self::PerGroup(bs) => bs.is_empty() || bs.iter().any(|b| b.is_empty()),
        }
    }
}

/// Batches consumed by one training step of the actor-critic agent.
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    /// Batch for the actor and temperature updates.
    pub actor: TransitionBatch,

    /// Batch for the critic update.
    pub critic: CriticBatch,
}

impl TrainingBatch {
    /// A training batch where actor and critics share the same transitions.
    pub fn shared(batch: TransitionBatch) -> Self {
        Self {
            critic: CriticBatch::Shared(batch.clone()),
            actor: batch,
        }
    }
}
