//! A ring-buffer replay pool.
use super::ReplayPoolConfig;
use crate::{batch::TransitionBatch, error::MbpoError};
use anyhow::Result;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A fixed-capacity ring buffer of transitions.
///
/// When full, new transitions overwrite the oldest ones. The number of live
/// transitions never exceeds the capacity.
pub struct SimpleReplayPool {
    capacity: usize,
    obs_dim: usize,
    act_dim: usize,
    i: usize,
    size: usize,
    obs: Vec<f32>,
    act: Vec<f32>,
    next_obs: Vec<f32>,
    reward: Vec<f32>,
    is_terminated: Vec<i8>,
    rng: StdRng,
}

impl SimpleReplayPool {
    /// Builds an empty pool.
    pub fn build(config: &ReplayPoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_rng(
            config.capacity,
            config.obs_dim,
            config.act_dim,
            StdRng::seed_from_u64(config.seed),
        ))
    }

    fn with_rng(capacity: usize, obs_dim: usize, act_dim: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            obs_dim,
            act_dim,
            i: 0,
            size: 0,
            obs: vec![0.; capacity * obs_dim],
            act: vec![0.; capacity * act_dim],
            next_obs: vec![0.; capacity * obs_dim],
            reward: vec![0.; capacity],
            is_terminated: vec![0; capacity],
            rng,
        }
    }

    /// The number of live transitions.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the pool holds no transition.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The maximum number of transitions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a batch of transitions, overwriting the oldest ones when full.
    pub fn add_samples(&mut self, batch: &TransitionBatch) -> Result<()> {
        if batch.obs_dim() != self.obs_dim || batch.act_dim() != self.act_dim {
            return Err(MbpoError::ShapeMismatch(format!(
                "pool expects obs_dim {} and act_dim {}, got {} and {}",
                self.obs_dim,
                self.act_dim,
                batch.obs_dim(),
                batch.act_dim()
            ))
            .into());
        }

        let (od, ad) = (self.obs_dim, self.act_dim);
        for k in 0..batch.len() {
            let j = self.i;
            for (dst, src) in self.obs[j * od..(j + 1) * od]
                .iter_mut()
                .zip(batch.obs.row(k).iter())
            {
                *dst = *src;
            }
            for (dst, src) in self.act[j * ad..(j + 1) * ad]
                .iter_mut()
                .zip(batch.act.row(k).iter())
            {
                *dst = *src;
            }
            for (dst, src) in self.next_obs[j * od..(j + 1) * od]
                .iter_mut()
                .zip(batch.next_obs.row(k).iter())
            {
                *dst = *src;
            }
            self.reward[j] = batch.reward[k];
            self.is_terminated[j] = batch.is_terminated[k];

            self.i = (self.i + 1) % self.capacity;
        }

        self.size = (self.size + batch.len()).min(self.capacity);
        Ok(())
    }

    fn gather(&self, ixs: &[usize]) -> Result<TransitionBatch> {
        let (od, ad) = (self.obs_dim, self.act_dim);
        let n = ixs.len();
        let mut obs = Vec::with_capacity(n * od);
        let mut act = Vec::with_capacity(n * ad);
        let mut next_obs = Vec::with_capacity(n * od);
        for &j in ixs.iter() {
            obs.extend_from_slice(&self.obs[j * od..(j + 1) * od]);
            act.extend_from_slice(&self.act[j * ad..(j + 1) * ad]);
            next_obs.extend_from_slice(&self.next_obs[j * od..(j + 1) * od]);
        }
        TransitionBatch::new(
            Array2::from_shape_vec((n, od), obs)?,
            Array2::from_shape_vec((n, ad), act)?,
            Array2::from_shape_vec((n, od), next_obs)?,
            ixs.iter().map(|&j| self.reward[j]).collect(),
            ixs.iter().map(|&j| self.is_terminated[j]).collect(),
        )
    }

    /// Samples `k` transitions uniformly with replacement.
    pub fn random_batch(&mut self, k: usize) -> Result<TransitionBatch> {
        if k == 0 {
            return Ok(TransitionBatch::empty(self.obs_dim, self.act_dim));
        }
        if self.size == 0 {
            return Err(MbpoError::EmptyPool(k).into());
        }
        let ixs: Vec<usize> = (0..k).map(|_| self.rng.gen_range(0..self.size)).collect();
        self.gather(&ixs)
    }

    // Slot of the `p`-th oldest live transition.
    fn slot(&self, p: usize) -> usize {
        if self.size < self.capacity {
            p
        } else {
            (self.i + p) % self.capacity
        }
    }

    /// Returns every live transition, oldest first.
    pub fn return_all_samples(&self) -> Result<TransitionBatch> {
        let ixs: Vec<usize> = (0..self.size).map(|p| self.slot(p)).collect();
        self.gather(&ixs)
    }

    /// Reallocates the pool with a new capacity.
    ///
    /// Live transitions are copied into a freshly allocated buffer, oldest first,
    /// and the buffer is swapped in afterwards. When shrinking below the number of
    /// live transitions the oldest ones are dropped.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity == 0 {
            return Err(MbpoError::InvalidConfig(
                "replay pool capacity must be positive".into(),
            )
            .into());
        }
        let samples = self.return_all_samples()?;
        let keep = samples.len().min(new_capacity);
        let samples = samples.slice(samples.len() - keep, samples.len());

        let mut pool =
            Self::with_rng(new_capacity, self.obs_dim, self.act_dim, self.rng.clone());
        pool.add_samples(&samples)?;
        debug_assert_eq!(pool.len(), keep);

        *self = pool;
        Ok(())
    }
}
