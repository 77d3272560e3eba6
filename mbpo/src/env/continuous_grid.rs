use anyhow::Result;
use mbpo_core::{error::MbpoError, record::Record, BoxSpace, Env, EnvStep, NeverTerminate};
use serde::{Deserialize, Serialize};

/// Configuration of [`ContinuousGrid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousGridConfig {
    /// Positions are clipped to `[-size, size]` in every dimension.
    pub size: f32,

    /// Actions are in `[-act_bound, act_bound]` in every dimension.
    pub act_bound: f32,

    /// Dimension of the grid.
    pub dim: usize,
}

impl Default for ContinuousGridConfig {
    fn default() -> Self {
        Self {
            size: 5.0,
            act_bound: 3.0,
            dim: 2,
        }
    }
}

impl ContinuousGridConfig {
    /// Sets the half width of the grid.
    pub fn size(mut self, v: f32) -> Self {
        self.size = v;
        self
    }

    /// Sets the action bound.
    pub fn act_bound(mut self, v: f32) -> Self {
        self.act_bound = v;
        self
    }

    /// Sets the dimension.
    pub fn dim(mut self, v: usize) -> Self {
        self.dim = v;
        self
    }
}

/// A point moving in a bounded box.
///
/// The agent starts in the lower corner `[-size; dim]` and moves by its action,
/// clipped to the box. An episode terminates with reward 1 when every coordinate
/// exceeds `size - 1`; every other step gives reward -1.
pub struct ContinuousGrid {
    config: ContinuousGridConfig,
    space: BoxSpace,
    pos: Vec<f32>,
}

impl ContinuousGrid {
    /// Current position.
    pub fn pos(&self) -> &[f32] {
        &self.pos
    }

    fn in_goal(&self) -> bool {
        let size = self.config.size;
        self.pos.iter().all(|&p| p > size - 1.0 && p <= size)
    }
}

impl Env for ContinuousGrid {
    type Config = ContinuousGridConfig;

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        if config.dim == 0 || config.size <= 1.0 || config.act_bound <= 0.0 {
            return Err(MbpoError::InvalidConfig(format!("{:?}", config)).into());
        }
        Ok(Self {
            space: BoxSpace::uniform_bounds(config.dim, -config.act_bound, config.act_bound),
            pos: vec![-config.size; config.dim],
            config: config.clone(),
        })
    }

    fn obs_dim(&self) -> usize {
        self.config.dim
    }

    fn action_space(&self) -> &BoxSpace {
        &self.space
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.pos = vec![-self.config.size; self.config.dim];
        Ok(self.pos.clone())
    }

    fn step(&mut self, act: &[f32]) -> Result<EnvStep> {
        if act.len() != self.config.dim {
            return Err(MbpoError::ShapeMismatch(format!(
                "action of length {} for a grid of dimension {}",
                act.len(),
                self.config.dim
            ))
            .into());
        }
        let size = self.config.size;
        for (p, a) in self.pos.iter_mut().zip(act) {
            *p = (*p + a).clamp(-size, size);
        }
        let done = self.in_goal();

        Ok(EnvStep {
            obs: self.pos.clone(),
            reward: if done { 1.0 } else { -1.0 },
            is_terminated: done,
            info: Record::empty(),
        })
    }
}

/// Model rollouts in [`ContinuousGrid`] never terminate.
pub type ContinuousGridTermination = NeverTerminate;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reset_to_lower_corner() -> Result<()> {
        let mut env = ContinuousGrid::build(&ContinuousGridConfig::default(), 0)?;
        env.step(&[1.0, 2.0])?;
        assert_eq!(env.reset()?, vec![-5.0, -5.0]);
        assert_eq!(env.act_dim(), 2);
        assert_eq!(env.action_space().high, vec![3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_step_clips_and_penalizes() -> Result<()> {
        let mut env = ContinuousGrid::build(&ContinuousGridConfig::default(), 0)?;
        env.reset()?;
        let step = env.step(&[-3.0, 2.5])?;
        assert_eq!(step.obs, vec![-5.0, -2.5]);
        assert_eq!(step.reward, -1.0);
        assert!(!step.is_terminated);
        Ok(())
    }

    #[test]
    fn test_goal_terminates() -> Result<()> {
        let mut env = ContinuousGrid::build(&ContinuousGridConfig::default(), 0)?;
        env.reset()?;
        for _ in 0..3 {
            env.step(&[3.0, 3.0])?;
        }
        // At [4, 4], not beyond size - 1 yet
        assert_eq!(env.pos(), &[4.0, 4.0]);
        let step = env.step(&[3.0, 0.5])?;
        assert_eq!(step.obs, vec![5.0, 4.5]);
        assert_eq!(step.reward, 1.0);
        assert!(step.is_terminated);
        Ok(())
    }

    #[test]
    fn test_wrong_action_length() -> Result<()> {
        let mut env = ContinuousGrid::build(&ContinuousGridConfig::default(), 0)?;
        env.reset()?;
        assert!(env.step(&[1.0]).is_err());
        Ok(())
    }
}
