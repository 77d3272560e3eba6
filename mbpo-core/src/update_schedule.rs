//! Clocks of the actor and critic update streams.
use crate::error::MbpoError;
use serde::{Deserialize, Serialize};

/// Decides which updates run at a training step.
///
/// Each environment step runs `n_train_repeat = max(actor_train_repeat,
/// critic_train_repeat)` training steps. The actor (and temperature) update runs
/// every `n_train_repeat / actor_train_repeat` steps, the critic update every
/// `n_train_repeat / critic_train_repeat` steps and the target update every
/// `target_update_interval` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSchedule {
    n_train_repeat: usize,
    actor_train_freq: usize,
    critic_train_freq: usize,
    target_update_interval: usize,
}

impl UpdateSchedule {
    /// Creates the schedule.
    ///
    /// The two repeat counts must be positive integer multiples of one another.
    pub fn new(
        actor_train_repeat: usize,
        critic_train_repeat: usize,
        target_update_interval: usize,
    ) -> Result<Self, MbpoError> {
        if actor_train_repeat == 0 || critic_train_repeat == 0 {
            return Err(MbpoError::InvalidConfig(
                "actor_train_repeat and critic_train_repeat must be positive".into(),
            ));
        }
        if target_update_interval == 0 {
            return Err(MbpoError::InvalidConfig(
                "target_update_interval must be positive".into(),
            ));
        }
        let n = actor_train_repeat.max(critic_train_repeat);
        let m = actor_train_repeat.min(critic_train_repeat);
        if n % m != 0 {
            return Err(MbpoError::InvalidConfig(format!(
                "actor_train_repeat ({}) and critic_train_repeat ({}) must be multiples of one another",
                actor_train_repeat, critic_train_repeat
            )));
        }
        Ok(Self {
            n_train_repeat: n,
            actor_train_freq: n / actor_train_repeat,
            critic_train_freq: n / critic_train_repeat,
            target_update_interval,
        })
    }

    /// Training steps per environment step.
    pub fn n_train_repeat(&self) -> usize {
        self.n_train_repeat
    }

    /// Returns `true` if the actor and the temperature are updated at step `t`.
    pub fn is_actor_step(&self, t: usize) -> bool {
        t % self.actor_train_freq == 0
    }

    /// Returns `true` if the critics are updated at step `t`.
    pub fn is_critic_step(&self, t: usize) -> bool {
        t % self.critic_train_freq == 0
    }

    /// Returns `true` if the target critics are updated at step `t`.
    pub fn is_target_step(&self, t: usize) -> bool {
        t % self.target_update_interval == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_multiples_accepted() {
        let s = UpdateSchedule::new(40, 20, 1).unwrap();
        assert_eq!(s.n_train_repeat(), 40);
        assert_eq!((0..40).filter(|&t| s.is_actor_step(t)).count(), 40);
        assert_eq!((0..40).filter(|&t| s.is_critic_step(t)).count(), 20);
    }

    #[test]
    fn test_non_multiples_rejected() {
        assert!(matches!(
            UpdateSchedule::new(3, 7, 1),
            Err(MbpoError::InvalidConfig(_))
        ));
        assert!(UpdateSchedule::new(0, 7, 1).is_err());
        assert!(UpdateSchedule::new(1, 1, 0).is_err());
    }

    #[test]
    fn test_target_interval() {
        let s = UpdateSchedule::new(1, 1, 3).unwrap();
        let steps: Vec<usize> = (0..10).filter(|&t| s.is_target_step(t)).collect();
        assert_eq!(steps, vec![0, 3, 6, 9]);
    }
}
