//! Rollout horizon schedule and model pool sizing.
use crate::error::MbpoError;
use serde::{Deserialize, Serialize};

/// Linear schedule of the model rollout length over training epochs.
///
/// The length is `min_length` up to `min_epoch`, grows linearly until
/// `max_epoch` and stays at `max_length` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutSchedule {
    /// Last epoch at the minimum length.
    pub min_epoch: usize,

    /// First epoch at the maximum length.
    pub max_epoch: usize,

    /// Minimum rollout length.
    pub min_length: usize,

    /// Maximum rollout length.
    pub max_length: usize,
}

impl Default for RolloutSchedule {
    fn default() -> Self {
        Self {
            min_epoch: 20,
            max_epoch: 100,
            min_length: 1,
            max_length: 1,
        }
    }
}

impl RolloutSchedule {
    /// Creates a schedule, checking its invariants.
    pub fn new(
        min_epoch: usize,
        max_epoch: usize,
        min_length: usize,
        max_length: usize,
    ) -> Result<Self, MbpoError> {
        let schedule = Self {
            min_epoch,
            max_epoch,
            min_length,
            max_length,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Checks `min_epoch < max_epoch` and `min_length <= max_length`.
    pub fn validate(&self) -> Result<(), MbpoError> {
        if self.max_epoch <= self.min_epoch {
            return Err(MbpoError::InvalidConfig(format!(
                "rollout schedule needs min_epoch < max_epoch, got {} and {}",
                self.min_epoch, self.max_epoch
            )));
        }
        if self.max_length < self.min_length {
            return Err(MbpoError::InvalidConfig(format!(
                "rollout schedule needs min_length <= max_length, got {} and {}",
                self.min_length, self.max_length
            )));
        }
        Ok(())
    }

    /// Rollout length at the given epoch.
    pub fn rollout_length(&self, epoch: usize) -> usize {
        if epoch <= self.min_epoch {
            return self.min_length;
        }
        let dx = (epoch - self.min_epoch) as f64 / (self.max_epoch - self.min_epoch) as f64;
        let dx = dx.min(1.0);
        let y = dx * (self.max_length - self.min_length) as f64 + self.min_length as f64;
        y.floor() as usize
    }
}

/// Capacity of the model pool that retains `retain_epochs` epochs of rollouts.
///
/// Each epoch runs `epoch_length / model_train_freq` rollout phases of
/// `rollout_batch_size` particles and `rollout_length` steps.
pub fn model_pool_capacity(
    rollout_length: usize,
    rollout_batch_size: usize,
    epoch_length: usize,
    model_train_freq: usize,
    retain_epochs: usize,
) -> usize {
    let steps_per_epoch = rollout_length * rollout_batch_size * epoch_length / model_train_freq;
    (retain_epochs * steps_per_epoch).max(1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rollout_length() {
        let s = RolloutSchedule::new(20, 150, 1, 15).unwrap();
        assert_eq!(s.rollout_length(0), 1);
        assert_eq!(s.rollout_length(20), 1);
        assert_eq!(s.rollout_length(85), 8);
        assert_eq!(s.rollout_length(150), 15);
        assert_eq!(s.rollout_length(1000), 15);
    }

    #[test]
    fn test_rollout_length_monotone() {
        let s = RolloutSchedule::new(5, 37, 2, 23).unwrap();
        let lengths: Vec<usize> = (0..60).map(|e| s.rollout_length(e)).collect();
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
        assert!(lengths.iter().all(|&l| (2..=23).contains(&l)));
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(RolloutSchedule::new(10, 10, 1, 5).is_err());
        assert!(RolloutSchedule::new(0, 10, 5, 1).is_err());
    }

    #[test]
    fn test_model_pool_capacity() {
        // 100k particles, 4 rollout phases per epoch, length 1, 20 epochs.
        assert_eq!(model_pool_capacity(1, 100_000, 1000, 250, 20), 8_000_000);
        assert_eq!(model_pool_capacity(3, 400, 1000, 250, 1), 4_800);
    }
}
