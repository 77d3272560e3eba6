//! Termination functions of locomotion tasks, applied to model rollouts.
//!
//! Each rule looks at `next_obs` only, with the torso height in column 0 and the
//! torso angle in column 1 where applicable.
use mbpo_core::TerminationFn;
use ndarray::{Array2, ArrayView1};

pub use mbpo_core::NeverTerminate;

fn is_finite(row: &ArrayView1<f32>) -> bool {
    row.iter().all(|v| v.is_finite())
}

/// Hopper falls when the torso is too low or tilted, or the state diverges.
#[derive(Debug, Clone, Copy, Default)]
pub struct HopperTermination;

impl TerminationFn for HopperTermination {
    fn is_terminated(
        &self,
        _obs: &Array2<f32>,
        _act: &Array2<f32>,
        next_obs: &Array2<f32>,
    ) -> Vec<i8> {
        next_obs
            .outer_iter()
            .map(|row| {
                let healthy = is_finite(&row)
                    && row.iter().skip(1).all(|v| v.abs() < 100.0)
                    && row[0] > 0.7
                    && row[1].abs() < 0.2;
                (!healthy) as i8
            })
            .collect()
    }
}

/// Walker2d falls when the torso leaves the height band or tilts too far.
#[derive(Debug, Clone, Copy, Default)]
pub struct Walker2dTermination;

impl TerminationFn for Walker2dTermination {
    fn is_terminated(
        &self,
        _obs: &Array2<f32>,
        _act: &Array2<f32>,
        next_obs: &Array2<f32>,
    ) -> Vec<i8> {
        next_obs
            .outer_iter()
            .map(|row| {
                let (height, angle) = (row[0], row[1]);
                let healthy = height > 0.8 && height < 2.0 && angle > -1.0 && angle < 1.0;
                (!healthy) as i8
            })
            .collect()
    }
}

/// The pole of InvertedPendulum falls beyond 0.2 rad.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvertedPendulumTermination;

impl TerminationFn for InvertedPendulumTermination {
    fn is_terminated(
        &self,
        _obs: &Array2<f32>,
        _act: &Array2<f32>,
        next_obs: &Array2<f32>,
    ) -> Vec<i8> {
        next_obs
            .outer_iter()
            .map(|row| {
                let healthy = is_finite(&row) && row[1].abs() <= 0.2;
                (!healthy) as i8
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn check<T: TerminationFn>(f: T, next_obs: Array2<f32>) -> Vec<i8> {
        let n = next_obs.nrows();
        f.is_terminated(&Array2::zeros((n, 3)), &Array2::zeros((n, 1)), &next_obs)
    }

    #[test]
    fn test_hopper() {
        let next_obs = array![
            [1.2, 0.0, 5.0],
            [0.5, 0.0, 5.0],
            [1.2, 0.3, 5.0],
            [1.2, 0.0, 150.0],
            [1.2, 0.0, f32::NAN],
        ];
        assert_eq!(check(HopperTermination, next_obs), vec![0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_walker2d() {
        let next_obs = array![[1.2, 0.5, 0.0], [2.1, 0.0, 0.0], [1.0, -1.5, 0.0]];
        assert_eq!(check(Walker2dTermination, next_obs), vec![0, 1, 1]);
    }

    #[test]
    fn test_inverted_pendulum() {
        let next_obs = array![[0.3, 0.1, 0.0], [0.0, -0.25, 0.0], [f32::INFINITY, 0.0, 0.0]];
        assert_eq!(check(InvertedPendulumTermination, next_obs), vec![0, 1, 1]);
    }
}
