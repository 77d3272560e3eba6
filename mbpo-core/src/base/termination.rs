//! Termination functions used by model rollouts.
use ndarray::Array2;

/// Decides, for a batch of model-generated transitions, which ones terminate an episode.
///
/// The synthetic environment has no notion of episodes, so the per-domain
/// termination rule is injected as a function of `(obs, act, next_obs)`.
pub trait TerminationFn {
    /// Returns `1` for terminated rows and `0` otherwise.
    fn is_terminated(
        &self,
        obs: &Array2<f32>,
        act: &Array2<f32>,
        next_obs: &Array2<f32>,
    ) -> Vec<i8>;
}

/// Never terminates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTerminate;

impl TerminationFn for NeverTerminate {
    fn is_terminated(
        &self,
        obs: &Array2<f32>,
        _act: &Array2<f32>,
        _next_obs: &Array2<f32>,
    ) -> Vec<i8> {
        vec![0; obs.nrows()]
    }
}
