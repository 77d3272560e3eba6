//! Deterministic test doubles of the environment, the dynamics model and the agent.
use crate::{
    base::{
        Agent, BoxSpace, DynamicsModel, EnsemblePrediction, Env, EnvStep, ModelTrainParams, Policy,
    },
    batch::{CriticBatch, TrainingBatch},
    checkpoint::ensemble_path,
    record::{Record, RecordValue},
    update_schedule::UpdateSchedule,
};
use anyhow::Result;
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

/// Configuration of [`DummyEnv`].
#[derive(Clone, Debug)]
pub struct DummyEnvConfig {
    /// Dimension of observations.
    pub obs_dim: usize,

    /// Dimension of actions.
    pub act_dim: usize,

    /// An episode terminates after this many steps.
    pub terminate_after: usize,
}

impl Default for DummyEnvConfig {
    fn default() -> Self {
        Self {
            obs_dim: 2,
            act_dim: 1,
            terminate_after: 10,
        }
    }
}

impl DummyEnvConfig {
    /// Sets the episode length.
    pub fn terminate_after(mut self, v: usize) -> Self {
        self.terminate_after = v;
        self
    }
}

/// Gives reward 1 at every step; the observation is the step count in every dimension.
pub struct DummyEnv {
    config: DummyEnvConfig,
    space: BoxSpace,
    t: usize,
}

impl Env for DummyEnv {
    type Config = DummyEnvConfig;

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        Ok(Self {
            space: BoxSpace::uniform_bounds(config.act_dim, -1.0, 1.0),
            config: config.clone(),
            t: 0,
        })
    }

    fn obs_dim(&self) -> usize {
        self.config.obs_dim
    }

    fn action_space(&self) -> &BoxSpace {
        &self.space
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.t = 0;
        Ok(vec![0.0; self.config.obs_dim])
    }

    fn step(&mut self, _act: &[f32]) -> Result<EnvStep> {
        self.t += 1;
        Ok(EnvStep {
            obs: vec![self.t as f32; self.config.obs_dim],
            reward: 1.0,
            is_terminated: self.t >= self.config.terminate_after,
            info: Record::empty(),
        })
    }
}

/// An ensemble predicting constants, counting its training calls.
pub struct DummyDynamics {
    obs_dim: usize,
    act_dim: usize,
    n_networks: usize,
    elites: Vec<usize>,
    reward: f32,
    delta: f32,
    var: f32,

    /// The number of completed training calls.
    pub train_calls: usize,

    /// Rows given to the last training call.
    pub last_train_rows: usize,
}

impl DummyDynamics {
    /// An ensemble of 3 networks with 2 elites.
    pub fn new(obs_dim: usize, act_dim: usize) -> Self {
        Self {
            obs_dim,
            act_dim,
            n_networks: 3,
            elites: vec![0, 1],
            reward: 0.0,
            delta: 0.0,
            var: 0.0,
            train_calls: 0,
            last_train_rows: 0,
        }
    }

    /// Sets the predicted reward and observation delta.
    pub fn with_constant(mut self, reward: f32, delta: f32) -> Self {
        self.reward = reward;
        self.delta = delta;
        self
    }

    /// Sets the predicted variance.
    pub fn with_var(mut self, var: f32) -> Self {
        self.var = var;
        self
    }
}

impl DynamicsModel for DummyDynamics {
    fn train(
        &mut self,
        inputs: &Array2<f32>,
        _targets: &Array2<f32>,
        params: &ModelTrainParams,
    ) -> Result<Record> {
        let n_holdout = (inputs.nrows() as f32 * params.holdout_ratio) as usize;
        if n_holdout == 0 {
            log::warn!("Not enough samples for a holdout set, skipping model training");
            return Ok(Record::empty());
        }
        self.train_calls += 1;
        self.last_train_rows = inputs.nrows();
        Ok(Record::from_slice(&[
            ("val_loss", RecordValue::Scalar(0.1)),
            ("train_epochs", RecordValue::Scalar(1.0)),
        ]))
    }

    fn predict(&self, inputs: &Array2<f32>) -> Result<EnsemblePrediction> {
        assert_eq!(inputs.ncols(), self.obs_dim + self.act_dim);
        let shape = (self.elites.len(), inputs.nrows(), self.obs_dim + 1);
        let mean = Array3::from_shape_fn(shape, |(_, _, d)| {
            if d == 0 {
                self.reward
            } else {
                self.delta
            }
        });
        Ok(EnsemblePrediction {
            mean,
            var: Array3::from_elem(shape, self.var),
        })
    }

    fn elites(&self) -> &[usize] {
        &self.elites
    }

    fn num_networks(&self) -> usize {
        self.n_networks
    }

    fn save(&self, dir: &Path, index: usize) -> Result<PathBuf> {
        let path = ensemble_path(dir, index);
        std::fs::write(&path, self.train_calls.to_string())?;
        Ok(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.train_calls = std::fs::read_to_string(path)?.trim().parse()?;
        Ok(())
    }
}

/// Configuration of [`DummyAgent`].
#[derive(Clone, Debug)]
pub struct DummyAgentConfig {
    /// The number of critics.
    pub n_critics: usize,

    /// Critic groups, if group-diverse.
    pub groups: Option<usize>,

    /// Actor updates per environment step.
    pub actor_train_repeat: usize,

    /// Critic updates per environment step.
    pub critic_train_repeat: usize,

    /// Dimension of actions.
    pub act_dim: usize,
}

impl Default for DummyAgentConfig {
    fn default() -> Self {
        Self {
            n_critics: 2,
            groups: None,
            actor_train_repeat: 1,
            critic_train_repeat: 1,
            act_dim: 1,
        }
    }
}

impl DummyAgentConfig {
    /// Sets the number of critics.
    pub fn n_critics(mut self, v: usize) -> Self {
        self.n_critics = v;
        self
    }

    /// Makes the critics group-diverse with `v` groups.
    pub fn groups(mut self, v: usize) -> Self {
        self.groups = Some(v);
        self
    }

    /// Sets the repeat counts of the actor and critic updates.
    pub fn repeats(mut self, actor: usize, critic: usize) -> Self {
        self.actor_train_repeat = actor;
        self.critic_train_repeat = critic;
        self
    }
}

/// An agent that records how it is driven.
///
/// Actions are `0.5` in every dimension. Critic `k` returns `k` for any pair.
pub struct DummyAgent {
    config: DummyAgentConfig,
    schedule: UpdateSchedule,
    train: bool,

    /// Calls of `init_training`.
    pub init_calls: usize,

    /// Training-step counters passed to `opt_with_record`.
    pub opt_steps: Vec<usize>,

    /// Actor updates run.
    pub actor_updates: usize,

    /// Critic updates run.
    pub critic_updates: usize,

    /// Target updates run.
    pub target_updates: usize,

    /// The last training batch.
    pub last_batch: Option<TrainingBatch>,
}

impl DummyAgent {
    /// Creates the agent.
    ///
    /// # Panics
    ///
    /// Panics if the repeat counts are not multiples of one another.
    pub fn new(config: DummyAgentConfig) -> Self {
        let schedule =
            UpdateSchedule::new(config.actor_train_repeat, config.critic_train_repeat, 1).unwrap();
        Self {
            config,
            schedule,
            train: false,
            init_calls: 0,
            opt_steps: vec![],
            actor_updates: 0,
            critic_updates: 0,
            target_updates: 0,
            last_batch: None,
        }
    }
}

impl Policy for DummyAgent {
    fn sample(&mut self, obs: &Array2<f32>, _deterministic: bool) -> Result<Array2<f32>> {
        Ok(Array2::from_elem((obs.nrows(), self.config.act_dim), 0.5))
    }
}

impl Agent for DummyAgent {
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn init_training(&mut self) -> Result<()> {
        self.init_calls += 1;
        Ok(())
    }

    fn n_train_repeat(&self) -> usize {
        self.schedule.n_train_repeat()
    }

    fn num_critic_groups(&self) -> Option<usize> {
        self.config.groups
    }

    fn opt_with_record(&mut self, t: usize, batch: &TrainingBatch) -> Result<Record> {
        self.opt_steps.push(t);
        if self.schedule.is_actor_step(t) {
            self.actor_updates += 1;
        }
        if self.schedule.is_critic_step(t) {
            self.critic_updates += 1;
        }
        if self.schedule.is_target_step(t) {
            self.target_updates += 1;
        }
        self.last_batch = Some(batch.clone());
        let critic_rows = match &batch.critic {
            CriticBatch::Shared(b) => b.len(),
            CriticBatch::PerGroup(bs) => bs.iter().map(|b| b.len()).sum(),
        };
        Ok(Record::from_scalar("critic_rows", critic_rows as f32))
    }

    fn q_values(&self, obs: &Array2<f32>, _act: &Array2<f32>) -> Result<Array2<f32>> {
        Ok(Array2::from_shape_fn(
            (self.config.n_critics, obs.nrows()),
            |(k, _)| k as f32,
        ))
    }

    fn policy_std(&self, obs: &Array2<f32>) -> Result<Vec<f32>> {
        Ok(vec![1.0; obs.nrows()])
    }

    fn diagnostics(&mut self, batch: &TrainingBatch) -> Result<Record> {
        let mut record = Record::empty();
        record.insert_scalar("Q-avg", 0.0);
        record.insert_scalar("Q-std", 0.0);
        record.insert_scalar("Q_loss", 0.0);
        record.insert_scalar("alpha", 1.0);
        record.insert_scalar("policy/batch-size", batch.actor.len() as f32);
        Ok(record)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::write(path.join("dummy_agent.txt"), self.opt_steps.len().to_string())?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let _ = std::fs::read_to_string(path.join("dummy_agent.txt"))?;
        Ok(())
    }
}
