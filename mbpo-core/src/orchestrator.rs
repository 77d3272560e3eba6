//! The MBPO training loop.
mod state;
use crate::{
    base::{Agent, DynamicsModel, Env, Policy, TerminationFn, UniformPolicy},
    batch::{CriticBatch, TrainingBatch, TransitionBatch},
    checkpoint::{ensemble_path, latest_index, policy_dir},
    config::MbpoConfig,
    error::MbpoError,
    evaluator::Evaluator,
    exploration::exploration_stats,
    record::{AggregateRecorder, Record, RecordStorage},
    replay_pool::{ReplayPoolConfig, SimpleReplayPool},
    rollout::model_pool_capacity,
    sampler::{PathStats, Sampler},
    synthetic_env::SyntheticEnv,
};
use anyhow::Result;
use log::{debug, info, warn};
use ndarray::Axis;
pub use state::TrainingState;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Runs model-based policy optimization.
///
/// # Training loop
///
/// 0. Before the first epoch, the target critics are initialized with a hard copy
///    and `n_initial_exploration_steps` transitions are collected with a uniform
///    random policy.
/// 1. At the beginning of an epoch, exploration diagnostics are written every
///    `evaluate_explore_freq` epochs.
/// 2. Every `model_train_freq` environment steps, unless `real_ratio == 1`:
///     1. The dynamics model is refit on the whole real pool (only on every
///        `model_train_slower`-th attempt).
///     2. The rollout length is set from the epoch and the model pool is
///        allocated or resized to retain `model_retain_epochs` epochs of rollouts.
///     3. Start states are drawn from the real pool and unrolled with the policy
///        through the synthetic environment; every transition goes to the model pool.
/// 3. One environment step with the policy; the transition goes to the real pool.
/// 4. Once the real pool holds `min_pool_size` samples, `n_train_repeat` training
///    steps run, each on a batch of `floor(batch_size * real_ratio)` real rows
///    followed by model rows.
/// 5. After `epoch_length` environment steps, the policy is evaluated and the
///    diagnostics of the epoch are handed to the recorder.
///
/// ```mermaid
/// graph LR
///     A[Agent]-->|action|B[Env]
///     B -->|transition|C[Real pool]
///     C -->|all samples|D[Dynamics model]
///     C -->|start states|E[SyntheticEnv]
///     D --> E
///     A -->|action|E
///     E -->|transitions|F[Model pool]
///     C -->|real rows|G[TrainingBatch]
///     F -->|model rows|G
///     G --> A
/// ```
pub struct Mbpo<E, M, A, T>
where
    E: Env,
    M: DynamicsModel,
    A: Agent,
    T: TerminationFn,
{
    config: MbpoConfig,
    state: TrainingState,
    agent: A,
    sampler: Sampler<E>,
    evaluator: Evaluator<E>,
    synthetic_env: SyntheticEnv<M, T>,
    pool: SimpleReplayPool,
    model_pool: Option<SimpleReplayPool>,
    model_metrics: Record,
    opt_records: RecordStorage,
    times: Record,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<E, M, A, T> Mbpo<E, M, A, T>
where
    E: Env,
    M: DynamicsModel,
    A: Agent,
    T: TerminationFn,
{
    /// Builds the training loop.
    ///
    /// Fails if the configuration is invalid, if group-diverse critics are combined
    /// with `real_ratio != 1` or if a configured model checkpoint cannot be loaded.
    pub fn build(
        config: MbpoConfig,
        env: E,
        eval_env: E,
        agent: A,
        mut model: M,
        termination_fn: T,
    ) -> Result<Self> {
        config.validate()?;
        if agent.num_critic_groups().is_some() && config.real_ratio != 1.0 {
            return Err(MbpoError::InvalidConfig(format!(
                "group-diverse critics need real_ratio == 1, got {}",
                config.real_ratio
            ))
            .into());
        }

        let pool = SimpleReplayPool::build(
            &ReplayPoolConfig::default()
                .capacity(config.pool_capacity)
                .dims(env.obs_dim(), env.act_dim())
                .seed(config.seed),
        )?;

        if let Some(dir) = &config.load_model_dir {
            let index = match config.model_load_index {
                Some(ix) => ix,
                None => latest_index(dir, "ensemble")?.ok_or_else(|| {
                    MbpoError::InvalidConfig(format!("no model checkpoint in {:?}", dir))
                })?,
            };
            let path = ensemble_path(dir, index);
            info!("Loading model from {:?}", path);
            model.load(&path)?;
        }

        let state = TrainingState {
            rollout_length: config.rollout_schedule.min_length,
            ..Default::default()
        };

        Ok(Self {
            sampler: Sampler::new(env, config.max_path_length),
            evaluator: Evaluator::new(eval_env, config.eval_n_episodes, config.max_path_length),
            synthetic_env: SyntheticEnv::new(model, termination_fn, config.seed.wrapping_add(1)),
            config,
            state,
            agent,
            pool,
            model_pool: None,
            model_metrics: Record::empty(),
            opt_records: RecordStorage::new(),
            times: Record::empty(),
            stop_flag: None,
        })
    }

    /// Sets a flag checked at the end of every epoch; training returns once it is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    /// Counters of the training loop.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// The configuration.
    pub fn config(&self) -> &MbpoConfig {
        &self.config
    }

    /// The agent.
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// The agent, mutably.
    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    /// The dynamics model.
    pub fn model(&self) -> &M {
        self.synthetic_env.model()
    }

    /// The pool of real transitions.
    pub fn pool(&self) -> &SimpleReplayPool {
        &self.pool
    }

    /// The pool of model transitions, allocated at the first rollout.
    pub fn model_pool(&self) -> Option<&SimpleReplayPool> {
        self.model_pool.as_ref()
    }

    /// Trains the agent for the configured number of epochs.
    ///
    /// The diagnostics of every epoch are stored in `recorder` and flushed with the
    /// total number of environment steps.
    pub fn train(&mut self, recorder: &mut dyn AggregateRecorder) -> Result<()> {
        if !self.state.training_started {
            self.init_training()?;
            self.initial_exploration()?;
        }

        while self.state.epoch < self.config.n_epochs {
            let record = self.run_epoch()?;
            recorder.store(record);
            recorder.flush(self.state.total_timestep as i64);
            self.state.epoch += 1;

            if self.stop_requested() {
                info!("Stop requested, finishing at epoch {}", self.state.epoch);
                break;
            }
        }

        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    fn init_training(&mut self) -> Result<()> {
        self.agent.init_training()?;
        self.agent.train();
        self.state.training_started = true;
        Ok(())
    }

    fn initial_exploration(&mut self) -> Result<()> {
        let n = self.config.n_initial_exploration_steps;
        if n == 0 {
            return Ok(());
        }
        info!("Initial exploration with a uniform policy for {} steps", n);
        let mut policy = UniformPolicy::new(
            self.sampler.env().action_space().clone(),
            self.config.seed.wrapping_add(2),
        );
        let (obs_dim, act_dim) = (self.sampler.env().obs_dim(), self.sampler.env().act_dim());
        while self.pool.len() < n.min(self.pool.capacity()) {
            let transition = self.sampler.sample(&mut policy)?;
            let batch = TransitionBatch::from_transitions(&[transition], obs_dim, act_dim)?;
            self.pool.add_samples(&batch)?;
        }
        self.sampler.terminate_path();
        let _ = self.sampler.take_paths();
        Ok(())
    }

    fn ready_to_train(&self) -> bool {
        self.pool.len() >= self.config.min_pool_size
    }

    /// Runs a single epoch and returns its diagnostics.
    pub fn run_epoch(&mut self) -> Result<Record> {
        if !self.state.training_started {
            self.init_training()?;
        }
        self.state.train_steps_this_epoch = 0;
        self.times = Record::empty();
        let epoch_start = Instant::now();

        let freq = self.config.evaluate_explore_freq;
        if freq != 0 && self.state.epoch % freq == 0 {
            self.evaluate_exploration()?;
        }

        let (obs_dim, act_dim) = (self.sampler.env().obs_dim(), self.sampler.env().act_dim());
        let start_samples = self.sampler.total_samples();
        loop {
            let samples_now = self.sampler.total_samples();
            self.state.timestep = samples_now - start_samples;
            if samples_now >= start_samples + self.config.epoch_length && self.ready_to_train() {
                break;
            }

            if self.state.timestep % self.config.model_train_freq == 0
                && self.config.real_ratio < 1.0
            {
                let t0 = Instant::now();
                self.model_phase()?;
                self.add_time("model", t0);
            }

            let t0 = Instant::now();
            let transition = self.sampler.sample(&mut self.agent)?;
            let batch = TransitionBatch::from_transitions(&[transition], obs_dim, act_dim)?;
            self.pool.add_samples(&batch)?;
            self.add_time("sample", t0);

            if self.ready_to_train() {
                let t0 = Instant::now();
                self.do_training_repeats()?;
                self.add_time("train", t0);
            }

            self.state.total_timestep += 1;
        }

        let t0 = Instant::now();
        let record = self.epoch_diagnostics()?;
        self.add_time("evaluation", t0);
        self.add_time("epoch", epoch_start);

        info!(
            "Epoch {} | timesteps {} | train steps {}",
            self.state.epoch, self.state.total_timestep, self.state.num_train_steps
        );

        Ok(record.merge(self.times.clone().with_prefix("times")))
    }

    fn add_time(&mut self, key: &str, t0: Instant) {
        let prev = self.times.get_scalar(key).unwrap_or(0.0);
        self.times
            .insert_scalar(key, prev + t0.elapsed().as_secs_f32());
    }

    fn model_phase(&mut self) -> Result<()> {
        info!(
            "Training model at epoch {} | freq {} | timestep {} (total: {}) | epoch train steps: {} (total: {}) | times slower: {}",
            self.state.epoch,
            self.config.model_train_freq,
            self.state.timestep,
            self.state.total_timestep,
            self.state.train_steps_this_epoch,
            self.state.num_train_steps,
            self.config.model_train_slower
        );

        if self.state.model_train_attempts % self.config.model_train_slower == 0 {
            let metrics = self.train_model()?;
            self.model_metrics.merge_inplace(metrics);
        } else {
            info!("Skipping model training due to slowed training setting");
        }
        self.state.model_train_attempts += 1;

        self.set_rollout_length();
        self.reallocate_model_pool()?;
        let metrics = self.rollout_model()?;
        self.model_metrics.merge_inplace(metrics);

        let log_freq = self.config.model_log_freq;
        if log_freq != 0 && self.state.timestep % log_freq == 0 {
            self.log_model()?;
        }
        Ok(())
    }

    /// Refits the dynamics model on every real transition.
    pub fn train_model(&mut self) -> Result<Record> {
        let samples = self.pool.return_all_samples()?;
        let (inputs, targets) = samples.format_for_model()?;
        let t0 = Instant::now();
        let mut record = self
            .synthetic_env
            .model_mut()
            .train(&inputs, &targets, &self.config.model_train)?;
        record.insert_scalar("train_time", t0.elapsed().as_secs_f32());
        Ok(record.with_prefix("model"))
    }

    /// Sets the rollout length from the current epoch.
    pub fn set_rollout_length(&mut self) {
        let s = &self.config.rollout_schedule;
        self.state.rollout_length = s.rollout_length(self.state.epoch);
        info!(
            "Epoch: {} (min: {}, max: {}) | Rollout length: {} (min: {}, max: {})",
            self.state.epoch,
            s.min_epoch,
            s.max_epoch,
            self.state.rollout_length,
            s.min_length,
            s.max_length
        );
    }

    /// Allocates the model pool, or resizes it when the required capacity changed.
    pub fn reallocate_model_pool(&mut self) -> Result<()> {
        let capacity = model_pool_capacity(
            self.state.rollout_length,
            self.config.rollout_batch_size,
            self.config.epoch_length,
            self.config.model_train_freq,
            self.config.model_retain_epochs,
        );
        let (obs_dim, act_dim) = (self.sampler.env().obs_dim(), self.sampler.env().act_dim());

        match self.model_pool.as_mut() {
            None => {
                info!("Initializing new model pool with size {:.2e}", capacity as f64);
                let config = ReplayPoolConfig::default()
                    .capacity(capacity)
                    .dims(obs_dim, act_dim)
                    .seed(self.config.seed.wrapping_add(3));
                self.model_pool = Some(SimpleReplayPool::build(&config)?);
            }
            Some(pool) if pool.capacity() != capacity => {
                info!(
                    "Updating model pool | {:.2e} --> {:.2e}",
                    pool.capacity() as f64,
                    capacity as f64
                );
                pool.resize(capacity)?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Unrolls the policy through the synthetic environment from real start states.
    ///
    /// `rollout_batch_size / sample_repeat` start states are drawn from the real pool.
    /// Each of the `sample_repeat` branches starts from them and runs for up to
    /// `rollout_length` steps, dropping terminated particles after every step.
    pub fn rollout_model(&mut self) -> Result<Record> {
        let model_pool = match self.model_pool.as_mut() {
            Some(pool) => pool,
            None => {
                warn!("Model pool is not allocated, skipping rollouts");
                return Ok(Record::empty());
            }
        };
        if self.pool.is_empty() {
            warn!("Real pool is empty, skipping rollouts");
            return Ok(Record::empty());
        }

        info!(
            "Starting rollouts | Epoch: {} | Rollout length: {} | Batch size: {}",
            self.state.epoch, self.state.rollout_length, self.config.rollout_batch_size
        );

        let start = self
            .pool
            .random_batch(self.config.rollout_batch_size / self.config.sample_repeat)?;
        let mut steps_added = 0usize;
        let mut epistemic = 0f32;
        let mut aleatoric = 0f32;

        for _ in 0..self.config.sample_repeat {
            let mut obs = start.obs.clone();
            for i in 0..self.state.rollout_length {
                let act = self.agent.sample(&obs, false)?;
                let step = self
                    .synthetic_env
                    .step(&obs, &act, self.config.deterministic)?;
                steps_added += obs.nrows();
                epistemic += step.epistemic.iter().sum::<f32>();
                aleatoric += step.aleatoric.iter().sum::<f32>();

                let batch = TransitionBatch::new(
                    obs,
                    act,
                    step.next_obs,
                    step.reward,
                    step.is_terminated,
                )?;
                model_pool.add_samples(&batch)?;

                let nonterm = batch.nonterminal_indices();
                if nonterm.is_empty() {
                    debug!("Breaking rollout early at step {}", i);
                    break;
                }
                obs = batch.next_obs.select(Axis(0), &nonterm);
            }
        }

        let mean_rollout_length = steps_added as f32 / self.config.rollout_batch_size as f32;
        info!(
            "Added: {:.1e} | Model pool: {:.1e} (max {:.1e}) | Length: {} | Train rep: {}",
            steps_added as f64,
            model_pool.len() as f64,
            model_pool.capacity() as f64,
            mean_rollout_length,
            self.agent.n_train_repeat()
        );

        let mut record = Record::empty();
        record.insert_scalar("mean_rollout_length", mean_rollout_length);
        record.insert_scalar("rollout_length", self.state.rollout_length as f32);
        record.insert_scalar("model_pool_size", model_pool.len() as f32);
        record.insert_scalar("model_pool_capacity", model_pool.capacity() as f32);
        if steps_added > 0 {
            record.insert_scalar("mean_epistemic", epistemic / steps_added as f32);
            record.insert_scalar("mean_aleatoric", aleatoric / steps_added as f32);
        }
        Ok(record.with_prefix("model"))
    }

    /// Draws the batches of one training step.
    ///
    /// Returns `None` when model rows are needed but the model pool is empty.
    pub fn training_batch(&mut self) -> Result<Option<TrainingBatch>> {
        let env_batch_size = self.config.env_batch_size();
        let model_batch_size = self.config.batch_size - env_batch_size;

        if let Some(n_groups) = self.agent.num_critic_groups() {
            let batches = (0..n_groups)
                .map(|_| self.pool.random_batch(env_batch_size))
                .collect::<Result<Vec<_>>>()?;
            let actor = match batches.first() {
                Some(b) => b.clone(),
                None => return Ok(None),
            };
            return Ok(Some(TrainingBatch {
                actor,
                critic: CriticBatch::PerGroup(batches),
            }));
        }

        let env_batch = self.pool.random_batch(env_batch_size)?;
        let mixed = if model_batch_size > 0 {
            match self.model_pool.as_mut() {
                Some(pool) if !pool.is_empty() => {
                    let model_batch = pool.random_batch(model_batch_size)?;
                    TransitionBatch::concat(&[&env_batch, &model_batch])?
                }
                _ => {
                    warn!("Model pool is empty, skipping training step");
                    return Ok(None);
                }
            }
        } else {
            env_batch.clone()
        };

        let critic = if self.config.critic_same_as_actor {
            CriticBatch::Shared(mixed.clone())
        } else {
            CriticBatch::Shared(env_batch)
        };
        Ok(Some(TrainingBatch {
            actor: mixed,
            critic,
        }))
    }

    fn do_training_repeats(&mut self) -> Result<()> {
        if self.state.timestep % self.config.train_every_n_steps > 0 {
            return Ok(());
        }
        let trained_enough = self.state.train_steps_this_epoch
            > self.config.max_train_repeat_per_timestep * self.state.timestep;
        if trained_enough {
            return Ok(());
        }

        for _ in 0..self.agent.n_train_repeat() {
            let batch = match self.training_batch()? {
                Some(batch) => batch,
                None => continue,
            };
            let record = self
                .agent
                .opt_with_record(self.state.num_train_steps, &batch)?;
            self.opt_records.store(record);
            self.state.num_train_steps += 1;
            self.state.train_steps_this_epoch += 1;
        }
        Ok(())
    }

    fn epoch_diagnostics(&mut self) -> Result<Record> {
        let mut record = self.sampler.diagnostics();
        let paths = self.sampler.take_paths();
        record.merge_inplace(path_metrics(&paths).with_prefix("training"));

        self.agent.eval();
        let eval_record = self.evaluator.evaluate(&mut self.agent)?;
        self.agent.train();
        record.merge_inplace(eval_record);

        if let Some(batch) = self.training_batch()? {
            record.merge_inplace(self.agent.diagnostics(&batch)?);
        }
        record.merge_inplace(self.opt_records.aggregate().with_prefix("opt"));
        record.merge_inplace(self.model_metrics.clone());

        record.insert_scalar("epoch", self.state.epoch as f32);
        record.insert_scalar("timestep", self.state.timestep as f32);
        record.insert_scalar("timesteps_total", self.state.total_timestep as f32);
        record.insert_scalar("train-steps", self.state.num_train_steps as f32);
        Ok(record)
    }

    /// Writes exploration diagnostics of the current epoch.
    pub fn evaluate_exploration(&mut self) -> Result<()> {
        let dir = match &self.config.exploration_dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };
        if self.pool.is_empty() {
            warn!("Real pool is empty, skipping exploration diagnostics");
            return Ok(());
        }
        let obs = self
            .pool
            .random_batch(self.config.exploration_eval_size)?
            .obs;
        let stats = exploration_stats(
            &mut self.agent,
            &obs,
            self.config.exploration_action_repeat,
        )?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.csv", self.state.epoch));
        stats.write_csv(&path)?;
        info!("Exploration diagnostics written to {:?}", path);
        Ok(())
    }

    /// Saves the model and the agent under the current total timestep.
    pub fn log_model(&mut self) -> Result<()> {
        let dir = match &self.config.model_dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };
        std::fs::create_dir_all(&dir)?;
        let path = self
            .synthetic_env
            .model()
            .save(&dir, self.state.total_timestep)?;
        info!("Saved model to {:?}", path);

        let policy_path = policy_dir(&dir, self.state.total_timestep);
        std::fs::create_dir_all(&policy_path)?;
        self.agent.save_params(&policy_path)?;
        Ok(())
    }
}

fn path_metrics(paths: &[PathStats]) -> Record {
    let mut record = Record::empty();
    if paths.is_empty() {
        return record;
    }
    let n = paths.len() as f32;
    let returns: Vec<f32> = paths.iter().map(|p| p.ret).collect();
    let mean = returns.iter().sum::<f32>() / n;
    record.insert_scalar("return-average", mean);
    record.insert_scalar(
        "return-max",
        returns.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    );
    record.insert_scalar(
        "return-min",
        returns.iter().copied().fold(f32::INFINITY, f32::min),
    );
    record.insert_scalar(
        "episode-length-avg",
        paths.iter().map(|p| p.length as f32).sum::<f32>() / n,
    );
    record
}

#[cfg(test)]
mod test;
