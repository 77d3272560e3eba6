use super::*;
use crate::{
    base::NeverTerminate,
    dummy::{DummyAgent, DummyAgentConfig, DummyDynamics, DummyEnv, DummyEnvConfig},
    record::BufferedRecorder,
    rollout::RolloutSchedule,
};
use ndarray::Array2;
use tempdir::TempDir;

type DummyMbpo = Mbpo<DummyEnv, DummyDynamics, DummyAgent, NeverTerminate>;

const MODEL_REWARD: f32 = -7.0;

fn config() -> MbpoConfig {
    MbpoConfig::default()
        .n_epochs(1)
        .epoch_length(20)
        .n_initial_exploration_steps(10)
        .min_pool_size(10)
        .max_path_length(50)
        .batch_size(256)
        .model_train_freq(10)
        .model_retain_epochs(1)
        .rollout_batch_size(50)
        .rollout_schedule(RolloutSchedule::new(0, 10, 1, 1).unwrap())
        .real_ratio(0.05)
        .seed(0)
}

fn build(config: MbpoConfig, agent_config: DummyAgentConfig) -> Result<DummyMbpo> {
    build_with(config, agent_config, NeverTerminate)
}

fn build_with<T: TerminationFn>(
    config: MbpoConfig,
    agent_config: DummyAgentConfig,
    termination: T,
) -> Result<Mbpo<DummyEnv, DummyDynamics, DummyAgent, T>> {
    let env_config = DummyEnvConfig::default().terminate_after(100);
    Mbpo::build(
        config,
        DummyEnv::build(&env_config, 0)?,
        DummyEnv::build(&env_config, 1)?,
        DummyAgent::new(agent_config),
        DummyDynamics::new(2, 1).with_constant(MODEL_REWARD, 0.25),
        termination,
    )
}

/// Terminates the rows at even positions of the batch.
struct TerminateEvenRows;

impl TerminationFn for TerminateEvenRows {
    fn is_terminated(
        &self,
        obs: &Array2<f32>,
        _act: &Array2<f32>,
        _next_obs: &Array2<f32>,
    ) -> Vec<i8> {
        (0..obs.nrows()).map(|i| (i % 2 == 0) as i8).collect()
    }
}

struct TerminateAll;

impl TerminationFn for TerminateAll {
    fn is_terminated(
        &self,
        obs: &Array2<f32>,
        _act: &Array2<f32>,
        _next_obs: &Array2<f32>,
    ) -> Vec<i8> {
        vec![1; obs.nrows()]
    }
}

fn three_step_rollouts() -> MbpoConfig {
    config()
        .rollout_batch_size(8)
        .rollout_schedule(RolloutSchedule::new(0, 10, 3, 3).unwrap())
}

#[test]
fn test_batch_composition_real_rows_first() -> Result<()> {
    let mut mbpo = build(config(), DummyAgentConfig::default())?;
    mbpo.train(&mut BufferedRecorder::new())?;

    let batch = mbpo.agent().last_batch.clone().unwrap();
    assert_eq!(batch.actor.len(), 256);
    assert!(batch.actor.reward[..12].iter().all(|&r| r == 1.0));
    assert!(batch.actor.reward[12..].iter().all(|&r| r == MODEL_REWARD));
    match batch.critic {
        CriticBatch::Shared(b) => assert_eq!(b, batch.actor),
        _ => panic!("expected a shared critic batch"),
    }
    Ok(())
}

#[test]
fn test_critic_on_real_rows_only() -> Result<()> {
    let mut mbpo = build(
        config().critic_same_as_actor(false),
        DummyAgentConfig::default(),
    )?;
    mbpo.train(&mut BufferedRecorder::new())?;

    let batch = mbpo.agent().last_batch.clone().unwrap();
    assert_eq!(batch.actor.len(), 256);
    match batch.critic {
        CriticBatch::Shared(b) => {
            assert_eq!(b.len(), 12);
            assert!(b.reward.iter().all(|&r| r == 1.0));
        }
        _ => panic!("expected a shared critic batch"),
    }
    Ok(())
}

#[test]
fn test_real_ratio_one_never_allocates_model_pool() -> Result<()> {
    let mut mbpo = build(config().real_ratio(1.0), DummyAgentConfig::default())?;
    mbpo.train(&mut BufferedRecorder::new())?;

    assert!(mbpo.model_pool().is_none());
    assert_eq!(mbpo.model().train_calls, 0);
    let batch = mbpo.agent().last_batch.clone().unwrap();
    assert!(batch.actor.reward.iter().all(|&r| r == 1.0));
    Ok(())
}

#[test]
fn test_group_diverse_requires_real_ratio_one() -> Result<()> {
    let agent_config = DummyAgentConfig::default().n_critics(4).groups(2);
    let err = build(config(), agent_config.clone()).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<MbpoError>(),
        Some(MbpoError::InvalidConfig(_))
    ));

    let mut mbpo = build(config().real_ratio(1.0).batch_size(8), agent_config)?;
    mbpo.train(&mut BufferedRecorder::new())?;
    let batch = mbpo.agent().last_batch.clone().unwrap();
    match batch.critic {
        CriticBatch::PerGroup(bs) => {
            assert_eq!(bs.len(), 2);
            assert!(bs.iter().all(|b| b.len() == 8));
        }
        _ => panic!("expected per-group critic batches"),
    }
    Ok(())
}

#[test]
fn test_update_streams() -> Result<()> {
    let mut mbpo = build(config(), DummyAgentConfig::default().repeats(4, 2))?;
    mbpo.train(&mut BufferedRecorder::new())?;

    let agent = mbpo.agent();
    let n = agent.opt_steps.len();
    assert!(n > 0);
    assert_eq!(n % 4, 0);
    assert_eq!(agent.opt_steps, (0..n).collect::<Vec<_>>());
    assert_eq!(agent.actor_updates, n);
    assert_eq!(agent.critic_updates, n / 2);
    assert_eq!(agent.init_calls, 1);
    assert_eq!(mbpo.state().num_train_steps, n);
    Ok(())
}

#[test]
fn test_model_train_slower() -> Result<()> {
    let mut mbpo = build(
        config().model_train_freq(5).model_train_slower(2),
        DummyAgentConfig::default(),
    )?;
    mbpo.train(&mut BufferedRecorder::new())?;

    assert_eq!(mbpo.state().model_train_attempts, 4);
    assert_eq!(mbpo.model().train_calls, 2);
    Ok(())
}

#[test]
fn test_model_pool_capacity_and_rollouts() -> Result<()> {
    let mut mbpo = build(config(), DummyAgentConfig::default())?;
    let mut recorder = BufferedRecorder::new();
    mbpo.train(&mut recorder)?;

    // 1 step * 50 particles * (20 / 10) phases * 1 epoch.
    let pool = mbpo.model_pool().unwrap();
    assert_eq!(pool.capacity(), 100);
    assert_eq!(pool.len(), 100);

    let record = recorder.last().unwrap();
    assert_eq!(record.get_scalar("model/mean_rollout_length")?, 1.0);
    assert_eq!(record.get_scalar("model/model_pool_capacity")?, 100.0);
    assert_eq!(record.get_scalar("model/val_loss")?, 0.1);
    Ok(())
}

#[test]
fn test_model_pool_grows_with_rollout_length() -> Result<()> {
    let config = config()
        .n_epochs(3)
        .rollout_schedule(RolloutSchedule::new(0, 2, 1, 3).unwrap());
    let mut mbpo = build(config, DummyAgentConfig::default())?;
    mbpo.train(&mut BufferedRecorder::new())?;

    assert_eq!(mbpo.state().rollout_length, 3);
    assert_eq!(mbpo.model_pool().unwrap().capacity(), 300);
    Ok(())
}

#[test]
fn test_epoch_diagnostics() -> Result<()> {
    let mut mbpo = build(config().n_epochs(2), DummyAgentConfig::default())?;
    let mut recorder = BufferedRecorder::new();
    mbpo.train(&mut recorder)?;

    assert_eq!(recorder.len(), 2);
    let record = recorder.last().unwrap();
    assert_eq!(record.get_scalar("epoch")?, 1.0);
    assert_eq!(record.get_scalar("timesteps_total")?, 40.0);
    assert_eq!(record.get_scalar("step")?, 40.0);
    for key in [
        "timestep",
        "train-steps",
        "Q-avg",
        "Q-std",
        "Q_loss",
        "alpha",
        "evaluation/return-average",
        "sampler/total-samples",
        "model/rollout_length",
        "times/epoch",
    ] {
        assert!(record.get(key).is_some(), "missing {}", key);
    }
    Ok(())
}

#[test]
fn test_stop_flag() -> Result<()> {
    let flag = Arc::new(AtomicBool::new(true));
    let mut mbpo = build(config().n_epochs(5), DummyAgentConfig::default())?
        .with_stop_flag(flag.clone());
    mbpo.train(&mut BufferedRecorder::new())?;
    assert_eq!(mbpo.state().epoch, 1);
    Ok(())
}

#[test]
fn test_checkpoints_and_exploration() -> Result<()> {
    let dir = TempDir::new("mbpo")?;
    let model_dir = dir.path().join("models");
    let exploration_dir = dir.path().join("exploration");
    let config = config()
        .model_checkpoints(10, &model_dir)
        .exploration_diagnostics(1, &exploration_dir)
        .exploration_sizes(7, 2);
    let mut mbpo = build(config.clone(), DummyAgentConfig::default())?;
    mbpo.train(&mut BufferedRecorder::new())?;

    let csv = std::fs::read_to_string(exploration_dir.join("0.csv"))?;
    assert_eq!(csv.lines().count(), 8);
    assert!(ensemble_path(&model_dir, 0).exists());
    assert!(ensemble_path(&model_dir, 10).exists());
    assert!(policy_dir(&model_dir, 10).join("dummy_agent.txt").exists());

    let mbpo = build(
        config.load_model(&model_dir, None),
        DummyAgentConfig::default(),
    )?;
    assert_eq!(mbpo.model().train_calls, 2);
    Ok(())
}

#[test]
fn test_rollouts_drop_terminated_particles() -> Result<()> {
    let mut mbpo = build_with(
        three_step_rollouts(),
        DummyAgentConfig::default(),
        TerminateEvenRows,
    )?;
    let mut recorder = BufferedRecorder::new();
    mbpo.train(&mut recorder)?;

    // (8 + 4 + 2) rows per phase, two phases.
    let pool = mbpo.model_pool().unwrap();
    assert_eq!(pool.len(), 28);
    let record = recorder.last().unwrap();
    assert_eq!(record.get_scalar("model/mean_rollout_length")?, 1.75);
    assert_eq!(record.get_scalar("model/rollout_length")?, 3.0);
    Ok(())
}

#[test]
fn test_rollouts_stop_when_all_particles_terminate() -> Result<()> {
    let mut mbpo = build_with(
        three_step_rollouts(),
        DummyAgentConfig::default(),
        TerminateAll,
    )?;
    let mut recorder = BufferedRecorder::new();
    mbpo.train(&mut recorder)?;

    let pool = mbpo.model_pool().unwrap();
    assert_eq!(pool.len(), 16);
    assert!(pool.return_all_samples()?.is_terminated.iter().all(|&d| d == 1));
    let record = recorder.last().unwrap();
    assert_eq!(record.get_scalar("model/mean_rollout_length")?, 1.0);
    Ok(())
}
