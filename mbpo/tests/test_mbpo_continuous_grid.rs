use anyhow::Result;
use mbpo::{
    candle_agent::{
        actor::GaussianActorConfig,
        critic::MultiCriticConfig,
        dynamics::{EnsembleConfig, EnsembleDynamics},
        mlp::{GaussianMlp, Mlp, MlpConfig},
        sac::{Sac, SacConfig},
    },
    core::{
        checkpoint::{latest_index, policy_dir},
        record::BufferedRecorder,
        rollout::RolloutSchedule,
        Agent, DynamicsModel, Env, Mbpo, MbpoConfig, ModelTrainParams,
    },
    env::{ContinuousGrid, ContinuousGridConfig, ContinuousGridTermination},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tempdir::TempDir;

type GridMbpo = Mbpo<ContinuousGrid, EnsembleDynamics, Sac<Mlp, GaussianMlp>, ContinuousGridTermination>;

fn agent(env: &ContinuousGrid) -> Result<Sac<Mlp, GaussianMlp>> {
    let (obs_dim, act_dim) = (env.obs_dim(), env.act_dim());
    let config = SacConfig::default()
        .actor_config(
            GaussianActorConfig::default()
                .policy_config(MlpConfig::new(obs_dim, vec![32, 32], act_dim, false))
                .action_space(env.action_space().clone()),
        )
        .critic_config(MultiCriticConfig::default().n_nets(2).q_config(
            MlpConfig::new(obs_dim + act_dim, vec![32, 32], 1, false),
        ));
    Sac::build(config)
}

fn model(env: &ContinuousGrid) -> Result<EnsembleDynamics> {
    EnsembleDynamics::build(
        EnsembleConfig::default()
            .dims(env.obs_dim(), env.act_dim())
            .networks(3, 2)
            .layers(vec![16, 16], vec![0.000025, 0.00005, 0.0001]),
    )
}

fn build(config: MbpoConfig) -> Result<GridMbpo> {
    let env_config = ContinuousGridConfig::default();
    let env = ContinuousGrid::build(&env_config, 0)?;
    let eval_env = ContinuousGrid::build(&env_config, 1)?;
    let agent = agent(&env)?;
    let model = model(&env)?;
    Mbpo::build(config, env, eval_env, agent, model, ContinuousGridTermination::default())
}

fn config() -> MbpoConfig {
    MbpoConfig::default()
        .n_epochs(2)
        .epoch_length(50)
        .n_initial_exploration_steps(100)
        .min_pool_size(100)
        .max_path_length(20)
        .batch_size(32)
        .model_train_freq(25)
        .model_retain_epochs(1)
        .rollout_batch_size(20)
        .rollout_schedule(RolloutSchedule::new(0, 10, 1, 1).unwrap())
        .real_ratio(0.5)
        .model_train(ModelTrainParams {
            batch_size: 32,
            max_epochs: Some(2),
            ..Default::default()
        })
        .seed(0)
}

#[test]
fn test_mbpo_continuous_grid() -> Result<()> {
    let dir = TempDir::new("mbpo_continuous_grid")?;
    let mut mbpo = build(config().model_checkpoints(25, dir.path()))?;
    let mut recorder = BufferedRecorder::new();
    mbpo.train(&mut recorder)?;

    assert_eq!(mbpo.state().epoch, 2);
    assert_eq!(mbpo.state().total_timestep, 100);
    assert!(mbpo.state().num_train_steps > 0);
    assert_eq!(mbpo.model().elites().len(), 2);
    assert!(mbpo.model_pool().map_or(0, |p| p.len()) > 0);

    assert_eq!(recorder.len(), 2);
    let record = recorder.last().unwrap();
    for key in ["Q-avg", "alpha", "model/rollout_length", "timesteps_total"] {
        assert!(record.get(key).is_some(), "missing {}", key);
    }

    let index = latest_index(dir.path(), "ensemble")?.unwrap();
    assert!(policy_dir(dir.path(), index).join("actor.safetensors").exists());
    let mut agent = agent(&ContinuousGrid::build(&ContinuousGridConfig::default(), 0)?)?;
    agent.load_params(&policy_dir(dir.path(), index))?;
    Ok(())
}

#[test]
fn test_stop_flag_ends_after_current_epoch() -> Result<()> {
    let flag = Arc::new(AtomicBool::new(false));
    let mut mbpo = build(config().n_epochs(5))?.with_stop_flag(flag.clone());
    flag.store(true, Ordering::SeqCst);
    mbpo.train(&mut BufferedRecorder::new())?;
    assert_eq!(mbpo.state().epoch, 1);
    Ok(())
}

#[test]
fn test_load_model_checkpoint() -> Result<()> {
    let dir = TempDir::new("mbpo_load_model")?;
    let mut mbpo = build(config().n_epochs(1).model_checkpoints(25, dir.path()))?;
    mbpo.train(&mut BufferedRecorder::new())?;

    let loaded = build(config().load_model(dir.path(), None))?;
    assert_eq!(loaded.model().elites().len(), 2);
    Ok(())
}
