use anyhow::Result;
use clap::Parser;
use mbpo::{
    candle_agent::{
        actor::GaussianActorConfig,
        critic::MultiCriticConfig,
        dynamics::{EnsembleConfig, EnsembleDynamics},
        mlp::{GaussianMlp, Mlp, MlpConfig},
        opt::OptimizerConfig,
        sac::{Sac, SacConfig},
        Device,
    },
    core::{
        rollout::RolloutSchedule, Agent, Env, Mbpo, MbpoConfig, ModelTrainParams,
    },
    env::{ContinuousGrid, ContinuousGridConfig, ContinuousGridTermination},
    tensorboard::TensorboardRecorder,
};
use std::path::{Path, PathBuf};

const LR_ACTOR: f64 = 3e-4;
const LR_CRITIC: f64 = 3e-4;
const N_EPOCHS: usize = 30;
const EPOCH_LENGTH: usize = 200;
const N_INITIAL_EXPLORATION_STEPS: usize = 1000;
const MAX_PATH_LENGTH: usize = 50;
const MODEL_TRAIN_FREQ: usize = 50;
const ROLLOUT_BATCH_SIZE: usize = 5000;

/// Train an MBPO agent in the continuous grid environment
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory of TensorBoard logs and checkpoints
    #[arg(long, default_value = "./mbpo/examples/model/continuous_grid")]
    model_dir: String,

    /// Number of epochs
    #[arg(long, default_value_t = N_EPOCHS)]
    n_epochs: usize,

    /// Number of critics
    #[arg(long, default_value_t = 2)]
    n_critics: usize,

    /// Fraction of real transitions in training batches
    #[arg(long, default_value_t = 0.05)]
    real_ratio: f64,

    /// Use a CUDA device
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn device(args: &Args) -> Device {
    match args.cuda {
        true => Device::Cuda(0),
        false => Device::Cpu,
    }
}

fn create_agent(env: &ContinuousGrid, args: &Args) -> Result<Sac<Mlp, GaussianMlp>> {
    let (obs_dim, act_dim) = (env.obs_dim(), env.act_dim());
    let actor_config = GaussianActorConfig::default()
        .opt_config(OptimizerConfig::default().learning_rate(LR_ACTOR))
        .policy_config(MlpConfig::new(obs_dim, vec![64, 64], act_dim, false))
        .action_space(env.action_space().clone());
    let critic_config = MultiCriticConfig::default()
        .n_nets(args.n_critics)
        .opt_config(OptimizerConfig::default().learning_rate(LR_CRITIC))
        .q_config(MlpConfig::new(obs_dim + act_dim, vec![64, 64], 1, false));
    let sac_config = SacConfig::default()
        .actor_config(actor_config)
        .critic_config(critic_config)
        .num_q_elites(args.n_critics.min(2))
        .seed(args.seed)
        .device(device(args));
    Sac::build(sac_config)
}

fn create_model(env: &ContinuousGrid, args: &Args) -> Result<EnsembleDynamics> {
    let config = EnsembleConfig::default()
        .dims(env.obs_dim(), env.act_dim())
        .layers(vec![64, 64], vec![0.000025, 0.00005, 0.0001])
        .seed(args.seed)
        .device(device(args));
    EnsembleDynamics::build(config)
}

fn mbpo_config(args: &Args, model_dir: &Path) -> Result<MbpoConfig> {
    let config = MbpoConfig::default()
        .n_epochs(args.n_epochs)
        .epoch_length(EPOCH_LENGTH)
        .n_initial_exploration_steps(N_INITIAL_EXPLORATION_STEPS)
        .max_path_length(MAX_PATH_LENGTH)
        .eval_n_episodes(5)
        .model_train_freq(MODEL_TRAIN_FREQ)
        .rollout_batch_size(ROLLOUT_BATCH_SIZE)
        .rollout_schedule(RolloutSchedule::new(5, 20, 1, 5)?)
        .real_ratio(args.real_ratio)
        .model_train(ModelTrainParams {
            max_t: Some(60.0),
            ..Default::default()
        })
        .model_checkpoints(EPOCH_LENGTH, model_dir.join("checkpoints"))
        .seed(args.seed);
    Ok(config)
}

fn train(args: &Args) -> Result<()> {
    let model_dir = PathBuf::from(&args.model_dir);
    let config = mbpo_config(args, &model_dir)?;
    std::fs::create_dir_all(&model_dir)?;
    config.save(model_dir.join("mbpo.yaml"))?;

    let env_config = ContinuousGridConfig::default();
    let env = ContinuousGrid::build(&env_config, args.seed as i64)?;
    let eval_env = ContinuousGrid::build(&env_config, args.seed as i64 + 1)?;
    let agent = create_agent(&env, args)?;
    let model = create_model(&env, args)?;
    let mut recorder = TensorboardRecorder::new(&model_dir);

    let mut mbpo = Mbpo::build(
        config,
        env,
        eval_env,
        agent,
        model,
        ContinuousGridTermination::default(),
    )?;
    mbpo.train(&mut recorder)?;
    mbpo.agent().save_params(&model_dir.join("final"))?;

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    train(&args)
}
