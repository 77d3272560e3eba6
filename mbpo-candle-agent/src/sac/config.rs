//! Configuration of SAC agent.
use crate::{
    actor::GaussianActorConfig, critic::MultiCriticConfig, ent_coef::TargetEntropy,
    util::OutDim, Device,
};
use anyhow::Result;
use log::info;
use mbpo_core::error::MbpoError;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Prior over actions in the policy objective.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
pub enum ActionPrior {
    /// No prior term.
    #[default]
    Uniform,

    /// Standard normal log density of the squashed action.
    Normal,
}

/// How critics are organized.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
pub enum CriticMode {
    /// All critics are trained on the same batch.
    #[default]
    Simple,

    /// Critics are split into `num_q_grp` groups of `num_q_per_grp`, group `g`
    /// holding critics `g * num_q_per_grp .. (g + 1) * num_q_per_grp`. Each group
    /// is regressed on its own batch.
    GroupDiverse {
        /// Critics per group.
        num_q_per_grp: usize,

        /// The number of groups.
        num_q_grp: usize,
    },
}

/// Configuration of [`Sac`](super::Sac).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SacConfig<QC, PC: OutDim> {
    /// Configuration of the actor model.
    pub actor_config: GaussianActorConfig<PC>,

    /// Configuration of the critic model.
    pub critic_config: MultiCriticConfig<QC>,

    /// Discount factor.
    pub discount: f64,

    /// Multiplier of rewards in the TD target.
    pub reward_scale: f64,

    /// Target entropy of the temperature update.
    pub target_entropy: TargetEntropy,

    /// Initial entropy coefficient.
    pub init_alpha: f64,

    /// Prior over actions.
    pub action_prior: ActionPrior,

    /// Only the reparameterized policy gradient is supported.
    pub reparameterize: bool,

    /// Actor updates per environment step.
    pub actor_train_repeat: usize,

    /// Critic updates per environment step.
    pub critic_train_repeat: usize,

    /// Training steps between target updates.
    pub target_update_interval: usize,

    /// Size of the random subset of target critics the TD target is minimized over.
    pub num_q_elites: usize,

    /// How critics are organized.
    pub critic_mode: CriticMode,

    /// Seed of target critic subset sampling.
    pub seed: u64,

    /// Device for actor/critic models.
    pub device: Option<Device>,
}

impl<QC, PC: OutDim> Default for SacConfig<QC, PC> {
    fn default() -> Self {
        Self {
            actor_config: Default::default(),
            critic_config: Default::default(),
            discount: 0.99,
            reward_scale: 1.0,
            target_entropy: TargetEntropy::Auto,
            init_alpha: 1.0,
            action_prior: ActionPrior::Uniform,
            reparameterize: true,
            actor_train_repeat: 1,
            critic_train_repeat: 1,
            target_update_interval: 1,
            num_q_elites: 2,
            critic_mode: CriticMode::Simple,
            seed: 42,
            device: None,
        }
    }
}

impl<QC, PC> SacConfig<QC, PC>
where
    QC: Serialize + for<'de> Deserialize<'de>,
    PC: OutDim + Serialize + for<'de> Deserialize<'de>,
{
    /// Configuration of actor.
    pub fn actor_config(mut self, v: GaussianActorConfig<PC>) -> Self {
        self.actor_config = v;
        self
    }

    /// Configuration of critic.
    pub fn critic_config(mut self, v: MultiCriticConfig<QC>) -> Self {
        self.critic_config = v;
        self
    }

    /// Discount factor.
    pub fn discount(mut self, v: f64) -> Self {
        self.discount = v;
        self
    }

    /// Reward scale.
    pub fn reward_scale(mut self, v: f64) -> Self {
        self.reward_scale = v;
        self
    }

    /// Target entropy.
    pub fn target_entropy(mut self, v: TargetEntropy) -> Self {
        self.target_entropy = v;
        self
    }

    /// Initial entropy coefficient.
    pub fn init_alpha(mut self, v: f64) -> Self {
        self.init_alpha = v;
        self
    }

    /// Prior over actions.
    pub fn action_prior(mut self, v: ActionPrior) -> Self {
        self.action_prior = v;
        self
    }

    /// Whether the policy gradient is reparameterized.
    pub fn reparameterize(mut self, v: bool) -> Self {
        self.reparameterize = v;
        self
    }

    /// Repeat counts of the actor and critic updates.
    pub fn train_repeats(mut self, actor: usize, critic: usize) -> Self {
        self.actor_train_repeat = actor;
        self.critic_train_repeat = critic;
        self
    }

    /// Training steps between target updates.
    pub fn target_update_interval(mut self, v: usize) -> Self {
        self.target_update_interval = v;
        self
    }

    /// Size of the target critic subset.
    pub fn num_q_elites(mut self, v: usize) -> Self {
        self.num_q_elites = v;
        self
    }

    /// How critics are organized.
    pub fn critic_mode(mut self, v: CriticMode) -> Self {
        self.critic_mode = v;
        self
    }

    /// Seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = Some(v);
        self
    }

    /// Checks invariants between fields.
    pub fn validate(&self) -> Result<(), MbpoError> {
        if !self.reparameterize {
            return Err(MbpoError::NotImplemented(
                "non-reparameterized policy gradient".into(),
            ));
        }
        let n_nets = self.critic_config.n_nets;
        if n_nets == 0 {
            return Err(MbpoError::InvalidConfig("n_nets must be positive".into()));
        }
        if self.num_q_elites == 0 || self.num_q_elites > n_nets {
            return Err(MbpoError::InvalidConfig(format!(
                "num_q_elites ({}) must be in 1..={}",
                self.num_q_elites, n_nets
            )));
        }
        if let CriticMode::GroupDiverse {
            num_q_per_grp,
            num_q_grp,
        } = self.critic_mode
        {
            if num_q_grp == 0 || num_q_per_grp * num_q_grp != n_nets {
                return Err(MbpoError::InvalidConfig(format!(
                    "{} groups of {} critics do not match n_nets = {}",
                    num_q_grp, num_q_per_grp, n_nets
                )));
            }
        }
        Ok(())
    }

    /// Constructs [`SacConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(&path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of SAC agent from {:?}", path.as_ref());
        Ok(b)
    }

    /// Saves [`SacConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(&path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of SAC agent into {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::MlpConfig;
    use tempdir::TempDir;

    type Config = SacConfig<MlpConfig, MlpConfig>;

    #[test]
    fn test_non_reparameterized_is_not_implemented() {
        let config = Config::default().reparameterize(false);
        assert!(matches!(
            config.validate(),
            Err(MbpoError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_group_sizes_must_match() {
        let critic = MultiCriticConfig::default().n_nets(6);
        let ok = Config::default()
            .critic_config(critic.clone())
            .critic_mode(CriticMode::GroupDiverse {
                num_q_per_grp: 3,
                num_q_grp: 2,
            });
        assert!(ok.validate().is_ok());

        let bad = Config::default()
            .critic_config(critic)
            .critic_mode(CriticMode::GroupDiverse {
                num_q_per_grp: 4,
                num_q_grp: 2,
            });
        assert!(matches!(bad.validate(), Err(MbpoError::InvalidConfig(_))));
    }

    #[test]
    fn test_num_q_elites_bound() {
        let config = Config::default().num_q_elites(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() -> Result<()> {
        let dir = TempDir::new("sac_config")?;
        let path = dir.path().join("sac.yaml");
        let config = Config::default()
            .actor_config(
                GaussianActorConfig::default().policy_config(MlpConfig::new(3, vec![64], 1, false)),
            )
            .critic_config(
                MultiCriticConfig::default()
                    .n_nets(10)
                    .q_config(MlpConfig::new(4, vec![64], 1, false)),
            )
            .target_entropy(TargetEntropy::Value(-1.0))
            .critic_mode(CriticMode::GroupDiverse {
                num_q_per_grp: 5,
                num_q_grp: 2,
            })
            .device(Device::Cpu);
        config.save(&path)?;
        assert_eq!(Config::load(&path)?, config);
        Ok(())
    }
}
