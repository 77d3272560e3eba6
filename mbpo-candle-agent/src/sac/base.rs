use super::{ActionPrior, CriticMode, SacConfig};
use crate::{
    actor::GaussianActor,
    critic::MultiCritic,
    ent_coef::EntCoef,
    model::{SubModel1, SubModel2},
    tensor::{array2_to_tensor, tensor_to_array2, vec_to_tensor},
    util::{normal_logp, std_all, OutDim},
};
use anyhow::Result;
use candle_core::{Device, Tensor, D};
use candle_nn::loss::mse;
use log::{trace, warn};
use mbpo_core::{
    batch::{CriticBatch, TrainingBatch, TransitionBatch},
    record::{Record, RecordValue},
    update_schedule::UpdateSchedule,
    Agent, Policy,
};
use ndarray::Array2;
use rand::{rngs::StdRng, seq::index, SeedableRng};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, fs, path::Path};

/// Tensors of a transition batch.
struct Tensors {
    obs: Tensor,
    act: Tensor,
    next_obs: Tensor,
    reward: Tensor,
    not_done: Tensor,
}

impl Tensors {
    fn new(batch: &TransitionBatch, device: &Device) -> Result<Self> {
        let not_done: Vec<f32> = batch
            .is_terminated
            .iter()
            .map(|&d| 1.0 - d as f32)
            .collect();
        Ok(Self {
            obs: array2_to_tensor(batch.obs.view(), device)?,
            act: array2_to_tensor(batch.act.view(), device)?,
            next_obs: array2_to_tensor(batch.next_obs.view(), device)?,
            reward: vec_to_tensor(&batch.reward, device)?,
            not_done: vec_to_tensor(&not_done, device)?,
        })
    }
}

/// Soft actor-critic (SAC) agent with an ensemble of critics.
///
/// The TD target takes the elementwise minimum over a random subset of
/// `num_q_elites` target critics. The actor maximizes the minimum of the critics
/// when there are two of them and their mean otherwise.
pub struct Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Input = Tensor, Output = (Tensor, Tensor)>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    pub(super) critic: MultiCritic<Q>,
    pub(super) actor: GaussianActor<P>,
    pub(super) ent_coef: EntCoef,
    pub(super) schedule: UpdateSchedule,
    pub(super) discount: f64,
    pub(super) reward_scale: f64,
    pub(super) action_prior: ActionPrior,
    pub(super) num_q_elites: usize,
    pub(super) critic_mode: CriticMode,
    pub(super) rng: StdRng,
    pub(super) train: bool,
    pub(super) n_opts: usize,
    pub(super) device: Device,
}

impl<Q, P> Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Input = Tensor, Output = (Tensor, Tensor)>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Constructs [`Sac`] agent.
    pub fn build(config: SacConfig<Q::Config, P::Config>) -> Result<Self> {
        config.validate()?;
        let schedule = UpdateSchedule::new(
            config.actor_train_repeat,
            config.critic_train_repeat,
            config.target_update_interval,
        )?;
        let device = config.device.unwrap_or_default().to_candle()?;
        let act_dim = config
            .actor_config
            .policy_config
            .as_ref()
            .map(|c| c.get_out_dim())
            .unwrap_or(0);
        let target_entropy = config.target_entropy.resolve(act_dim);
        let ent_coef = EntCoef::new(
            config.init_alpha,
            target_entropy,
            config.actor_config.opt_config.clone(),
            &device,
        )?;
        let actor = GaussianActor::build(config.actor_config, device.clone())?;
        let critic = MultiCritic::build(config.critic_config, device.clone())?;

        Ok(Self {
            critic,
            actor,
            ent_coef,
            schedule,
            discount: config.discount,
            reward_scale: config.reward_scale,
            action_prior: config.action_prior,
            num_q_elites: config.num_q_elites,
            critic_mode: config.critic_mode,
            rng: StdRng::seed_from_u64(config.seed),
            train: false,
            n_opts: 0,
            device,
        })
    }

    /// The number of optimization steps done so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// The critic ensemble.
    pub fn critic(&self) -> &MultiCritic<Q> {
        &self.critic
    }

    /// Critic indices trained on the `g`-th batch.
    fn group_members(&self, g: usize) -> std::ops::Range<usize> {
        match self.critic_mode {
            CriticMode::Simple => 0..self.critic.n_nets(),
            CriticMode::GroupDiverse { num_q_per_grp, .. } => {
                g * num_q_per_grp..(g + 1) * num_q_per_grp
            }
        }
    }

    /// `reward * scale + discount * (1 - terminal) * (min Q_tgt - alpha * log_pi)`.
    fn td_target(&mut self, b: &Tensors) -> Result<Tensor> {
        let next = self.actor.sample_with_logp(&b.next_obs)?;
        let next_act = self.actor.to_action_space(&next.squashed)?;
        let subset = index::sample(&mut self.rng, self.critic.n_nets(), self.num_q_elites).into_vec();
        let next_q = self.critic.qvals_min_tgt(&subset, &b.next_obs, &next_act)?;
        let next_v = (next_q - next.log_p.broadcast_mul(&self.ent_coef.alpha()?)?)?;
        let tgt = (b.reward.affine(self.reward_scale, 0.0)?
            + (&b.not_done * next_v)?.affine(self.discount, 0.0)?)?;
        Ok(tgt.detach())
    }

    /// Sum over critics of `0.5 * mse`, with the per-critic losses.
    fn critic_losses(&mut self, batches: &[Tensors]) -> Result<(Tensor, Vec<f32>)> {
        let mut total: Option<Tensor> = None;
        let mut losses = vec![];
        for (g, b) in batches.iter().enumerate() {
            let tgt = self.td_target(b)?;
            for i in self.group_members(g) {
                let pred = self.critic.qval(i, &b.obs, &b.act)?;
                let loss = mse(&pred, &tgt)?.affine(0.5, 0.0)?;
                losses.push(loss.to_scalar::<f32>()?);
                total = Some(match total {
                    None => loss,
                    Some(t) => (t + loss)?,
                });
            }
        }
        let total = total.ok_or_else(|| anyhow::anyhow!("No critic to train"))?;
        Ok((total, losses))
    }

    fn update_critic(&mut self, batch: &CriticBatch) -> Result<f32> {
        let batches = match batch {
            CriticBatch::Shared(b) => vec![Tensors::new(b, &self.device)?],
            CriticBatch::PerGroup(bs) => bs
                .iter()
                .map(|b| Tensors::new(b, &self.device))
                .collect::<Result<Vec<_>>>()?,
        };
        let (loss, losses) = self.critic_losses(&batches)?;
        self.critic.backward_step(&loss)?;
        Ok(losses.iter().sum::<f32>() / losses.len() as f32)
    }

    /// Critic values reduced over the ensemble for the actor objective.
    fn reduced_q(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        let qs = Tensor::stack(&self.critic.qvals(obs, act)?, 0)?;
        match self.critic.n_nets() {
            2 => Ok(qs.min(0)?),
            _ => Ok(qs.mean(0)?),
        }
    }

    fn update_actor(&mut self, batch: &TransitionBatch) -> Result<(f32, f32)> {
        let obs = array2_to_tensor(batch.obs.view(), &self.device)?;
        let s = self.actor.sample_with_logp(&obs)?;
        let act = self.actor.to_action_space(&s.squashed)?;
        let q = self.reduced_q(&obs, &act)?;
        let mut kl = (s.log_p.broadcast_mul(&self.ent_coef.alpha()?)? - q)?;
        if self.action_prior == ActionPrior::Normal {
            kl = (kl - normal_logp(&s.squashed)?)?;
        }
        let loss = kl.mean_all()?;
        self.actor.backward_step(&loss)?;
        self.ent_coef.update(&s.log_p)?;

        Ok((loss.to_scalar::<f32>()?, s.log_p.mean_all()?.to_scalar::<f32>()?))
    }

    fn opt_(&mut self, t: usize, batch: &TrainingBatch) -> Result<Record> {
        let mut record = Record::empty();

        if self.schedule.is_actor_step(t) {
            trace!("update_actor()");
            let (loss_actor, log_pi) = self.update_actor(&batch.actor)?;
            record.insert_scalar("loss_actor", loss_actor);
            record.insert_scalar("log_pi", log_pi);
        }

        if self.schedule.is_critic_step(t) {
            if batch.critic.has_empty() {
                warn!("Empty critic batch, skipping critic update at step {}", t);
            } else {
                trace!("update_critic()");
                record.insert_scalar("loss_critic", self.update_critic(&batch.critic)?);
            }
        }

        if self.schedule.is_target_step(t) {
            trace!("soft_update()");
            self.critic.soft_update()?;
        }

        self.n_opts += 1;
        record.insert_scalar("alpha", self.ent_coef.alpha_scalar()?);
        Ok(record)
    }
}

impl<Q, P> Policy for Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Input = Tensor, Output = (Tensor, Tensor)>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn sample(&mut self, obs: &Array2<f32>, deterministic: bool) -> Result<Array2<f32>> {
        let obs = array2_to_tensor(obs.view(), &self.device)?;
        let act = self.actor.sample(&obs, deterministic)?;
        tensor_to_array2(&act)
    }
}

impl<Q, P> Agent for Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Input = Tensor, Output = (Tensor, Tensor)>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
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
        self.critic.update_target(1.0)
    }

    fn n_train_repeat(&self) -> usize {
        self.schedule.n_train_repeat()
    }

    fn num_critic_groups(&self) -> Option<usize> {
        match self.critic_mode {
            CriticMode::Simple => None,
            CriticMode::GroupDiverse { num_q_grp, .. } => Some(num_q_grp),
        }
    }

    fn opt_with_record(&mut self, t: usize, batch: &TrainingBatch) -> Result<Record> {
        self.opt_(t, batch)
    }

    fn q_values(&self, obs: &Array2<f32>, act: &Array2<f32>) -> Result<Array2<f32>> {
        let obs = array2_to_tensor(obs.view(), &self.device)?;
        let act = array2_to_tensor(act.view(), &self.device)?;
        let qs = Tensor::stack(&self.critic.qvals(&obs, &act)?, 0)?;
        tensor_to_array2(&qs)
    }

    fn policy_std(&self, obs: &Array2<f32>) -> Result<Vec<f32>> {
        let obs = array2_to_tensor(obs.view(), &self.device)?;
        let (_, log_std) = self.actor.forward(&obs)?;
        Ok(log_std.sum(D::Minus1)?.exp()?.to_vec1::<f32>()?)
    }

    fn diagnostics(&mut self, batch: &TrainingBatch) -> Result<Record> {
        let b = Tensors::new(&batch.actor, &self.device)?;
        let qs = Tensor::stack(&self.critic.qvals(&b.obs, &b.act)?, 0)?;
        let tgt = self.td_target(&b)?;
        let losses = (0..self.critic.n_nets())
            .map(|i| {
                let pred = self.critic.qval(i, &b.obs, &b.act)?;
                Ok(mse(&pred, &tgt)?.to_scalar::<f32>()? * 0.5)
            })
            .collect::<Result<Vec<f32>>>()?;
        let s = self.actor.sample_with_logp(&b.obs)?;
        let neg_log_p = s.log_p.neg()?;

        Ok(Record::from_slice(&[
            ("Q-avg", RecordValue::Scalar(qs.mean_all()?.to_scalar::<f32>()?)),
            ("Q-std", RecordValue::Scalar(std_all(&qs)?)),
            (
                "Q_loss",
                RecordValue::Scalar(losses.iter().sum::<f32>() / losses.len() as f32),
            ),
            ("alpha", RecordValue::Scalar(self.ent_coef.alpha_scalar()?)),
            (
                "policy/-log-pis-mean",
                RecordValue::Scalar(neg_log_p.mean_all()?.to_scalar::<f32>()?),
            ),
            ("policy/-log-pis-std", RecordValue::Scalar(std_all(&neg_log_p)?)),
            (
                "policy/log-std-mean",
                RecordValue::Scalar(s.log_std.mean_all()?.to_scalar::<f32>()?),
            ),
            (
                "policy/actions-mean",
                RecordValue::Scalar(s.squashed.mean_all()?.to_scalar::<f32>()?),
            ),
            ("policy/actions-std", RecordValue::Scalar(std_all(&s.squashed)?)),
        ]))
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.actor.save(path.join("actor.safetensors"))?;
        self.critic.save(path)?;
        self.ent_coef.save(path.join("ent_coef.safetensors"))?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.actor.load(path.join("actor.safetensors"))?;
        self.critic.load(path)?;
        self.ent_coef.load(path.join("ent_coef.safetensors"))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        actor::GaussianActorConfig,
        critic::MultiCriticConfig,
        mlp::{GaussianMlp, Mlp, MlpConfig},
    };
    use mbpo_core::batch::Transition;
    use tempdir::TempDir;

    const OBS_DIM: usize = 3;
    const ACT_DIM: usize = 2;

    fn config(n_nets: usize) -> SacConfig<MlpConfig, MlpConfig> {
        SacConfig::default()
            .actor_config(
                GaussianActorConfig::default()
                    .policy_config(MlpConfig::new(OBS_DIM, vec![16], ACT_DIM, false)),
            )
            .critic_config(
                MultiCriticConfig::default()
                    .n_nets(n_nets)
                    .q_config(MlpConfig::new(OBS_DIM + ACT_DIM, vec![16], 1, false)),
            )
    }

    fn batch(n: usize) -> TransitionBatch {
        let transitions: Vec<Transition> = (0..n)
            .map(|i| Transition {
                obs: vec![i as f32 * 0.1; OBS_DIM],
                act: vec![0.5; ACT_DIM],
                next_obs: vec![i as f32 * 0.1 + 0.05; OBS_DIM],
                reward: 1.0,
                is_terminated: (i % 5 == 0) as i8,
            })
            .collect();
        TransitionBatch::from_transitions(&transitions, OBS_DIM, ACT_DIM).unwrap()
    }

    #[test]
    fn test_opt_with_record_follows_schedule() -> Result<()> {
        let mut sac: Sac<Mlp, GaussianMlp> = Sac::build(config(2).train_repeats(2, 1))?;
        sac.init_training()?;
        assert_eq!(sac.n_train_repeat(), 2);

        let batch = TrainingBatch::shared(batch(16));
        let r1 = sac.opt_with_record(1, &batch)?;
        assert!(r1.get("loss_actor").is_some());
        assert!(r1.get("loss_critic").is_none());

        let r2 = sac.opt_with_record(2, &batch)?;
        assert!(r2.get("loss_actor").is_some());
        assert!(r2.get_scalar("loss_critic")?.is_finite());
        assert_eq!(sac.n_opts(), 2);
        Ok(())
    }

    #[test]
    fn test_empty_critic_batch_skips_critic_update() -> Result<()> {
        let mut sac: Sac<Mlp, GaussianMlp> = Sac::build(config(2))?;
        sac.init_training()?;
        let batch = TrainingBatch {
            actor: batch(8),
            critic: CriticBatch::Shared(TransitionBatch::empty(OBS_DIM, ACT_DIM)),
        };
        let record = sac.opt_with_record(0, &batch)?;
        assert!(record.get("loss_critic").is_none());
        assert!(record.get_scalar("loss_actor")?.is_finite());
        assert_eq!(sac.n_opts(), 1);
        Ok(())
    }

    #[test]
    fn test_group_diverse_critics() -> Result<()> {
        let config = config(4).num_q_elites(2).critic_mode(CriticMode::GroupDiverse {
            num_q_per_grp: 2,
            num_q_grp: 2,
        });
        let mut sac: Sac<Mlp, GaussianMlp> = Sac::build(config)?;
        assert_eq!(sac.num_critic_groups(), Some(2));

        let batch = TrainingBatch {
            actor: batch(8),
            critic: CriticBatch::PerGroup(vec![batch(8), batch(12)]),
        };
        let record = sac.opt_with_record(1, &batch)?;
        assert!(record.get_scalar("loss_critic")?.is_finite());
        Ok(())
    }

    #[test]
    fn test_queries() -> Result<()> {
        let mut sac: Sac<Mlp, GaussianMlp> = Sac::build(config(3).num_q_elites(2))?;
        let b = batch(5);
        assert_eq!(sac.q_values(&b.obs, &b.act)?.dim(), (3, 5));
        assert_eq!(sac.policy_std(&b.obs)?.len(), 5);
        assert_eq!(sac.sample(&b.obs, true)?.dim(), (5, ACT_DIM));

        let record = sac.diagnostics(&TrainingBatch::shared(b))?;
        for key in ["Q-avg", "Q-std", "Q_loss", "alpha", "policy/-log-pis-mean"] {
            assert!(record.get_scalar(key)?.is_finite(), "{}", key);
        }
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new("sac")?;
        let obs = batch(4).obs;
        let sac: Sac<Mlp, GaussianMlp> = Sac::build(config(2))?;
        sac.save_params(dir.path())?;

        let mut other: Sac<Mlp, GaussianMlp> = Sac::build(config(2).seed(7))?;
        other.load_params(dir.path())?;
        let mut sac = sac;
        assert_eq!(sac.sample(&obs, true)?, other.sample(&obs, true)?);
        Ok(())
    }

    #[test]
    fn test_incompatible_repeats_rejected() {
        assert!(Sac::<Mlp, GaussianMlp>::build(config(2).train_repeats(3, 7)).is_err());
        assert!(Sac::<Mlp, GaussianMlp>::build(config(2).train_repeats(40, 20)).is_ok());
    }
}
