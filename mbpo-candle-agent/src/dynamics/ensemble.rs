use super::{EnsembleConfig, StandardScaler};
use crate::{
    mlp::{hidden_forward, hidden_layers, Activation},
    opt::Optimizer,
    tensor::array2_to_tensor,
    util::softplus,
};
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{init::Init, linear, Linear, VarBuilder, VarMap};
use log::{debug, info, warn};
use mbpo_core::{
    checkpoint::ensemble_path,
    record::{Record, RecordValue},
    select_elites, DynamicsModel, EnsemblePrediction, ModelTrainParams,
};
use ndarray::{Array2, Array3, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Instant,
};

/// Initial best holdout loss of every member.
const INITIAL_BEST: f32 = 1e10;

/// A member of the ensemble: swish MLP predicting a mean and a raw log variance.
struct Member {
    layers: Vec<Linear>,
    out: Linear,
    out_dim: usize,
}

impl Member {
    fn build(vb: VarBuilder, config: &EnsembleConfig) -> Result<Self> {
        let layers = hidden_layers(&vb, config.in_dim(), &config.units)?;
        let last = config.units.last().copied().unwrap_or(config.in_dim());
        let out = linear(last, 2 * config.out_dim(), vb.pp(format!("ln{}", config.units.len())))?;
        Ok(Self {
            layers,
            out,
            out_dim: config.out_dim(),
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let xs = hidden_forward(xs, &self.layers, &Activation::Swish)?;
        let xs = self.out.forward(&xs)?;
        Ok((
            xs.narrow(D::Minus1, 0, self.out_dim)?,
            xs.narrow(D::Minus1, self.out_dim, self.out_dim)?,
        ))
    }

    fn weights(&self) -> impl Iterator<Item = &Tensor> {
        self.layers
            .iter()
            .chain(std::iter::once(&self.out))
            .map(|l| l.weight())
    }
}

/// Bootstrap ensemble of probabilistic networks predicting `[reward, next_obs - obs]`
/// from standardized `[obs, act]`.
///
/// Each member outputs a Gaussian whose log variance is softly bounded by learned
/// limits shared across the ensemble. Members are trained on their own bootstrap
/// resamples with a Gaussian negative log-likelihood plus per-layer weight decay,
/// stopping once no member improves its holdout error by more than
/// `improvement_threshold` for `max_epochs_since_update` epochs. The best
/// parameters of every member are restored afterwards and the members with the
/// lowest holdout errors become elites.
pub struct EnsembleDynamics {
    config: EnsembleConfig,
    device: Device,
    varmap: VarMap,
    members: Vec<Member>,
    max_logvar: Tensor,
    min_logvar: Tensor,
    opt: Optimizer,
    scaler: StandardScaler,
    elites: Vec<usize>,
    rng: StdRng,
}

impl EnsembleDynamics {
    /// Constructs the ensemble. Elites are the first `num_elites` members until trained.
    pub fn build(config: EnsembleConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.unwrap_or_default().to_candle()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let members = (0..config.num_networks)
            .map(|i| Member::build(vb.pp(format!("member{}", i)), &config))
            .collect::<Result<Vec<_>>>()?;
        let out_dim = config.out_dim();
        let max_logvar =
            vb.get_with_hints((1, out_dim), "max_logvar", Init::Const(config.max_logvar))?;
        let min_logvar =
            vb.get_with_hints((1, out_dim), "min_logvar", Init::Const(config.min_logvar))?;
        let opt = config.opt_config.build(varmap.all_vars())?;

        Ok(Self {
            scaler: StandardScaler::identity(config.in_dim()),
            elites: (0..config.num_elites).collect(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            device,
            varmap,
            members,
            max_logvar,
            min_logvar,
            opt,
        })
    }

    /// Mean and bounded log variance of member `i` on standardized inputs.
    fn member_forward(&self, i: usize, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let (mean, raw) = self.members[i].forward(xs)?;
        let logvar = self
            .max_logvar
            .broadcast_sub(&softplus(&self.max_logvar.broadcast_sub(&raw)?)?)?;
        let logvar = self
            .min_logvar
            .broadcast_add(&softplus(&logvar.broadcast_sub(&self.min_logvar)?)?)?;
        Ok((mean, logvar))
    }

    /// Gaussian negative log-likelihood of member `i`, up to constants.
    fn nll(&self, i: usize, xs: &Tensor, ys: &Tensor) -> Result<Tensor> {
        let (mean, logvar) = self.member_forward(i, xs)?;
        let inv_var = logvar.neg()?.exp()?;
        let err = ((mean - ys)?.sqr()? * inv_var)?.mean_all()?;
        Ok((err + logvar.mean_all()?)?)
    }

    /// Mean squared error of member `i`.
    fn mse(&self, i: usize, xs: &Tensor, ys: &Tensor) -> Result<f32> {
        let (mean, _) = self.member_forward(i, xs)?;
        Ok((mean - ys)?.sqr()?.mean_all()?.to_scalar::<f32>()?)
    }

    /// Weight decay plus the log-variance bound regularizer.
    fn regularizer(&self) -> Result<Tensor> {
        let mut reg = (self.max_logvar.sum_all()? - self.min_logvar.sum_all()?)?
            .affine(self.config.logvar_bound_coef, 0.0)?;
        for member in &self.members {
            for (w, &decay) in member.weights().zip(&self.config.weight_decays) {
                reg = (reg + w.sqr()?.sum_all()?.affine(0.5 * decay, 0.0)?)?;
            }
        }
        Ok(reg)
    }

    fn holdout_losses(&self, xs: &Tensor, ys: &Tensor) -> Result<Vec<f32>> {
        (0..self.members.len()).map(|i| self.mse(i, xs, ys)).collect()
    }

    /// Copies of the variables of member `i`.
    fn snapshot(&self, i: usize) -> Result<HashMap<String, Tensor>> {
        let prefix = format!("member{}.", i);
        let data = self.varmap.data().lock().map_err(|e| anyhow!("{}", e))?;
        data.iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| Ok((k.clone(), v.as_tensor().copy()?)))
            .collect()
    }

    fn restore(&self, snapshot: &HashMap<String, Tensor>) -> Result<()> {
        let data = self.varmap.data().lock().map_err(|e| anyhow!("{}", e))?;
        for (k, t) in snapshot {
            data.get(k)
                .with_context(|| format!("No variable {}", k))?
                .set(t)?;
        }
        Ok(())
    }

    fn train_epoch(
        &mut self,
        inputs: &Array2<f32>,
        targets: &Array2<f32>,
        bootstrap: &mut [Vec<usize>],
        batch_size: usize,
    ) -> Result<f32> {
        for ixs in bootstrap.iter_mut() {
            ixs.shuffle(&mut self.rng);
        }
        let n = inputs.nrows();
        let mut total = 0f32;
        let mut n_batches = 0;
        for start in (0..n).step_by(batch_size.max(1)) {
            let end = (start + batch_size).min(n);
            let mut loss = self.regularizer()?;
            for (i, ixs) in bootstrap.iter().enumerate() {
                let xs = array2_to_tensor(inputs.select(Axis(0), &ixs[start..end]).view(), &self.device)?;
                let ys = array2_to_tensor(targets.select(Axis(0), &ixs[start..end]).view(), &self.device)?;
                loss = (loss + self.nll(i, &xs, &ys)?)?;
            }
            self.opt.backward_step(&loss)?;
            total += loss.to_scalar::<f32>()?;
            n_batches += 1;
        }
        Ok(total / n_batches.max(1) as f32)
    }
}

impl DynamicsModel for EnsembleDynamics {
    fn train(
        &mut self,
        inputs: &Array2<f32>,
        targets: &Array2<f32>,
        params: &ModelTrainParams,
    ) -> Result<Record> {
        let n = inputs.nrows();
        let n_holdout = ((n as f32 * params.holdout_ratio) as usize).min(self.config.max_holdout);
        if n_holdout == 0 || n_holdout >= n {
            warn!(
                "Not enough samples ({}) for a holdout ratio of {}, skipping model training",
                n, params.holdout_ratio
            );
            return Ok(Record::empty());
        }

        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(&mut self.rng);
        let (holdout_ixs, train_ixs) = perm.split_at(n_holdout);
        let train_in = inputs.select(Axis(0), train_ixs);
        let train_out = targets.select(Axis(0), train_ixs);
        self.scaler = StandardScaler::fit(&train_in);
        let train_in = self.scaler.transform(&train_in);
        let holdout_in = array2_to_tensor(
            self.scaler
                .transform(&inputs.select(Axis(0), holdout_ixs))
                .view(),
            &self.device,
        )?;
        let holdout_out = array2_to_tensor(targets.select(Axis(0), holdout_ixs).view(), &self.device)?;

        let n_train = train_in.nrows();
        let mut bootstrap: Vec<Vec<usize>> = (0..self.members.len())
            .map(|_| (0..n_train).map(|_| self.rng.gen_range(0..n_train)).collect())
            .collect();
        info!(
            "Training {} networks on {} samples, {} held out",
            self.members.len(),
            n_train,
            n_holdout
        );

        let t0 = Instant::now();
        let mut best = vec![INITIAL_BEST; self.members.len()];
        let mut snapshots: Vec<Option<HashMap<String, Tensor>>> = vec![None; self.members.len()];
        let mut epochs_since_update = 0;
        let mut epoch = 0;
        let mut train_loss;

        loop {
            train_loss = self.train_epoch(&train_in, &train_out, &mut bootstrap, params.batch_size)?;
            epoch += 1;

            let losses = self.holdout_losses(&holdout_in, &holdout_out)?;
            let mut updated = false;
            for (i, &loss) in losses.iter().enumerate() {
                if (best[i] - loss) / best[i] > self.config.improvement_threshold {
                    best[i] = loss;
                    snapshots[i] = Some(self.snapshot(i)?);
                    updated = true;
                }
            }
            epochs_since_update = if updated { 0 } else { epochs_since_update + 1 };
            debug!("Epoch {}: train loss {}, holdout {:?}", epoch, train_loss, losses);

            if epochs_since_update > self.config.max_epochs_since_update {
                info!("Holdout loss stopped improving after {} epochs", epoch);
                break;
            }
            if params.max_epochs.is_some_and(|m| epoch >= m) {
                break;
            }
            if params
                .max_t
                .is_some_and(|t| t0.elapsed().as_secs_f32() > t)
            {
                info!("Model training hit the time limit after {} epochs", epoch);
                break;
            }
        }

        for snapshot in snapshots.iter().flatten() {
            self.restore(snapshot)?;
        }
        let losses = self.holdout_losses(&holdout_in, &holdout_out)?;
        self.elites = select_elites(&losses, self.config.num_elites);
        let val_loss =
            self.elites.iter().map(|&i| losses[i]).sum::<f32>() / self.elites.len() as f32;
        info!("Elites {:?}, holdout loss {}", self.elites, val_loss);

        Ok(Record::from_slice(&[
            ("val_loss", RecordValue::Scalar(val_loss)),
            ("train_loss", RecordValue::Scalar(train_loss)),
            ("train_epochs", RecordValue::Scalar(epoch as f32)),
        ]))
    }

    fn predict(&self, inputs: &Array2<f32>) -> Result<EnsemblePrediction> {
        let n = inputs.nrows();
        let out_dim = self.config.out_dim();
        let xs = array2_to_tensor(self.scaler.transform(inputs).view(), &self.device)?;
        let mut mean = Vec::with_capacity(self.elites.len() * n * out_dim);
        let mut var = Vec::with_capacity(self.elites.len() * n * out_dim);
        for &i in &self.elites {
            let (m, logvar) = self.member_forward(i, &xs)?;
            mean.extend(m.flatten_all()?.to_vec1::<f32>()?);
            var.extend(logvar.exp()?.flatten_all()?.to_vec1::<f32>()?);
        }
        let shape = (self.elites.len(), n, out_dim);
        Ok(EnsemblePrediction {
            mean: Array3::from_shape_vec(shape, mean)?,
            var: Array3::from_shape_vec(shape, var)?,
        })
    }

    fn elites(&self) -> &[usize] {
        &self.elites
    }

    fn num_networks(&self) -> usize {
        self.members.len()
    }

    fn save(&self, dir: &Path, index: usize) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = ensemble_path(dir, index);
        let mut tensors: HashMap<String, Tensor> = {
            let data = self.varmap.data().lock().map_err(|e| anyhow!("{}", e))?;
            data.iter()
                .map(|(k, v)| (k.clone(), v.as_tensor().clone()))
                .collect()
        };
        let in_dim = self.config.in_dim();
        tensors.insert(
            "scaler.mu".into(),
            Tensor::from_slice(self.scaler.mu.as_slice().context("mu")?, in_dim, &self.device)?,
        );
        tensors.insert(
            "scaler.std".into(),
            Tensor::from_slice(self.scaler.std.as_slice().context("std")?, in_dim, &self.device)?,
        );
        let elites: Vec<u32> = self.elites.iter().map(|&i| i as u32).collect();
        tensors.insert(
            "elites".into(),
            Tensor::from_vec(elites, self.elites.len(), &self.device)?,
        );
        candle_core::safetensors::save(&tensors, &path)?;
        info!("Save ensemble to {:?}", path);
        Ok(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let mut tensors = candle_core::safetensors::load(path, &self.device)?;
        let take = |tensors: &mut HashMap<String, Tensor>, k: &str| {
            tensors
                .remove(k)
                .with_context(|| format!("No tensor {} in {:?}", k, path))
        };
        self.scaler = StandardScaler {
            mu: take(&mut tensors, "scaler.mu")?.to_vec1::<f32>()?.into(),
            std: take(&mut tensors, "scaler.std")?.to_vec1::<f32>()?.into(),
        };
        self.elites = take(&mut tensors, "elites")?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|i| i as usize)
            .collect();
        self.restore(&tensors)?;
        info!("Load ensemble from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    fn config() -> EnsembleConfig {
        EnsembleConfig::default()
            .dims(2, 1)
            .networks(3, 2)
            .layers(vec![16, 16], vec![0.000025, 0.00005, 0.0001])
    }

    /// next_obs - obs = act, reward = obs[0]
    fn data(n: usize) -> (Array2<f32>, Array2<f32>) {
        let mut rng = StdRng::seed_from_u64(0);
        let inputs = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-1f32..1f32));
        let targets = Array2::from_shape_fn((n, 3), |(i, d)| match d {
            0 => inputs[[i, 0]],
            _ => inputs[[i, 2]],
        });
        (inputs, targets)
    }

    #[test]
    fn test_train_selects_elites() -> Result<()> {
        let mut model = EnsembleDynamics::build(config())?;
        let (inputs, targets) = data(200);
        let params = ModelTrainParams {
            batch_size: 32,
            max_epochs: Some(5),
            ..Default::default()
        };
        let record = model.train(&inputs, &targets, &params)?;
        assert!(record.get_scalar("val_loss")?.is_finite());
        assert!(record.get_scalar("train_epochs")? <= 5.0);
        assert_eq!(model.elites().len(), 2);
        assert!(model.elites().iter().all(|&i| i < 3));

        let pred = model.predict(&inputs)?;
        assert_eq!(pred.mean.dim(), (2, 200, 3));
        assert!(pred.var.iter().all(|&v| v > 0.0));
        Ok(())
    }

    #[test]
    fn test_too_few_samples_skips_training() -> Result<()> {
        let mut model = EnsembleDynamics::build(config())?;
        let (inputs, targets) = data(3);
        let record = model.train(&inputs, &targets, &ModelTrainParams::default())?;
        assert!(record.is_empty());
        assert_eq!(model.elites(), &[0, 1]);
        Ok(())
    }

    #[test]
    fn test_logvar_is_bounded() -> Result<()> {
        let model = EnsembleDynamics::build(config())?;
        let xs = Tensor::randn(0f32, 100f32, (10, 3), &Device::Cpu)?;
        let (_, logvar) = model.member_forward(0, &xs)?;
        let v = logvar.flatten_all()?.to_vec1::<f32>()?;
        assert!(v.iter().all(|&x| (-10.0..=0.51).contains(&x)));
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new("ensemble")?;
        let mut model = EnsembleDynamics::build(config())?;
        let (inputs, targets) = data(100);
        let params = ModelTrainParams {
            max_epochs: Some(2),
            ..Default::default()
        };
        model.train(&inputs, &targets, &params)?;
        let path = model.save(dir.path(), 1000)?;
        assert_eq!(path, ensemble_path(dir.path(), 1000));

        let mut other = EnsembleDynamics::build(config().seed(1))?;
        other.load(&path)?;
        assert_eq!(other.elites(), model.elites());
        let p1 = model.predict(&inputs)?;
        let p2 = other.predict(&inputs)?;
        assert_eq!(p1.mean, p2.mean);
        Ok(())
    }
}
