//! Exploration diagnostics: disagreement of the critics and spread of the policy.
use crate::base::{Agent, Policy};
use anyhow::Result;
use ndarray::{Array2, Axis};
use std::path::Path;

/// Per-state exploration statistics.
#[derive(Debug, Clone)]
pub struct ExplorationStats {
    /// Evaluated observations, `[n, obs_dim]`.
    pub obs: Array2<f32>,

    /// Named per-state columns, e.g. `q_std` and `pi_std`.
    pub columns: Vec<(String, Vec<f32>)>,
}

fn std_over_rows(x: &Array2<f32>) -> Vec<f32> {
    // Population standard deviation over axis 0 for each column.
    x.std_axis(Axis(0), 0.0).to_vec()
}

/// Computes exploration statistics for `obs`.
///
/// Q-values of every critic are averaged over `action_repeat` policy actions per
/// state. Without critic groups, `q_std` is the standard deviation over the
/// critics. With groups, `inter_q_std` is the within-group standard deviation
/// averaged over groups and `cross_q_std` is the standard deviation of the group
/// means. `pi_std` is the product of the policy standard deviations.
pub fn exploration_stats<A: Agent + ?Sized>(
    agent: &mut A,
    obs: &Array2<f32>,
    action_repeat: usize,
) -> Result<ExplorationStats> {
    let n = obs.nrows();
    let mut q_mean: Option<Array2<f32>> = None;
    for _ in 0..action_repeat.max(1) {
        let act = agent.sample(obs, false)?;
        let q = agent.q_values(obs, &act)?;
        q_mean = Some(match q_mean {
            Some(acc) => acc + q,
            None => q,
        });
    }
    let q_mean = match q_mean {
        Some(q) => q / action_repeat.max(1) as f32,
        None => Array2::zeros((0, n)),
    };

    let mut columns = vec![];
    match agent.num_critic_groups() {
        Some(n_groups) if n_groups > 0 => {
            let per_grp = q_mean.nrows() / n_groups;
            let mut inter = vec![0f32; n];
            let mut grp_means = Array2::<f32>::zeros((n_groups, n));
            for g in 0..n_groups {
                let block = q_mean.slice(ndarray::s![g * per_grp..(g + 1) * per_grp, ..]);
                let block = block.to_owned();
                for (acc, s) in inter.iter_mut().zip(std_over_rows(&block)) {
                    *acc += s / n_groups as f32;
                }
                if let Some(m) = block.mean_axis(Axis(0)) {
                    grp_means.row_mut(g).assign(&m);
                }
            }
            columns.push(("inter_q_std".to_string(), inter));
            columns.push(("cross_q_std".to_string(), std_over_rows(&grp_means)));
        }
        _ => columns.push(("q_std".to_string(), std_over_rows(&q_mean))),
    }
    columns.push(("pi_std".to_string(), agent.policy_std(obs)?));

    Ok(ExplorationStats {
        obs: obs.clone(),
        columns,
    })
}

impl ExplorationStats {
    /// Writes the statistics as CSV, one row per state.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        let mut header: Vec<String> = (0..self.obs.ncols()).map(|i| format!("obs_{}", i)).collect();
        header.extend(self.columns.iter().map(|(k, _)| k.clone()));
        wtr.write_record(&header)?;

        for (i, row) in self.obs.rows().into_iter().enumerate() {
            let mut record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            record.extend(self.columns.iter().map(|(_, vs)| vs[i].to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dummy::{DummyAgent, DummyAgentConfig};
    use tempdir::TempDir;

    #[test]
    fn test_q_std_over_critics() -> Result<()> {
        // Critic k returns k for every pair: values 0, 1, 2, 3.
        let mut agent = DummyAgent::new(DummyAgentConfig::default().n_critics(4));
        let obs = Array2::zeros((3, 2));
        let stats = exploration_stats(&mut agent, &obs, 5)?;
        let (name, q_std) = &stats.columns[0];
        assert_eq!(name, "q_std");
        let expected = (1.25f32).sqrt();
        assert!(q_std.iter().all(|s| (s - expected).abs() < 1e-6));
        assert_eq!(stats.columns[1].0, "pi_std");
        Ok(())
    }

    #[test]
    fn test_group_stats() -> Result<()> {
        // Groups {0, 1} and {2, 3}: within-group std 0.5, group means 0.5 and 2.5.
        let mut agent = DummyAgent::new(DummyAgentConfig::default().n_critics(4).groups(2));
        let obs = Array2::zeros((2, 2));
        let stats = exploration_stats(&mut agent, &obs, 1)?;
        assert_eq!(stats.columns[0].0, "inter_q_std");
        assert!((stats.columns[0].1[0] - 0.5).abs() < 1e-6);
        assert_eq!(stats.columns[1].0, "cross_q_std");
        assert!((stats.columns[1].1[0] - 1.0).abs() < 1e-6);

        let dir = TempDir::new("exploration")?;
        let path = dir.path().join("3.csv");
        stats.write_csv(&path)?;
        let text = std::fs::read_to_string(&path)?;
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("obs_0,obs_1,inter_q_std,cross_q_std,pi_std")
        );
        assert_eq!(lines.count(), 2);
        Ok(())
    }
}
