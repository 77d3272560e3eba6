//! Utilities.
use anyhow::{anyhow, Result};
use candle_core::{Tensor, D};
use candle_nn::VarMap;
use log::trace;

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> usize;

    /// Sets the output dimension.
    fn set_out_dim(&mut self, v: usize);
}

/// Applies a soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    track_with_replace_substring(dest, src, tau, ("", ""))
}

/// Applies a soft update on variables whose names differ by a substring.
///
/// The variable `k` in `dest` is updated with the variable in `src` named
/// `k.replace(ss_dest, ss_src)`.
pub fn track_with_replace_substring(
    dest: &VarMap,
    src: &VarMap,
    tau: f64,
    (ss_src, ss_dest): (&str, &str),
) -> Result<()> {
    trace!("track tau={}", tau);
    let dest = dest.data().lock().map_err(|e| anyhow!("{}", e))?;
    let src = src.data().lock().map_err(|e| anyhow!("{}", e))?;

    for (k_dest, v_dest) in dest.iter() {
        let k_src = match ss_dest.is_empty() {
            true => k_dest.clone(),
            false => k_dest.replace(ss_dest, ss_src),
        };
        let v_src = src
            .get(&k_src)
            .ok_or_else(|| anyhow!("No variable {} in the source", k_src))?;
        let t = (v_src.as_tensor().affine(tau, 0.0)? + v_dest.as_tensor().affine(1.0 - tau, 0.0)?)?;
        v_dest.set(&t)?;
    }

    Ok(())
}

/// Log density of the standard normal distribution, summed over the last dimension.
pub fn normal_logp(x: &Tensor) -> Result<Tensor> {
    let c = -0.5 * (2.0 * std::f64::consts::PI).ln();
    Ok(x.sqr()?.affine(-0.5, c)?.sum(D::Minus1)?)
}

/// Numerically stable `log(1 + exp(x))`.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok((x.relu()? + tail)?)
}

/// Population standard deviation of all elements.
pub fn std_all(t: &Tensor) -> Result<f32> {
    let mean = t.mean_all()?;
    Ok(t.broadcast_sub(&mean)?
        .sqr()?
        .mean_all()?
        .sqrt()?
        .to_scalar::<f32>()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::Init;

    fn varmap_with(name: &str, values: &[f32]) -> Result<VarMap> {
        let vm = VarMap::new();
        let init = Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        };
        vm.get((values.len(),), name, init, DType::F32, &Device::Cpu)?;
        let t = Tensor::from_slice(values, (values.len(),), &Device::Cpu)?;
        vm.data().lock().unwrap().get(name).unwrap().set(&t)?;
        Ok(vm)
    }

    fn values(vm: &VarMap, name: &str) -> Vec<f32> {
        vm.data()
            .lock()
            .unwrap()
            .get(name)
            .unwrap()
            .as_tensor()
            .to_vec1::<f32>()
            .unwrap()
    }

    #[test]
    fn test_track() -> Result<()> {
        let src = varmap_with("var1", &[1.0, 2.0, 3.0])?;
        let dest = varmap_with("var1", &[4.0, 5.0, 6.0])?;
        track(&dest, &src, 0.5)?;
        assert_eq!(values(&dest, "var1"), vec![2.5, 3.5, 4.5]);
        Ok(())
    }

    #[test]
    fn test_track_tau_zero_keeps_target() -> Result<()> {
        let src = varmap_with("var1", &[1.0, 2.0, 3.0])?;
        let dest = varmap_with("var1", &[4.0, 5.0, 6.0])?;
        track(&dest, &src, 0.0)?;
        assert_eq!(values(&dest, "var1"), vec![4.0, 5.0, 6.0]);
        Ok(())
    }

    #[test]
    fn test_track_tau_one_copies_source() -> Result<()> {
        let src = varmap_with("critic0.w", &[1.0, 2.0, 3.0])?;
        let dest = varmap_with("critic_tgt0.w", &[4.0, 5.0, 6.0])?;
        track_with_replace_substring(&dest, &src, 1.0, ("critic", "critic_tgt"))?;
        assert_eq!(values(&dest, "critic_tgt0.w"), vec![1.0, 2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_softplus() -> Result<()> {
        let x = Tensor::from_slice(&[-100f32, 0.0, 100.0], (3,), &Device::Cpu)?;
        let y = softplus(&x)?.to_vec1::<f32>()?;
        assert!(y[0].abs() < 1e-6);
        assert!((y[1] - 2f32.ln()).abs() < 1e-6);
        assert!((y[2] - 100.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_normal_logp() -> Result<()> {
        let x = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        let lp = normal_logp(&x)?.to_vec1::<f32>()?;
        let expected = -(2.0 * std::f32::consts::PI).ln();
        assert!((lp[0] - expected).abs() < 1e-5);
        Ok(())
    }
}
