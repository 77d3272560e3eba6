//! Lookup of indexed checkpoints.
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Path of the ensemble checkpoint with the given index in `dir`.
pub fn ensemble_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("ensemble_{}.safetensors", index))
}

/// Directory of the policy checkpoint with the given index in `dir`.
pub fn policy_dir(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("policy_{}", index))
}

/// The largest index among entries of `dir` named `<prefix>_<index>[.<ext>]`.
///
/// Returns `None` when no entry matches.
pub fn latest_index(dir: &Path, prefix: &str) -> Result<Option<usize>> {
    let mut latest = None;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let index = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.split('.').next())
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(ix) = index {
            latest = Some(latest.map_or(ix, |l: usize| l.max(ix)));
        }
    }
    Ok(latest)
}
