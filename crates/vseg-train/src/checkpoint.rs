//! Parameter checkpointing.
//!
//! Checkpoints are burn record files named `vnet-<step>`, the step counter
//! embedded in the filename exactly like the original's `vnet-1200` saver
//! paths. Resuming scans the directory for the highest step.

use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};
use vseg_model::VNet;

const PREFIX: &str = "vnet";

/// Save the model parameters at the given step. Returns the file stem (the
/// recorder appends its own extension).
pub fn save<B: Backend>(model: &VNet<B>, dir: &Path, step: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create checkpoint dir {}", dir.display()))?;
    let stem = dir.join(format!("{PREFIX}-{step}"));
    model
        .clone()
        .save_file(stem.clone(), &CompactRecorder::new())
        .with_context(|| format!("Failed to write checkpoint {}", stem.display()))?;
    Ok(stem)
}

/// Restore parameters from a checkpoint stem into the given model.
pub fn load<B: Backend>(model: VNet<B>, stem: &Path, device: &B::Device) -> Result<VNet<B>> {
    model
        .load_file(stem, &CompactRecorder::new(), device)
        .with_context(|| format!("Failed to restore checkpoint {}", stem.display()))
}

/// Find the checkpoint with the highest embedded step, if any.
pub fn latest(dir: &Path) -> Result<Option<(PathBuf, usize)>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut best: Option<(PathBuf, usize)> = None;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list checkpoint dir {}", dir.display()))?
    {
        let path = entry?.path();
        let Some(step) = parse_step(&path) else {
            continue;
        };
        if best.as_ref().map_or(true, |(_, s)| step > *s) {
            best = Some((path.with_extension(""), step));
        }
    }
    Ok(best)
}

/// Extract the step from a `vnet-<step>.mpk` filename.
fn parse_step(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(PREFIX)?
        .strip_prefix('-')?
        .parse()
        .ok()
}
