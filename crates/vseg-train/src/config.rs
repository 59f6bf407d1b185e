//! Run configuration.
//!
//! `config.json` is loaded once into an immutable [`RunConfig`] and passed by
//! reference to the network builder and the trainer. The file keeps the
//! original uppercase key names; stringified booleans ("True"/"False") are
//! parsed into typed fields at load time and malformed values fail the load,
//! not the first use.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

/// What the run does: train, or a single evaluation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
    Val,
}

/// Which loss drives the optimizer. The reference training run used weighted
/// cross-entropy; Dice is the documented alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    CrossEntropy,
    Dice,
}

/// Typed view of `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(rename = "MODE")]
    pub mode: Mode,

    /// Gates local response normalization after pooling (training mode only).
    #[serde(rename = "USE_BATCH_NORM", deserialize_with = "stringified_bool")]
    pub use_batch_norm: bool,

    #[serde(rename = "LEARNING_RATE")]
    pub learning_rate: f64,

    #[serde(rename = "LOG_DIR")]
    pub log_dir: PathBuf,

    #[serde(rename = "CHECKPOINTS_DIR")]
    pub checkpoints_dir: PathBuf,

    /// May be fractional; the step count truncates.
    #[serde(rename = "NUM_EPOCHS")]
    pub num_epochs: f64,

    #[serde(rename = "TRAIN_SIZE")]
    pub train_size: usize,

    #[serde(rename = "AUGMENT_SIZE")]
    pub augment_size: usize,

    #[serde(rename = "VAL_SIZE")]
    pub val_size: usize,

    /// Volumes of differing shapes feed one at a time regardless; kept for
    /// config compatibility and validated to be at least 1.
    #[serde(rename = "BATCH_SIZE")]
    pub batch_size: usize,

    #[serde(rename = "IS_TRAIN_FROM_SCRATCH", deserialize_with = "stringified_bool")]
    pub train_from_scratch: bool,

    #[serde(rename = "LOSS", default)]
    pub loss: LossKind,
}

impl RunConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on values that would otherwise surface mid-run.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.learning_rate.is_finite() && self.learning_rate > 0.0,
            "LEARNING_RATE must be a positive finite number, got {}",
            self.learning_rate
        );
        ensure!(
            self.num_epochs.is_finite() && self.num_epochs > 0.0,
            "NUM_EPOCHS must be positive, got {}",
            self.num_epochs
        );
        ensure!(self.train_size > 0, "TRAIN_SIZE must be non-zero");
        ensure!(self.augment_size > 0, "AUGMENT_SIZE must be non-zero");
        ensure!(self.val_size > 0, "VAL_SIZE must be non-zero");
        ensure!(self.batch_size >= 1, "BATCH_SIZE must be at least 1");
        Ok(())
    }

    /// Total training steps: `NUM_EPOCHS * TRAIN_SIZE * AUGMENT_SIZE`.
    pub fn total_steps(&self) -> usize {
        (self.num_epochs * (self.train_size * self.augment_size) as f64) as usize
    }

    /// Validation passes at the end of training.
    pub fn validation_passes(&self) -> usize {
        self.val_size * self.augment_size
    }
}

/// The original config carries booleans as the strings "True"/"False".
/// Accept only those (case of the first letter may vary); anything else is a
/// load-time error.
fn stringified_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.as_str() {
        "True" | "true" => Ok(true),
        "False" | "false" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected \"True\" or \"False\", got \"{other}\""
        ))),
    }
}
