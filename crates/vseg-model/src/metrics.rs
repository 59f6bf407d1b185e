//! Evaluation metrics and tensor statistics.
//!
//! Metrics are plain functions computed on demand by the caller; nothing here
//! writes logs or registers side effects. The trainer decides what to record.

use burn::prelude::*;
use burn::tensor::ElementConversion;

/// Collapse class logits `[batch, classes, D, H, W]` into a float foreground
/// mask `[batch, 1, D, H, W]` via channel argmax.
pub fn foreground_mask<B: Backend>(logits: Tensor<B, 5>) -> Tensor<B, 5> {
    logits.argmax(1).float()
}

/// Dice overlap between two binary float masks, as a 0-100 percentage for
/// human-readable logging.
///
/// Exactly 100 on an exact match, exactly 0 on disjoint non-empty masks.
/// Two empty masks count as a perfect match.
pub fn dice_overlap_percent<B: Backend>(pred: Tensor<B, 5>, truth: Tensor<B, 5>) -> f64 {
    let intersection: f64 = (pred.clone() * truth.clone()).sum().into_scalar().elem();
    let total: f64 = pred.sum().into_scalar().elem::<f64>()
        + truth.sum().into_scalar().elem::<f64>();

    if total == 0.0 {
        return 100.0;
    }
    2.0 * intersection / total * 100.0
}

/// Fraction of voxels where prediction and ground truth agree.
pub fn voxel_accuracy<B: Backend>(pred: Tensor<B, 5>, truth: Tensor<B, 5>) -> f64 {
    pred.equal(truth).float().mean().into_scalar().elem()
}

/// Summary statistics of a tensor, computed explicitly when the caller wants
/// them logged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorStats {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl TensorStats {
    pub fn of<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Self {
        let mean: f64 = tensor.clone().mean().into_scalar().elem();
        let variance: f64 = tensor
            .clone()
            .sub_scalar(mean)
            .powf_scalar(2.0)
            .mean()
            .into_scalar()
            .elem();
        Self {
            mean,
            stddev: variance.max(0.0).sqrt(),
            min: tensor.clone().min().into_scalar().elem(),
            max: tensor.clone().max().into_scalar().elem(),
        }
    }
}
