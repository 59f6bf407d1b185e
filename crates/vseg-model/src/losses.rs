//! Segmentation losses.
//!
//! Both losses take the softmax *probabilities* `[batch, 2, D, H, W]`
//! (background channel 0, foreground channel 1) and the float label volume
//! `[batch, 1, D, H, W]`. The caller applies the softmax once and picks the
//! loss; the original training run used weighted cross-entropy with the Dice
//! loss available as an alternative.

use burn::prelude::*;
use std::marker::PhantomData;

/// Dice loss over the foreground channel only, to avoid background-class
/// dominance.
///
/// `1 - clamp(2I / (U + eps), 0, 1 - 1e-7)` with `I = sum(p * y)` and
/// `U = sum(p^2) + sum(y^2)`. The epsilon keeps the all-zero case at zero
/// overlap instead of dividing by zero, and the clamp bounds the loss to
/// `[0, 1]`.
#[derive(Module, Debug)]
pub struct DiceLoss<B: Backend> {
    epsilon: f32,
    phantom: PhantomData<B>,
}

impl<B: Backend> DiceLoss<B> {
    pub fn new() -> Self {
        Self {
            epsilon: 1e-7,
            phantom: PhantomData,
        }
    }

    pub fn forward(&self, label: Tensor<B, 5>, probs: Tensor<B, 5>) -> Tensor<B, 1> {
        let [b, _c, d, h, w] = probs.dims();
        let foreground = probs.slice([0..b, 1..2, 0..d, 0..h, 0..w]);

        let intersection = (foreground.clone() * label.clone()).sum();
        let union = foreground.powf_scalar(2.0).sum() + label.powf_scalar(2.0).sum();

        let dice = intersection
            .mul_scalar(2.0)
            .div(union.add_scalar(self.epsilon));
        dice.clamp(0.0, 1.0 - 1e-7).neg().add_scalar(1.0)
    }
}

impl<B: Backend> Default for DiceLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Voxel-wise cross-entropy reweighted by the per-voxel weight map:
/// `-mean(w * (y * ln(p_fg) + (1 - y) * ln(p_bg)))`.
#[derive(Module, Debug)]
pub struct WeightedCrossEntropyLoss<B: Backend> {
    epsilon: f32,
    phantom: PhantomData<B>,
}

impl<B: Backend> WeightedCrossEntropyLoss<B> {
    pub fn new() -> Self {
        Self {
            epsilon: 1e-7,
            phantom: PhantomData,
        }
    }

    pub fn forward(
        &self,
        label: Tensor<B, 5>,
        probs: Tensor<B, 5>,
        weight_map: Tensor<B, 5>,
    ) -> Tensor<B, 1> {
        let [b, _c, d, h, w] = probs.dims();
        // Clamp before the log so a saturated softmax cannot produce -inf.
        let probs = probs.clamp(self.epsilon, 1.0);
        let p_bg = probs.clone().slice([0..b, 0..1, 0..d, 0..h, 0..w]);
        let p_fg = probs.slice([0..b, 1..2, 0..d, 0..h, 0..w]);

        let ones = label.ones_like();
        let log_likelihood =
            label.clone() * p_fg.log() + (ones - label) * p_bg.log();
        (weight_map * log_likelihood).mean().neg()
    }
}

impl<B: Backend> Default for WeightedCrossEntropyLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::activation::softmax;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn probs_for_logit(fg_logit: f32, shape: [usize; 4]) -> Tensor<TestBackend, 5> {
        let device = Default::default();
        let [b, d, h, w] = shape;
        let bg = Tensor::<TestBackend, 5>::zeros([b, 1, d, h, w], &device);
        let fg = Tensor::<TestBackend, 5>::full([b, 1, d, h, w], fg_logit, &device);
        softmax(Tensor::cat(vec![bg, fg], 1), 1)
    }

    #[test]
    fn test_dice_loss_bounds_all_zero() {
        let device = Default::default();
        let loss = DiceLoss::<TestBackend>::new();

        // Degenerate case: no foreground anywhere, zero probabilities.
        let label = Tensor::<TestBackend, 5>::zeros([1, 1, 4, 4, 4], &device);
        let probs = Tensor::<TestBackend, 5>::zeros([1, 2, 4, 4, 4], &device);
        let value = loss.forward(label, probs).into_scalar();
        assert!(value.is_finite());
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn test_dice_loss_low_for_confident_match() {
        let device = Default::default();
        let loss = DiceLoss::<TestBackend>::new();

        let label = Tensor::<TestBackend, 5>::ones([1, 1, 4, 4, 4], &device);
        let probs = probs_for_logit(12.0, [1, 4, 4, 4]);
        let value = loss.forward(label, probs).into_scalar();
        assert!(value >= 0.0);
        assert!(value < 0.01);
    }

    #[test]
    fn test_dice_loss_high_for_miss() {
        let device = Default::default();
        let loss = DiceLoss::<TestBackend>::new();

        let label = Tensor::<TestBackend, 5>::ones([1, 1, 4, 4, 4], &device);
        let probs = probs_for_logit(-12.0, [1, 4, 4, 4]);
        let value = loss.forward(label, probs).into_scalar();
        assert!(value > 0.9);
        assert!(value <= 1.0);
    }

    #[test]
    fn test_cross_entropy_finite_and_ordered() {
        let device = Default::default();
        let loss = WeightedCrossEntropyLoss::<TestBackend>::new();

        let label = Tensor::<TestBackend, 5>::ones([1, 1, 4, 4, 4], &device);
        let weights = Tensor::<TestBackend, 5>::ones([1, 1, 4, 4, 4], &device);

        let good = loss
            .forward(label.clone(), probs_for_logit(6.0, [1, 4, 4, 4]), weights.clone())
            .into_scalar();
        let bad = loss
            .forward(label, probs_for_logit(-6.0, [1, 4, 4, 4]), weights)
            .into_scalar();

        assert!(good.is_finite() && bad.is_finite());
        assert!(good >= 0.0);
        assert!(bad > good);
    }

    #[test]
    fn test_cross_entropy_weight_scaling() {
        let device = Default::default();
        let loss = WeightedCrossEntropyLoss::<TestBackend>::new();

        let label = Tensor::<TestBackend, 5>::ones([1, 1, 4, 4, 4], &device);
        let probs = probs_for_logit(-2.0, [1, 4, 4, 4]);
        let w1 = Tensor::<TestBackend, 5>::ones([1, 1, 4, 4, 4], &device);
        let w3 = Tensor::<TestBackend, 5>::full([1, 1, 4, 4, 4], 3.0, &device);

        let base = loss.forward(label.clone(), probs.clone(), w1).into_scalar();
        let scaled = loss.forward(label, probs, w3).into_scalar();
        assert!((scaled - 3.0 * base).abs() < 1e-4);
    }
}
