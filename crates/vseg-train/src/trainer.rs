//! Training loop: step iteration, periodic evaluation, checkpointing and
//! summary logging.
//!
//! One step fully completes before the next begins; parameters move through
//! the optimizer by value and are never touched concurrently with a forward
//! pass. There is no retry logic — any failure propagates out of [`Trainer::run`]
//! and ends the run.

use anyhow::{ensure, Context, Result};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use vseg_model::losses::{DiceLoss, WeightedCrossEntropyLoss};
use vseg_model::metrics::{dice_overlap_percent, foreground_mask, voxel_accuracy, TensorStats};
use vseg_model::{VNet, VNetConfig};

use crate::checkpoint;
use crate::config::{LossKind, Mode, RunConfig};
use crate::data::{Partitions, Split, VolumeSample, VolumeSource};
use crate::summary::SummaryWriter;

/// Every 10th step evaluates on the test split instead of training.
const EVAL_INTERVAL: usize = 10;
/// Every 200th step also writes a checkpoint and slice images.
const CHECKPOINT_INTERVAL: usize = 200;

/// Outcome of a run.
#[derive(Debug, Clone, Copy)]
pub struct TrainReport {
    pub steps_completed: usize,
    pub final_accuracy: f64,
}

struct Evaluation {
    loss: f64,
    accuracy: f64,
    dice: f64,
}

/// Drives training (or an evaluation sweep) of a [`VNet`] over a volume
/// source, per the run configuration.
pub struct Trainer<'a, B: AutodiffBackend> {
    config: &'a RunConfig,
    source: &'a dyn VolumeSource,
    device: B::Device,
    net_config: VNetConfig,
    seed: u64,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(config: &'a RunConfig, source: &'a dyn VolumeSource, device: B::Device) -> Self {
        // Response normalization only exists in training-mode graphs.
        let net_config = VNetConfig::standard()
            .with_normalize_pooling(config.use_batch_norm && config.mode == Mode::Train);
        Self {
            config,
            source,
            device,
            net_config,
            seed: rand::random(),
        }
    }

    /// Override the network configuration (narrow schedules for smoke runs).
    pub fn with_net_config(mut self, net_config: VNetConfig) -> Self {
        self.net_config = net_config;
        self
    }

    /// Fix the batch-selection seed for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn run(self) -> Result<TrainReport> {
        match self.config.mode {
            Mode::Train => self.train(),
            Mode::Test => self.evaluate_split(Split::Test),
            Mode::Val => self.evaluate_split(Split::Val),
        }
    }

    fn train(self) -> Result<TrainReport> {
        let config = self.config;
        let partitions =
            Partitions::derive(self.source.len(), config.train_size, config.val_size)?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        if config.train_from_scratch && config.log_dir.exists() {
            std::fs::remove_dir_all(&config.log_dir)
                .with_context(|| format!("Failed to clear log dir {}", config.log_dir.display()))?;
        }
        let mut train_writer = SummaryWriter::create(config.log_dir.join("train"))?;
        let mut test_writer = SummaryWriter::create(config.log_dir.join("test"))?;

        let mut model: VNet<B> = self.net_config.init(&self.device);
        let mut start = 0;
        if config.train_from_scratch {
            info!("Initializing parameters from scratch");
        } else {
            match checkpoint::latest(&config.checkpoints_dir)? {
                Some((stem, step)) => {
                    model = checkpoint::load(model, &stem, &self.device)?;
                    start = step;
                    info!("Resuming training from step {step} ({})", stem.display());
                }
                None => warn!(
                    "No checkpoint found in {}; initializing from scratch",
                    config.checkpoints_dir.display()
                ),
            }
        }

        let end = config.total_steps();
        let mut optimizer = AdamConfig::new().init();
        let cross_entropy = WeightedCrossEntropyLoss::new();
        let dice_loss = DiceLoss::new();

        let bar = ProgressBar::new(end as u64);
        let style = ProgressStyle::with_template("{bar:40} {pos}/{len} steps {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_position(start as u64);

        for step in start..end {
            if step % EVAL_INTERVAL == 0 {
                let index = partitions.sample(Split::Test, &mut rng);
                let sample = self.source.load(index)?;
                let valid = model.valid();

                let image = self.tensor(&sample.image);
                let label = self.tensor(&sample.label);
                let weight = self.tensor(&sample.weight);

                let logits = valid.forward(image.clone())?;
                let eval = self.score(&logits, &label, &weight)?;
                test_writer.scalar(step, "total_loss", eval.loss)?;
                test_writer.scalar(step, "accuracy", eval.accuracy)?;
                test_writer.scalar(step, "dice", eval.dice)?;
                info!(
                    "Testing accuracy at step {step}: {:.4}\tdice overlap percentage: {:.2}",
                    eval.accuracy, eval.dice
                );

                if step % CHECKPOINT_INTERVAL == 0 {
                    let stem = checkpoint::save(&model, &config.checkpoints_dir, step)?;
                    info!("Checkpoint written to {}", stem.display());

                    let prediction = foreground_mask(logits.clone());
                    test_writer.image_slice(step, "image", &image)?;
                    test_writer.image_slice(step, "label", &label)?;
                    test_writer.image_slice(step, "prediction", &prediction)?;

                    let stats = TensorStats::of(&logits);
                    test_writer.scalar(step, "logits/mean", stats.mean)?;
                    test_writer.scalar(step, "logits/stddev", stats.stddev)?;
                    test_writer.scalar(step, "logits/min", stats.min)?;
                    test_writer.scalar(step, "logits/max", stats.max)?;
                }
            } else {
                let index = partitions.sample(Split::Train, &mut rng);
                let sample = self.source.load(index)?;

                let mut image: Tensor<B, 5> = self.tensor(&sample.image);
                let mut label: Tensor<B, 5> = self.tensor(&sample.label);
                let mut weight: Tensor<B, 5> = self.tensor(&sample.weight);
                if config.augment_size > 1 {
                    // Random axis flips stand in for the offline augmentation
                    // the AUGMENT_SIZE factor accounts for.
                    for axis in [2, 3, 4] {
                        if rng.gen_bool(0.5) {
                            image = image.flip([axis]);
                            label = label.flip([axis]);
                            weight = weight.flip([axis]);
                        }
                    }
                }

                let logits = model.forward(image)?;
                let probs = softmax(logits, 1);
                let loss = match config.loss {
                    LossKind::CrossEntropy => cross_entropy.forward(label, probs, weight),
                    LossKind::Dice => dice_loss.forward(label, probs),
                };

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(config.learning_rate, model, grads);

                let value: f64 = loss.into_scalar().elem();
                ensure!(
                    value.is_finite(),
                    "Non-finite training loss {value} at step {step}"
                );
                train_writer.scalar(step, "total_loss", value)?;
            }
            bar.set_position(step as u64 + 1);
        }
        bar.finish_and_clear();

        // Final validation pass over randomly drawn validation volumes.
        let valid = model.valid();
        let mut accuracies = Vec::with_capacity(config.validation_passes());
        for _ in 0..config.validation_passes() {
            let index = partitions.sample(Split::Val, &mut rng);
            let sample = self.source.load(index)?;
            accuracies.push(self.evaluate_sample(&valid, &sample)?.accuracy);
        }
        let final_accuracy = mean(&accuracies);
        info!("Final accuracy is {final_accuracy:7.3}");

        Ok(TrainReport {
            steps_completed: end.saturating_sub(start),
            final_accuracy,
        })
    }

    /// Single sweep over one split with a restored (or fresh) model; used for
    /// the test/val run modes.
    fn evaluate_split(self, split: Split) -> Result<TrainReport> {
        let config = self.config;
        let partitions =
            Partitions::derive(self.source.len(), config.train_size, config.val_size)?;

        let mut model: VNet<B> = self.net_config.init(&self.device);
        if let Some((stem, step)) = checkpoint::latest(&config.checkpoints_dir)? {
            model = checkpoint::load(model, &stem, &self.device)?;
            info!("Evaluating checkpoint from step {step}");
        } else {
            warn!("No checkpoint found; evaluating freshly initialized parameters");
        }
        let valid = model.valid();

        let range = partitions.range(split);
        let mut accuracies = Vec::with_capacity(range.len());
        for index in range {
            let sample = self.source.load(index)?;
            let eval = self.evaluate_sample(&valid, &sample)?;
            info!(
                "Volume {index}: accuracy {:.4}\tdice overlap percentage: {:.2}",
                eval.accuracy, eval.dice
            );
            accuracies.push(eval.accuracy);
        }

        let final_accuracy = mean(&accuracies);
        info!("Final accuracy is {final_accuracy:7.3}");
        Ok(TrainReport {
            steps_completed: accuracies.len(),
            final_accuracy,
        })
    }

    fn evaluate_sample(
        &self,
        model: &VNet<B::InnerBackend>,
        sample: &VolumeSample,
    ) -> Result<Evaluation> {
        let image = self.tensor(&sample.image);
        let label = self.tensor(&sample.label);
        let weight = self.tensor(&sample.weight);
        let logits = model.forward(image)?;
        self.score(&logits, &label, &weight)
    }

    fn score(
        &self,
        logits: &Tensor<B::InnerBackend, 5>,
        label: &Tensor<B::InnerBackend, 5>,
        weight: &Tensor<B::InnerBackend, 5>,
    ) -> Result<Evaluation> {
        let probs = softmax(logits.clone(), 1);
        let loss = match self.config.loss {
            LossKind::CrossEntropy => {
                WeightedCrossEntropyLoss::new().forward(label.clone(), probs, weight.clone())
            }
            LossKind::Dice => DiceLoss::new().forward(label.clone(), probs),
        };
        let loss: f64 = loss.into_scalar().elem();
        ensure!(loss.is_finite(), "Non-finite evaluation loss {loss}");

        let prediction = foreground_mask(logits.clone());
        Ok(Evaluation {
            loss,
            accuracy: voxel_accuracy(prediction.clone(), label.clone()),
            dice: dice_overlap_percent(prediction, label.clone()),
        })
    }

    fn tensor<B2: Backend<Device = B::Device>>(&self, data: &TensorData) -> Tensor<B2, 5> {
        Tensor::from_data(data.clone(), &self.device)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
