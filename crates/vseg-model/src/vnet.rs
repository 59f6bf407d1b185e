//! V-Net assembly: encoder, bottleneck, decoder, output projection.
//!
//! # Architecture
//!
//! ```text
//! Input: [batch, 1, D, H, W]
//!   │
//!   ├─ Stage 1: ConvStack(16)  ──────────────── skip ─┐
//!   │    Downsample → 64, D/2                         │
//!   ├─ Stage 2: ConvStack(64)  ─────────── skip ─┐    │
//!   │    Downsample → 128, D/4                   │    │
//!   ├─ Stage 3: ConvStack(128) ────── skip ─┐    │    │
//!   │    Downsample → 256, D/8              │    │    │
//!   ├─ Stage 4: ConvStack(256) ─ skip ─┐    │    │    │
//!   │    Downsample → 512, D/16         │    │    │    │
//!   ├─ Bottleneck: ConvStack(512)       │    │    │    │
//!   ├─ Upsample → 256, D/8, concat ─────┘    │    │    │
//!   ├─ Upsample → 128, D/4, concat ──────────┘    │    │
//!   ├─ Upsample → 64,  D/2, concat ───────────────┘    │
//!   ├─ Upsample → 16,  D,   concat ────────────────────┘
//!   └─ 1x1x1 conv → [batch, 2, D, H, W] logits
//! ```
//!
//! Output spatial shape equals input spatial shape whenever the input dims
//! are divisible by 16 (four halving stages).

use burn::nn::conv::Conv3d;
use burn::prelude::*;

use crate::blocks::{ConvStack, DownsampleBlock, UpsampleBlock};
use crate::error::Result as ModelResult;
use crate::layers;

/// Configuration for the segmentation network.
#[derive(Config, Debug)]
pub struct VNetConfig {
    /// Channel widths: one per encoder stage plus the bottleneck width last.
    pub features: Vec<usize>,
    /// Input channels (1 for a raw scan).
    #[config(default = "1")]
    pub in_channels: usize,
    /// Output logit channels (background/foreground).
    #[config(default = "2")]
    pub num_classes: usize,
    /// Cubic kernel size for every conv and deconv.
    #[config(default = "3")]
    pub kernel_size: usize,
    /// Conv+ReLU layers per stack. The source architecture names its stacks
    /// "triple-conv" but composes two; two is the default here.
    #[config(default = "2")]
    pub convs_per_block: usize,
    /// Apply local response normalization after each downsampling conv.
    /// Set only for training-mode graphs.
    #[config(default = "false")]
    pub normalize_pooling: bool,
}

impl VNetConfig {
    /// The published channel schedule: 16-64-128-256 stages, 512 bottleneck.
    pub fn standard() -> Self {
        Self::new(vec![16, 64, 128, 256, 512])
    }

    /// Narrow schedule for tests and smoke runs.
    pub fn lightweight() -> Self {
        Self::new(vec![4, 8, 16, 32, 64])
    }

    /// Number of downsampling stages.
    pub fn num_stages(&self) -> usize {
        self.features.len() - 1
    }

    /// Input dims must divide by this for the output to match the input.
    pub fn spatial_divisor(&self) -> usize {
        1 << self.num_stages()
    }

    /// Initialize the network on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> VNet<B> {
        assert!(
            self.features.len() >= 2,
            "features needs at least one stage width and a bottleneck width"
        );

        let k = self.kernel_size;
        let n = self.convs_per_block;

        let mut encoder = Vec::with_capacity(self.num_stages());
        let mut in_ch = self.in_channels;
        for stage in 0..self.num_stages() {
            let width = self.features[stage];
            let pooled = self.features[stage + 1];
            encoder.push(EncoderStage {
                convs: ConvStack::new(in_ch, width, k, n, device),
                down: DownsampleBlock::new(width, pooled, k, self.normalize_pooling, device),
            });
            in_ch = pooled;
        }

        let bottleneck_ch = self.features[self.features.len() - 1];
        let bottleneck = ConvStack::new(bottleneck_ch, bottleneck_ch, k, n, device);

        // Mirrored: each decoder stage upsamples to the width of the encoder
        // stage it fuses with.
        let decoder = (0..self.num_stages())
            .rev()
            .map(|stage| {
                let in_ch = self.features[stage + 1];
                let out_ch = self.features[stage];
                UpsampleBlock::new(in_ch, out_ch, k, n, device)
            })
            .collect();

        let output = layers::conv3d(self.features[0], self.num_classes, 1, device);

        VNet {
            encoder,
            bottleneck,
            decoder,
            output,
        }
    }
}

/// One encoder stage: feature extraction plus downsampling.
#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    convs: ConvStack<B>,
    down: DownsampleBlock<B>,
}

/// Encoder-decoder segmentation network producing voxel-wise class logits.
#[derive(Module, Debug)]
pub struct VNet<B: Backend> {
    encoder: Vec<EncoderStage<B>>,
    bottleneck: ConvStack<B>,
    decoder: Vec<UpsampleBlock<B>>,
    output: Conv3d<B>,
}

impl<B: Backend> VNet<B> {
    /// Forward pass: `[batch, in, D, H, W]` → `[batch, classes, D, H, W]`
    /// logits with identity activation.
    pub fn forward(&self, input: Tensor<B, 5>) -> ModelResult<Tensor<B, 5>> {
        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut x = input;

        for stage in &self.encoder {
            let features = stage.convs.forward(x);
            skips.push(features.clone());
            x = stage.down.forward(features);
        }

        x = self.bottleneck.forward(x);

        for (block, skip) in self.decoder.iter().zip(skips.into_iter().rev()) {
            x = block.forward(x, skip)?;
        }

        Ok(self.output.forward(x))
    }

    pub fn num_stages(&self) -> usize {
        self.encoder.len()
    }
}
