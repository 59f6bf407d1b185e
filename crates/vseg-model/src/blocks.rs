//! Block builders composing layer primitives.
//!
//! Three building blocks wire the network together: `ConvStack` (stacked
//! conv+ReLU layers at a fixed width), `DownsampleBlock` (strided conv that
//! halves resolution and raises channel depth) and `UpsampleBlock`
//! (transposed conv plus skip-connection fusion).

use burn::nn::conv::{Conv3d, ConvTranspose3d};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::error::Result;
use crate::layers;

/// N stacked conv+ReLU layers at a fixed channel width.
///
/// The first layer maps `in_channels` to `out_channels`, the remaining ones
/// keep the width. The original architecture uses two layers per block.
#[derive(Module, Debug)]
pub struct ConvStack<B: Backend> {
    convs: Vec<Conv3d<B>>,
}

impl<B: Backend> ConvStack<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        num_layers: usize,
        device: &B::Device,
    ) -> Self {
        let convs = (0..num_layers)
            .map(|i| {
                let fan_in = if i == 0 { in_channels } else { out_channels };
                layers::conv3d(fan_in, out_channels, kernel_size, device)
            })
            .collect();
        Self { convs }
    }

    /// Spatial dims are preserved; channels end at the stack width.
    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut x = input;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        x
    }

    pub fn num_layers(&self) -> usize {
        self.convs.len()
    }
}

/// Strided conv + ReLU halving spatial resolution and changing channel depth,
/// with optional local response normalization.
///
/// Whether normalization runs is fixed at construction: the graph is built
/// for either a training or an evaluation run, never both.
#[derive(Module, Debug)]
pub struct DownsampleBlock<B: Backend> {
    conv: Conv3d<B>,
    normalize: bool,
}

impl<B: Backend> DownsampleBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        normalize: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: layers::strided_conv3d(in_channels, out_channels, kernel_size, device),
            normalize,
        }
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let pooled = relu(self.conv.forward(input));
        if self.normalize {
            layers::default_response_norm(pooled)
        } else {
            pooled
        }
    }
}

/// Transposed conv doubling spatial resolution, crop-and-concat with the
/// matching encoder activation, then a `ConvStack` fusing the result.
#[derive(Module, Debug)]
pub struct UpsampleBlock<B: Backend> {
    up: ConvTranspose3d<B>,
    fuse: ConvStack<B>,
}

impl<B: Backend> UpsampleBlock<B> {
    /// `in_channels` come from the stage below; `out_channels` must equal the
    /// skip connection's channel count so the fused stack sees `2 * out`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        num_layers: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            up: layers::deconv3d(in_channels, out_channels, kernel_size, device),
            fuse: ConvStack::new(
                2 * out_channels,
                out_channels,
                kernel_size,
                num_layers,
                device,
            ),
        }
    }

    /// `skip` is the encoder activation at the matching scale; it is cropped
    /// to the upsampled dims before concatenation.
    pub fn forward(&self, input: Tensor<B, 5>, skip: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        let up = relu(self.up.forward(input));
        let glued = layers::crop_and_concat(skip, up)?;
        Ok(self.fuse.forward(glued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_conv_stack_shape() {
        let device = Default::default();
        let stack = ConvStack::<TestBackend>::new(1, 4, 3, 2, &device);
        assert_eq!(stack.num_layers(), 2);

        let x = Tensor::<TestBackend, 5>::zeros([1, 1, 8, 8, 8], &device);
        assert_eq!(stack.forward(x).dims(), [1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_downsample_block_halves() {
        let device = Default::default();
        let block = DownsampleBlock::<TestBackend>::new(4, 8, 3, false, &device);
        let x = Tensor::<TestBackend, 5>::zeros([1, 4, 8, 8, 8], &device);
        assert_eq!(block.forward(x).dims(), [1, 8, 4, 4, 4]);
    }

    #[test]
    fn test_downsample_block_with_norm() {
        let device = Default::default();
        let block = DownsampleBlock::<TestBackend>::new(4, 8, 3, true, &device);
        let x = Tensor::<TestBackend, 5>::ones([1, 4, 8, 8, 8], &device);
        let out = block.forward(x);
        assert_eq!(out.dims(), [1, 8, 4, 4, 4]);
    }

    #[test]
    fn test_upsample_block_fuses_skip() {
        let device = Default::default();
        let block = UpsampleBlock::<TestBackend>::new(8, 4, 3, 2, &device);

        let input = Tensor::<TestBackend, 5>::zeros([1, 8, 4, 4, 4], &device);
        let skip = Tensor::<TestBackend, 5>::zeros([1, 4, 8, 8, 8], &device);

        let out = block.forward(input, skip).unwrap();
        assert_eq!(out.dims(), [1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_upsample_block_rejects_small_skip() {
        let device = Default::default();
        let block = UpsampleBlock::<TestBackend>::new(8, 4, 3, 2, &device);

        let input = Tensor::<TestBackend, 5>::zeros([1, 8, 4, 4, 4], &device);
        // Skip is smaller than the upsampled map: margin is negative.
        let skip = Tensor::<TestBackend, 5>::zeros([1, 4, 6, 6, 6], &device);
        assert!(block.forward(input, skip).is_err());
    }
}
