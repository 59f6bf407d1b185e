//! Layer primitives for the segmentation network.
//!
//! 3D convolution and transposed convolution with He-scaled truncated-normal
//! weight initialization, the crop-and-concat op used by skip connections,
//! and max pooling with optional local response normalization.
//!
//! All tensors use the burn layout `[batch, channel, depth, height, width]`.

use burn::module::Param;
use burn::nn::conv::{
    Conv3d, Conv3dConfig, ConvTranspose3d, ConvTranspose3dConfig,
};
use burn::nn::PaddingConfig3d;
use burn::prelude::*;
use burn::tensor::Distribution;

use crate::error::{ModelError, Result};

/// He-style standard deviation for a cubic kernel: `sqrt(2 / (k^3 * fan))`.
pub fn he_std(kernel_size: usize, fan_channels: usize) -> f64 {
    (2.0 / (kernel_size.pow(3) * fan_channels) as f64).sqrt()
}

/// Truncated-normal samples: normal draws clamped to two standard deviations.
pub fn truncated_normal<B: Backend, const D: usize>(
    shape: [usize; D],
    std: f64,
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::random(shape, Distribution::Normal(0.0, std), device)
        .clamp(-2.0 * std, 2.0 * std)
}

/// Constant bias tensor; the network initializes every bias to 0.1.
pub fn bias_tensor<B: Backend>(channels: usize, device: &B::Device) -> Tensor<B, 1> {
    Tensor::full([channels], 0.1, device)
}

fn init_conv3d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    device: &B::Device,
) -> Conv3d<B> {
    let k = kernel_size;
    let pad = (k - 1) / 2;
    let mut conv = Conv3dConfig::new([in_channels, out_channels], [k, k, k])
        .with_stride([stride, stride, stride])
        .with_padding(PaddingConfig3d::Explicit(pad, pad, pad))
        .init(device);

    // Replace the default initialization: truncated normal scaled by the
    // fan-in of the kernel, constant 0.1 bias.
    let std = he_std(k, in_channels);
    let weight = truncated_normal::<B, 5>([out_channels, in_channels, k, k, k], std, device);
    conv.weight = Param::from_tensor(weight);
    conv.bias = Some(Param::from_tensor(bias_tensor(out_channels, device)));
    conv
}

/// 3D convolution with "same" padding and unit stride; preserves spatial dims.
pub fn conv3d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    device: &B::Device,
) -> Conv3d<B> {
    init_conv3d(in_channels, out_channels, kernel_size, 1, device)
}

/// Strided 3D convolution used as a pooling layer; spatial dims become
/// `ceil(dim / 2)`, exact halves when the input dims are even.
pub fn strided_conv3d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    device: &B::Device,
) -> Conv3d<B> {
    init_conv3d(in_channels, out_channels, kernel_size, 2, device)
}

/// 3D transposed convolution with stride 2, doubling each spatial dimension.
///
/// The weight layout is `[in_channels, out_channels, k, k, k]` — in/out are
/// swapped relative to the forward convolution, and the He fan uses the
/// *input* channel count. Getting either wrong silently corrupts the
/// initialization scale, so both are pinned here.
pub fn deconv3d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    device: &B::Device,
) -> ConvTranspose3d<B> {
    let k = kernel_size;
    let pad = (k - 1) / 2;
    // out = (in - 1) * 2 - 2*pad + k + out_pad; pad=(k-1)/2, out_pad=1 gives 2*in.
    let mut deconv = ConvTranspose3dConfig::new([in_channels, out_channels], [k, k, k])
        .with_stride([2, 2, 2])
        .with_padding([pad, pad, pad])
        .with_padding_out([1, 1, 1])
        .init(device);

    let std = he_std(k, in_channels);
    let weight = truncated_normal::<B, 5>([in_channels, out_channels, k, k, k], std, device);
    deconv.weight = Param::from_tensor(weight);
    deconv.bias = Some(Param::from_tensor(bias_tensor(out_channels, device)));
    deconv
}

/// Center-crop `lhs` to the spatial dims of `rhs`, then concatenate along the
/// channel axis (`lhs` channels first).
///
/// Errors when a spatial margin is negative (nothing to crop from) or odd
/// (the crop cannot be centered).
pub fn crop_and_concat<B: Backend>(
    lhs: Tensor<B, 5>,
    rhs: Tensor<B, 5>,
) -> Result<Tensor<B, 5>> {
    let [lb, lc, ld, lh, lw] = lhs.dims();
    let [rb, _rc, rd, rh, rw] = rhs.dims();

    if lb != rb {
        return Err(ModelError::ShapeMismatch {
            expected: lhs.dims().to_vec(),
            actual: rhs.dims().to_vec(),
        });
    }

    let mut offsets = [0usize; 3];
    for (axis, (large, small)) in [(ld, rd), (lh, rh), (lw, rw)].into_iter().enumerate() {
        let margin = large as i64 - small as i64;
        if margin < 0 || margin % 2 != 0 {
            return Err(ModelError::UncenteredCrop { axis, margin });
        }
        offsets[axis] = (margin / 2) as usize;
    }

    let [od, oh, ow] = offsets;
    let cropped = lhs.slice([
        0..lb,
        0..lc,
        od..od + rd,
        oh..oh + rh,
        ow..ow + rw,
    ]);
    Ok(Tensor::cat(vec![cropped, rhs], 1))
}

/// Non-overlapping 3D max pooling with window and stride `n`.
///
/// Spatial dims must divide evenly by `n`; the window reshape below is only
/// valid for exact tilings.
pub fn max_pool3d<B: Backend>(x: Tensor<B, 5>, n: usize) -> Result<Tensor<B, 5>> {
    let [b, c, d, h, w] = x.dims();
    if d % n != 0 || h % n != 0 || w % n != 0 {
        return Err(ModelError::PoolWindowMismatch {
            dims: [d, h, w],
            window: n,
        });
    }

    let (dn, hn, wn) = (d / n, h / n, w / n);
    let pooled = x
        .reshape([b, c, dn, n, hn, n, wn, n])
        .max_dim(7)
        .max_dim(5)
        .max_dim(3)
        .reshape([b, c, dn, hn, wn]);
    Ok(pooled)
}

/// Local response normalization across the channel axis:
/// `x / (bias + alpha * sum_{|j| <= radius} x_j^2)^beta`.
pub fn local_response_norm<B: Backend>(
    x: Tensor<B, 5>,
    radius: usize,
    bias: f64,
    alpha: f64,
    beta: f64,
) -> Tensor<B, 5> {
    let [b, c, d, h, w] = x.dims();
    let device = x.device();
    let squared = x.clone().powf_scalar(2.0);

    let mut acc = squared.clone();
    for offset in 1..=radius.min(c.saturating_sub(1)) {
        let pad = Tensor::zeros([b, offset, d, h, w], &device);
        // Channels above the current one.
        let upper = squared.clone().slice([0..b, offset..c, 0..d, 0..h, 0..w]);
        acc = acc + Tensor::cat(vec![upper, pad.clone()], 1);
        // Channels below.
        let lower = squared.clone().slice([0..b, 0..c - offset, 0..d, 0..h, 0..w]);
        acc = acc + Tensor::cat(vec![pad, lower], 1);
    }

    let denom = acc.mul_scalar(alpha).add_scalar(bias).powf_scalar(beta);
    x / denom
}

/// LRN with the constants the training graph uses.
pub fn default_response_norm<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 5> {
    local_response_norm(x, 4, 1.0, 0.001 / 9.0, 0.75)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_he_std() {
        let std = he_std(3, 16);
        let expected = (2.0f64 / (27.0 * 16.0)).sqrt();
        assert!((std - expected).abs() < 1e-12);
    }

    #[test]
    fn test_truncated_normal_bounds() {
        let device = Default::default();
        let std = 0.1;
        let t = truncated_normal::<TestBackend, 2>([64, 64], std, &device);
        let max = t.clone().max().into_scalar();
        let min = t.min().into_scalar();
        assert!(max <= (2.0 * std) as f32 + 1e-6);
        assert!(min >= (-2.0 * std) as f32 - 1e-6);
    }

    #[test]
    fn test_conv3d_preserves_spatial_dims() {
        let device = Default::default();
        let conv = conv3d::<TestBackend>(1, 4, 3, &device);
        let x = Tensor::<TestBackend, 5>::zeros([1, 1, 8, 8, 8], &device);
        assert_eq!(conv.forward(x).dims(), [1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_strided_conv_halves_spatial_dims() {
        let device = Default::default();
        let conv = strided_conv3d::<TestBackend>(4, 8, 3, &device);
        let x = Tensor::<TestBackend, 5>::zeros([1, 4, 8, 8, 8], &device);
        assert_eq!(conv.forward(x).dims(), [1, 8, 4, 4, 4]);
    }

    #[test]
    fn test_deconv_doubles_spatial_dims() {
        let device = Default::default();
        let deconv = deconv3d::<TestBackend>(8, 4, 3, &device);
        let x = Tensor::<TestBackend, 5>::zeros([1, 8, 4, 4, 4], &device);
        assert_eq!(deconv.forward(x).dims(), [1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_crop_and_concat_centered() {
        let device = Default::default();
        // lhs spatial 8, rhs spatial 4: margin 4, offset 2 on every axis.
        let lhs = Tensor::<TestBackend, 5>::zeros([1, 3, 8, 8, 8], &device);
        let marker = Tensor::<TestBackend, 5>::ones([1, 3, 4, 4, 4], &device);
        let lhs = lhs.slice_assign([0..1, 0..3, 2..6, 2..6, 2..6], marker);
        let rhs = Tensor::<TestBackend, 5>::zeros([1, 2, 4, 4, 4], &device);

        let out = crop_and_concat(lhs, rhs).unwrap();
        assert_eq!(out.dims(), [1, 5, 4, 4, 4]);

        // The centered crop picked up exactly the marker block.
        let lhs_part = out.slice([0..1, 0..3, 0..4, 0..4, 0..4]);
        assert_eq!(lhs_part.sum().into_scalar(), (3 * 4 * 4 * 4) as f32);
    }

    #[test]
    fn test_crop_and_concat_zero_margin() {
        let device = Default::default();
        let lhs = Tensor::<TestBackend, 5>::ones([1, 2, 4, 4, 4], &device);
        let rhs = Tensor::<TestBackend, 5>::zeros([1, 2, 4, 4, 4], &device);
        let out = crop_and_concat(lhs, rhs).unwrap();
        assert_eq!(out.dims(), [1, 4, 4, 4, 4]);
    }

    #[test]
    fn test_crop_and_concat_rejects_negative_margin() {
        let device = Default::default();
        let lhs = Tensor::<TestBackend, 5>::zeros([1, 2, 4, 4, 4], &device);
        let rhs = Tensor::<TestBackend, 5>::zeros([1, 2, 8, 8, 8], &device);
        let err = crop_and_concat(lhs, rhs).unwrap_err();
        assert!(matches!(err, ModelError::UncenteredCrop { margin: -4, .. }));
    }

    #[test]
    fn test_crop_and_concat_rejects_odd_margin() {
        let device = Default::default();
        let lhs = Tensor::<TestBackend, 5>::zeros([1, 2, 7, 7, 7], &device);
        let rhs = Tensor::<TestBackend, 5>::zeros([1, 2, 4, 4, 4], &device);
        let err = crop_and_concat(lhs, rhs).unwrap_err();
        assert!(matches!(err, ModelError::UncenteredCrop { margin: 3, .. }));
    }

    #[test]
    fn test_max_pool3d_values() {
        let device = Default::default();
        let data = TensorData::new(
            (0..8).map(|v| v as f32).collect::<Vec<_>>(),
            [1, 1, 2, 2, 2],
        );
        let x = Tensor::<TestBackend, 5>::from_data(data, &device);
        let pooled = max_pool3d(x, 2).unwrap();
        assert_eq!(pooled.dims(), [1, 1, 1, 1, 1]);
        assert_eq!(pooled.into_scalar(), 7.0);
    }

    #[test]
    fn test_max_pool3d_shape_and_error() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::zeros([1, 2, 8, 8, 8], &device);
        assert_eq!(max_pool3d(x, 2).unwrap().dims(), [1, 2, 4, 4, 4]);

        let x = Tensor::<TestBackend, 5>::zeros([1, 2, 7, 8, 8], &device);
        let err = max_pool3d(x, 2).unwrap_err();
        assert!(matches!(err, ModelError::PoolWindowMismatch { window: 2, .. }));
    }

    #[test]
    fn test_local_response_norm_shape_and_scale() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::ones([1, 8, 2, 2, 2], &device);
        let out = default_response_norm(x);
        assert_eq!(out.dims(), [1, 8, 2, 2, 2]);

        // Denominator > 1, so every value shrinks below 1.
        let max = out.max().into_scalar();
        assert!(max < 1.0);
        assert!(max > 0.0);
    }
}
