//! V-Net style volumetric segmentation network.
//!
//! Encoder-decoder convolutional network for voxel-wise foreground/background
//! segmentation of 3D medical scans, built on burn tensors and modules.
//!
//! # Module Structure
//!
//! ```text
//! vseg-model/
//! ├── layers/   - conv/deconv primitives, init, crop-and-concat, pooling
//! ├── blocks/   - conv stacks, downsample and upsample blocks
//! ├── vnet/     - full encoder-decoder assembly
//! ├── losses/   - Dice and weighted cross-entropy losses
//! ├── metrics/  - evaluation metrics and tensor statistics
//! └── error/    - model error type
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vseg_model::vnet::VNetConfig;
//! use burn::tensor::Tensor;
//! use burn_ndarray::NdArray;
//!
//! type B = NdArray;
//! let device = Default::default();
//!
//! let net = VNetConfig::lightweight().init::<B>(&device);
//! let volume = Tensor::<B, 5>::zeros([1, 1, 32, 32, 32], &device);
//! let logits = net.forward(volume).unwrap();
//! assert_eq!(logits.dims(), [1, 2, 32, 32, 32]);
//! ```

pub mod blocks;
pub mod error;
pub mod layers;
pub mod losses;
pub mod metrics;
pub mod vnet;

pub use error::{ModelError, Result};
pub use vnet::{VNet, VNetConfig};
