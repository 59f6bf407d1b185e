//! Data feeding: labeled volume sources and train/test/val partitioning.
//!
//! A [`VolumeSource`] hands out one labeled volume per index as host-side
//! [`TensorData`]; the trainer moves samples onto the backend device. Index
//! ranges are partitioned from the configured sizes, never hard-coded.

use anyhow::{bail, ensure, Context, Result};
use burn::tensor::TensorData;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// One labeled volume: image, label mask and per-voxel loss weights, all
/// shaped `[1, 1, D, H, W]` with identical spatial dims.
#[derive(Debug, Clone)]
pub struct VolumeSample {
    pub image: TensorData,
    pub label: TensorData,
    pub weight: TensorData,
}

/// Source of labeled volumes, indexed `0..len()`.
pub trait VolumeSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize) -> Result<VolumeSample>;
}

/// Index ranges for the three splits: train takes the first `train_size`
/// indices, validation the last `val_size`, test whatever sits between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    pub train: Range<usize>,
    pub test: Range<usize>,
    pub val: Range<usize>,
}

impl Partitions {
    pub fn derive(total: usize, train_size: usize, val_size: usize) -> Result<Self> {
        ensure!(
            train_size + val_size < total,
            "Need at least one test volume: {total} total, {train_size} train + {val_size} val"
        );
        Ok(Self {
            train: 0..train_size,
            test: train_size..total - val_size,
            val: total - val_size..total,
        })
    }

    /// Draw a random index from the given split.
    pub fn sample(&self, split: Split, rng: &mut StdRng) -> usize {
        let range = match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
            Split::Val => &self.val,
        };
        rng.gen_range(range.clone())
    }

    pub fn range(&self, split: Split) -> Range<usize> {
        match split {
            Split::Train => self.train.clone(),
            Split::Test => self.test.clone(),
            Split::Val => self.val.clone(),
        }
    }
}

/// Data split selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
    Val,
}

/// Reads `image_NNN`, `label_NNN` and `weight_NNN` NIfTI volumes from a
/// directory (`.nii` or `.nii.gz`).
pub struct NiftiVolumeSource {
    dir: PathBuf,
    count: usize,
}

impl NiftiVolumeSource {
    /// Scan `dir` for consecutively numbered image volumes starting at 0.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure!(dir.is_dir(), "Data directory {} does not exist", dir.display());

        let mut count = 0;
        while volume_path(&dir, "image", count).is_some() {
            count += 1;
        }
        ensure!(count > 0, "No image_000.nii[.gz] found in {}", dir.display());

        Ok(Self { dir, count })
    }

    fn read_volume(&self, prefix: &str, index: usize) -> Result<(Vec<f32>, [usize; 3])> {
        let path = volume_path(&self.dir, prefix, index)
            .with_context(|| format!("Missing {prefix} volume for index {index}"))?;
        let obj = ReaderOptions::new()
            .read_file(&path)
            .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
        let volume = obj
            .into_volume()
            .into_ndarray::<f32>()
            .context("Failed to convert NIfTI volume to ndarray")?;

        let shape = volume.shape().to_vec();
        if shape.len() != 3 {
            bail!(
                "Expected 3D volume in {}, found {} dimensions",
                path.display(),
                shape.len()
            );
        }
        let dims = [shape[0], shape[1], shape[2]];
        let values = volume.as_standard_layout().into_owned().into_raw_vec();
        Ok((values, dims))
    }
}

fn volume_path(dir: &Path, prefix: &str, index: usize) -> Option<PathBuf> {
    for ext in ["nii.gz", "nii"] {
        let candidate = dir.join(format!("{prefix}_{index:03}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

impl VolumeSource for NiftiVolumeSource {
    fn len(&self) -> usize {
        self.count
    }

    fn load(&self, index: usize) -> Result<VolumeSample> {
        ensure!(index < self.count, "Volume index {index} out of range");

        let (image, dims) = self.read_volume("image", index)?;
        let (label, label_dims) = self.read_volume("label", index)?;
        let (weight, weight_dims) = self.read_volume("weight", index)?;
        ensure!(
            dims == label_dims && dims == weight_dims,
            "Volume {index}: image {dims:?}, label {label_dims:?}, weight {weight_dims:?} disagree"
        );

        let [d, h, w] = dims;
        let shape = [1, 1, d, h, w];
        Ok(VolumeSample {
            image: TensorData::new(image, shape),
            label: TensorData::new(label, shape),
            weight: TensorData::new(weight, shape),
        })
    }
}

/// Deterministic phantom volumes: a bright cube on a dark background, with
/// foreground voxels upweighted. Index seeds the generator, so a given index
/// always produces the same volume.
pub struct SyntheticVolumeSource {
    count: usize,
    extent: usize,
}

impl SyntheticVolumeSource {
    pub fn new(count: usize, extent: usize) -> Self {
        Self { count, extent }
    }
}

impl VolumeSource for SyntheticVolumeSource {
    fn len(&self) -> usize {
        self.count
    }

    fn load(&self, index: usize) -> Result<VolumeSample> {
        ensure!(index < self.count, "Volume index {index} out of range");

        let mut rng = StdRng::seed_from_u64(index as u64);
        let e = self.extent;
        let half = rng.gen_range(e / 8..=e / 4);
        let center = [
            rng.gen_range(half..e - half),
            rng.gen_range(half..e - half),
            rng.gen_range(half..e - half),
        ];

        let voxels = e * e * e;
        let mut image = Vec::with_capacity(voxels);
        let mut label: Vec<f32> = Vec::with_capacity(voxels);
        let mut weight: Vec<f32> = Vec::with_capacity(voxels);

        for z in 0..e {
            for y in 0..e {
                for x in 0..e {
                    let inside = [z, y, x]
                        .iter()
                        .zip(center.iter())
                        .all(|(&p, &c)| p.abs_diff(c) < half);
                    let noise = (rng.gen::<f32>() - 0.5) * 0.1;
                    if inside {
                        image.push(0.8 + noise);
                        label.push(1.0);
                        weight.push(5.0);
                    } else {
                        image.push(0.2 + noise);
                        label.push(0.0);
                        weight.push(1.0);
                    }
                }
            }
        }

        let shape = [1, 1, e, e, e];
        Ok(VolumeSample {
            image: TensorData::new(image, shape),
            label: TensorData::new(label, shape),
            weight: TensorData::new(weight, shape),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_convention() {
        // 15 volumes, 10 train, 2 val: the 0-9 / 10-12 / 13-14 convention.
        let parts = Partitions::derive(15, 10, 2).unwrap();
        assert_eq!(parts.train, 0..10);
        assert_eq!(parts.test, 10..13);
        assert_eq!(parts.val, 13..15);
    }

    #[test]
    fn test_partition_requires_test_volumes() {
        assert!(Partitions::derive(12, 10, 2).is_err());
        assert!(Partitions::derive(13, 10, 2).is_ok());
    }

    #[test]
    fn test_partition_sampling_stays_in_range() {
        let parts = Partitions::derive(15, 10, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert!(parts.train.contains(&parts.sample(Split::Train, &mut rng)));
            assert!(parts.test.contains(&parts.sample(Split::Test, &mut rng)));
            assert!(parts.val.contains(&parts.sample(Split::Val, &mut rng)));
        }
    }

    #[test]
    fn test_synthetic_source_shapes_and_determinism() {
        let source = SyntheticVolumeSource::new(4, 16);
        assert_eq!(source.len(), 4);

        let a = source.load(2).unwrap();
        let b = source.load(2).unwrap();
        assert_eq!(a.image.shape, vec![1, 1, 16, 16, 16]);
        assert_eq!(a.image, b.image);
        assert_eq!(a.label, b.label);

        // Different indices give different phantoms.
        let c = source.load(3).unwrap();
        assert_ne!(a.label, c.label);
    }

    #[test]
    fn test_synthetic_source_labels_binary() {
        let source = SyntheticVolumeSource::new(1, 16);
        let sample = source.load(0).unwrap();
        let labels = sample.label.to_vec::<f32>().unwrap();
        assert!(labels.iter().all(|&v| v == 0.0 || v == 1.0));
        // The cube is non-empty and does not fill the volume.
        let fg: f32 = labels.iter().sum();
        assert!(fg > 0.0 && (fg as usize) < labels.len());
    }

    #[test]
    fn test_synthetic_source_rejects_out_of_range() {
        let source = SyntheticVolumeSource::new(2, 16);
        assert!(source.load(2).is_err());
    }
}
