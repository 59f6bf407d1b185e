//! Training-loop plumbing for the volumetric segmentation network: typed run
//! configuration, data feeding, checkpointing, summary logging and the step
//! loop itself.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod summary;
pub mod trainer;

pub use config::{LossKind, Mode, RunConfig};
pub use data::{NiftiVolumeSource, Partitions, Split, SyntheticVolumeSource, VolumeSample, VolumeSource};
pub use trainer::{TrainReport, Trainer};
