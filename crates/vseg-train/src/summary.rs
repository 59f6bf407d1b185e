//! Summary logging for external visualization.
//!
//! One writer per split (`<LOG_DIR>/train`, `<LOG_DIR>/test`). Scalars append
//! to a JSON-lines file; sampled volume slices (the middle slice along the
//! depth axis, matching the original's image summaries) land as PGM images.
//! Nothing here is registered implicitly: the trainer computes values and
//! calls the writer.

use anyhow::{Context, Result};
use burn::prelude::*;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ScalarRecord<'a> {
    step: usize,
    tag: &'a str,
    value: f64,
}

/// Appends scalar metrics and slice images under a split directory.
pub struct SummaryWriter {
    dir: PathBuf,
    scalars: BufWriter<File>,
}

impl SummaryWriter {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
        let path = dir.join("scalars.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            dir,
            scalars: BufWriter::new(file),
        })
    }

    /// Append one scalar record and flush, so logs survive a fatal step.
    pub fn scalar(&mut self, step: usize, tag: &str, value: f64) -> Result<()> {
        let record = ScalarRecord { step, tag, value };
        serde_json::to_writer(&mut self.scalars, &record)?;
        self.scalars.write_all(b"\n")?;
        self.scalars.flush()?;
        Ok(())
    }

    /// Write the middle depth slice of channel 0 as a greyscale PGM image.
    pub fn image_slice<B: Backend>(
        &self,
        step: usize,
        tag: &str,
        volume: &Tensor<B, 5>,
    ) -> Result<()> {
        let [_b, _c, d, h, w] = volume.dims();
        let mid = d / 2;
        let slice = volume
            .clone()
            .slice([0..1, 0..1, mid..mid + 1, 0..h, 0..w])
            .reshape([h, w]);
        let values = slice
            .to_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read slice data: {e:?}"))?;

        let images = self.dir.join("images");
        std::fs::create_dir_all(&images)?;
        let path = images.join(format!("{tag}-{step}.pgm"));
        write_pgm(&path, &values, h, w)
    }
}

fn write_pgm(path: &Path, values: &[f32], height: usize, width: usize) -> Result<()> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = if max > min { max - min } else { 1.0 };

    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    write!(out, "P5\n{width} {height}\n255\n")?;
    let bytes: Vec<u8> = values
        .iter()
        .map(|&v| (((v - min) / range) * 255.0).round() as u8)
        .collect();
    out.write_all(&bytes)?;
    Ok(())
}
