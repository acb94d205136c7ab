//! Pipeline configuration.
//!
//! Every stage receives its knobs through an explicit [`PipelineConfig`]
//! value rather than module-level constants, so the same binary can drive
//! differently sized corpora without recompiling.

use candle::{Device, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use crate::train::TrainConfig;

/// Settings shared by the pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Width every augmented image is resized to and the model consumes.
    pub image_width: usize,
    /// Height every augmented image is resized to and the model consumes.
    pub image_height: usize,
    /// Number of passes over the training set.
    pub n_epochs: usize,
    /// Mini-batch size for both training and validation passes.
    pub batch_size: usize,
    /// Dimensionality of the latent bottleneck.
    pub latent_dim: usize,
    /// Optimizer learning rate.
    pub learning_rate: f64,
    /// Fraction of the corpus held out for validation, rounded to the
    /// nearest image count.
    pub test_fraction: f64,
    /// Number of augmented images the augmentation stage generates.
    pub sample_count: usize,
    /// Directory of raw glyph scans, dark on a light background.
    pub source_dir: PathBuf,
    /// Directory the polarity-inverted corpus is written to. Augmented
    /// samples land in its `output` subdirectory.
    pub converted_dir: PathBuf,
    /// Seed for host-side randomness: augmentation, splitting, epoch
    /// shuffling and visualization sampling. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_width: 64,
            image_height: 64,
            n_epochs: 15,
            batch_size: 128,
            latent_dim: 128,
            learning_rate: 1e-3,
            test_fraction: 0.2,
            sample_count: 10_000,
            source_dir: PathBuf::from("data/raw"),
            converted_dir: PathBuf::from("data/converted"),
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Directory the augmentation stage writes to.
    pub fn output_dir(&self) -> PathBuf {
        self.converted_dir.join("output")
    }

    /// Host-side RNG, seeded from [`Self::seed`] when set.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Propagates the configured seed to the tensor device so that
    /// device-side sampling is reproducible as well. The CPU backend has no
    /// seedable generator, so there this is a no-op.
    pub fn seed_device(&self, device: &Device) -> Result<()> {
        match self.seed {
            Some(seed) if !device.is_cpu() => device.set_seed(seed),
            _ => Ok(()),
        }
    }

    /// The subset of settings the training loop consumes.
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            n_epochs: self.n_epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
        }
    }
}
