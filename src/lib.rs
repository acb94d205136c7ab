//! Convolutional and variational autoencoders for handwritten glyph images.
//!
//! The pipeline turns a directory of raw glyph scans into a trained
//! reconstruction model in four stages: polarity inversion ([`preprocess`]),
//! randomized corpus augmentation ([`augment`]), dataset loading and
//! splitting ([`dataset`]), and mini-batch training ([`train`]). The
//! [`viz`] module renders original/reconstruction pairs for qualitative
//! inspection of a trained model.

use candle::utils::{cuda_is_available, metal_is_available};
use candle::{Device, Result};

pub mod augment;
pub mod config;
pub mod dataset;
pub mod model;
pub mod preprocess;
pub mod train;
pub mod vae;
pub mod viz;

pub use config::PipelineConfig;
pub use dataset::Dataset;
pub use model::{Autoencoder, AutoencoderConfig, Decoder, Encoder};
pub use vae::Vae;

pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        println!(
            "Running on CPU, to run on GPU build with `--features cuda` (or `--features metal`)"
        );
        Ok(Device::Cpu)
    }
}
