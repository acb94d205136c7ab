#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

use anyhow::Result;
use candle::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use glyph_autoencoder::augment::Augmentor;
use glyph_autoencoder::dataset::{self, Dataset};
use glyph_autoencoder::model::{Autoencoder, AutoencoderConfig};
use glyph_autoencoder::train::{self, MetricsWriter};
use glyph_autoencoder::vae::Vae;
use glyph_autoencoder::{preprocess, viz, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Run on CPU rather than on GPU.
    #[arg(long, global = true)]
    cpu: bool,

    /// Enable tracing (generates a trace-timestamp.json file).
    #[arg(long, global = true)]
    tracing: bool,

    /// Seed for augmentation, splitting, shuffling and sampling. Random
    /// when unset.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invert the corpus polarity: dark-on-light scans become light
    /// glyphs on a black background.
    Preprocess {
        /// Directory of raw glyph scans.
        #[arg(long, default_value = "data/raw")]
        source_dir: PathBuf,

        /// Directory the converted corpus is written to.
        #[arg(long, default_value = "data/converted")]
        converted_dir: PathBuf,
    },
    /// Generate an enlarged randomized dataset from the converted corpus.
    Augment {
        /// Directory of converted corpus images. Augmented samples land in
        /// its `output` subdirectory.
        #[arg(long, default_value = "data/converted")]
        converted_dir: PathBuf,

        /// Number of augmented images to generate.
        #[arg(long, default_value_t = 10_000)]
        sample_count: usize,

        #[arg(long, default_value_t = 64)]
        image_width: usize,

        #[arg(long, default_value_t = 64)]
        image_height: usize,
    },
    /// Train an autoencoder on an augmented corpus and render test
    /// reconstructions.
    Train(TrainArgs),
    /// Render reconstructions using previously saved weights.
    Reconstruct(ReconstructArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Directory of augmented training images.
    #[arg(long, default_value = "data/converted/output")]
    data_dir: PathBuf,

    #[arg(long, default_value_t = 64)]
    image_width: usize,

    #[arg(long, default_value_t = 64)]
    image_height: usize,

    /// Number of passes over the training set.
    #[arg(long, default_value_t = 15)]
    epochs: usize,

    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    /// Size of the latent bottleneck.
    #[arg(long, default_value_t = 128)]
    latent_dim: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Fraction of images held out for validation.
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,

    /// Train the variational autoencoder instead of the plain one.
    #[arg(long)]
    vae: bool,

    /// Directory per-epoch metrics are appended to, in JSON lines format.
    #[arg(long)]
    metrics_dir: Option<PathBuf>,

    /// The file where to save the trained weights, in safetensors format.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Number of test images in the reconstruction grid.
    #[arg(long, default_value_t = 10)]
    n_samples: usize,

    /// The file where to write the reconstruction grid.
    #[arg(long, default_value = "reconstructions.png")]
    out: PathBuf,
}

#[derive(clap::Args, Debug)]
struct ReconstructArgs {
    /// Directory of augmented images to reconstruct from.
    #[arg(long, default_value = "data/converted/output")]
    data_dir: PathBuf,

    #[arg(long, default_value_t = 64)]
    image_width: usize,

    #[arg(long, default_value_t = 64)]
    image_height: usize,

    #[arg(long, default_value_t = 128)]
    latent_dim: usize,

    /// Fraction of images held out for validation. With the training seed
    /// this reproduces the training split.
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,

    /// Trained weights to load, in safetensors format.
    #[arg(long)]
    weights: PathBuf,

    /// The weights belong to the variational autoencoder.
    #[arg(long)]
    vae: bool,

    /// Number of test images in the reconstruction grid.
    #[arg(long, default_value_t = 10)]
    n_samples: usize,

    /// The file where to write the reconstruction grid.
    #[arg(long, default_value = "reconstructions.png")]
    out: PathBuf,
}

fn run_train(args: TrainArgs, seed: Option<u64>, device: &Device) -> Result<()> {
    let cfg = PipelineConfig {
        image_width: args.image_width,
        image_height: args.image_height,
        n_epochs: args.epochs,
        batch_size: args.batch_size,
        latent_dim: args.latent_dim,
        learning_rate: args.learning_rate,
        test_fraction: args.test_fraction,
        seed,
        ..Default::default()
    };
    cfg.seed_device(device)?;
    let mut rng = cfg.rng();
    let images = dataset::load_dir(&args.data_dir, cfg.image_width, cfg.image_height, device)?;
    let data = Dataset::split(&images, cfg.test_fraction, &mut rng)?;
    println!("train images: {:?}", data.train_images.shape());
    println!("test images:  {:?}", data.test_images.shape());

    let model_cfg = AutoencoderConfig {
        image_width: cfg.image_width,
        image_height: cfg.image_height,
        latent_dim: cfg.latent_dim,
        ..Default::default()
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let mut metrics = args.metrics_dir.as_ref().map(MetricsWriter::create).transpose()?;
    let train_cfg = cfg.train_config();
    let n_samples = usize::min(args.n_samples, data.test_images.dim(0)?);
    if args.vae {
        let model = Vae::new(&model_cfg, vb)?;
        train::fit(&model, &varmap, &data, &train_cfg, &mut rng, metrics.as_mut())?;
        viz::save_reconstructions(&model, &data.test_images, n_samples, &mut rng, &args.out)?;
    } else {
        let model = Autoencoder::new(&model_cfg, vb)?;
        train::fit(&model, &varmap, &data, &train_cfg, &mut rng, metrics.as_mut())?;
        viz::save_reconstructions(&model, &data.test_images, n_samples, &mut rng, &args.out)?;
    }
    if let Some(save) = &args.save {
        println!("saving trained weights in {save:?}");
        varmap.save(save)?
    }
    println!("wrote reconstruction grid to {:?}", args.out);
    Ok(())
}

fn run_reconstruct(args: ReconstructArgs, seed: Option<u64>, device: &Device) -> Result<()> {
    let cfg = PipelineConfig {
        image_width: args.image_width,
        image_height: args.image_height,
        latent_dim: args.latent_dim,
        test_fraction: args.test_fraction,
        seed,
        ..Default::default()
    };
    cfg.seed_device(device)?;
    let mut rng = cfg.rng();
    let images = dataset::load_dir(&args.data_dir, cfg.image_width, cfg.image_height, device)?;
    let data = Dataset::split(&images, cfg.test_fraction, &mut rng)?;

    let model_cfg = AutoencoderConfig {
        image_width: cfg.image_width,
        image_height: cfg.image_height,
        latent_dim: cfg.latent_dim,
        ..Default::default()
    };
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let n_samples = usize::min(args.n_samples, data.test_images.dim(0)?);
    if args.vae {
        let model = Vae::new(&model_cfg, vb)?;
        varmap.load(&args.weights)?;
        viz::save_reconstructions(&model, &data.test_images, n_samples, &mut rng, &args.out)?;
    } else {
        let model = Autoencoder::new(&model_cfg, vb)?;
        varmap.load(&args.weights)?;
        viz::save_reconstructions(&model, &data.test_images, n_samples, &mut rng, &args.out)?;
    }
    println!("wrote reconstruction grid to {:?}", args.out);
    Ok(())
}

fn main() -> Result<()> {
    use tracing_chrome::ChromeLayerBuilder;
    use tracing_subscriber::prelude::*;

    let args = Args::parse();
    let _guard = if args.tracing {
        let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
        tracing_subscriber::registry().with(chrome_layer).init();
        Some(guard)
    } else {
        None
    };
    match args.command {
        Command::Preprocess {
            source_dir,
            converted_dir,
        } => {
            let n = preprocess::invert_corpus(&source_dir, &converted_dir)?;
            println!("converted {n} images into {converted_dir:?}");
        }
        Command::Augment {
            converted_dir,
            sample_count,
            image_width,
            image_height,
        } => {
            let cfg = PipelineConfig {
                converted_dir,
                sample_count,
                image_width,
                image_height,
                seed: args.seed,
                ..Default::default()
            };
            let augmentor = Augmentor::new(&cfg.converted_dir, cfg.image_width, cfg.image_height);
            let written = augmentor.sample(cfg.sample_count, &mut cfg.rng())?;
            println!(
                "generated {} augmented images in {:?}",
                written.len(),
                augmentor.output_dir()
            );
        }
        Command::Train(train_args) => {
            let device = glyph_autoencoder::device(args.cpu)?;
            run_train(train_args, args.seed, &device)?
        }
        Command::Reconstruct(reconstruct_args) => {
            let device = glyph_autoencoder::device(args.cpu)?;
            run_reconstruct(reconstruct_args, args.seed, &device)?
        }
    }
    Ok(())
}
