//! Mini-batch training driver.
//!
//! [`fit`] is generic over the model: anything that can turn a batch of
//! images into a scalar loss can be trained, so the plain autoencoder and
//! the variational one share the loop, the optimizer setup and the metrics
//! plumbing.

use candle::{Result, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::dataset::Dataset;
use crate::model::Autoencoder;
use crate::vae::Vae;

/// Models trainable by [`fit`].
pub trait Model {
    /// Scalar training loss for one batch of `(batch, 1, H, W)` images.
    fn loss(&self, xs: &Tensor) -> Result<Tensor>;
}

impl Model for Autoencoder {
    /// Mean binary cross-entropy between the input and its reconstruction,
    /// computed from the decoder's logits.
    fn loss(&self, xs: &Tensor) -> Result<Tensor> {
        let logits = self.forward_logits(xs)?;
        candle_nn::loss::binary_cross_entropy_with_logit(
            &logits.flatten_from(1)?,
            &xs.flatten_from(1)?,
        )
    }
}

impl Model for Vae {
    fn loss(&self, xs: &Tensor) -> Result<Tensor> {
        self.elbo_loss(xs)
    }
}

/// One row of the training history.
#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
}

/// Settings consumed by [`fit`].
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub n_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_epochs: 15,
            batch_size: 128,
            learning_rate: 1e-3,
        }
    }
}

/// Write-only metrics sink: one JSON record per epoch, appended to
/// `metrics.jsonl` under the given directory. The file is never read back
/// by the pipeline, it exists for external dashboards.
pub struct MetricsWriter {
    file: std::fs::File,
}

impl MetricsWriter {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("metrics.jsonl"))?;
        Ok(Self { file })
    }

    pub fn record(&mut self, stats: &EpochStats) -> Result<()> {
        let line = serde_json::to_string(stats).map_err(candle::Error::wrap)?;
        writeln!(self.file, "{line}")?;
        Ok(())
    }
}

/// Trains `model` on `data.train_images`, validating against
/// `data.test_images` after every epoch. Returns the per-epoch history.
///
/// Training indices are reshuffled each epoch with the injected RNG and the
/// final short batch is kept. The test set only ever flows through the
/// forward pass. A non-finite loss aborts immediately: there is no recovery
/// policy, and one more step would drag NaNs into the weights.
pub fn fit<M: Model, R: Rng + ?Sized>(
    model: &M,
    varmap: &VarMap,
    data: &Dataset,
    cfg: &TrainConfig,
    rng: &mut R,
    mut metrics: Option<&mut MetricsWriter>,
) -> Result<Vec<EpochStats>> {
    let span = tracing::span!(tracing::Level::TRACE, "fit");
    let _enter = span.enter();
    if cfg.batch_size == 0 {
        candle::bail!("batch size must be positive")
    }
    let params = ParamsAdamW {
        lr: cfg.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut opt = AdamW::new(varmap.all_vars(), params)?;
    let n_train = data.train_images.dim(0)?;
    let mut indices: Vec<u32> = (0..n_train as u32).collect();
    let mut history = Vec::with_capacity(cfg.n_epochs);
    for epoch in 1..=cfg.n_epochs {
        indices.shuffle(rng);
        let mut loss_sum = 0f64;
        for (step, ids) in indices.chunks(cfg.batch_size).enumerate() {
            let batch_idx =
                Tensor::from_vec(ids.to_vec(), ids.len(), data.train_images.device())?;
            let batch = data.train_images.index_select(&batch_idx, 0)?;
            let loss = model.loss(&batch)?;
            let loss_v = loss.to_scalar::<f32>()?;
            if !loss_v.is_finite() {
                candle::bail!("non-finite training loss at epoch {epoch}, batch {step}")
            }
            opt.backward_step(&loss)?;
            loss_sum += loss_v as f64 * ids.len() as f64;
        }
        let train_loss = (loss_sum / n_train as f64) as f32;
        let val_loss = evaluate(model, &data.test_images, cfg.batch_size)?;
        if !val_loss.is_finite() {
            candle::bail!("non-finite validation loss at epoch {epoch}")
        }
        println!("{epoch:4} train loss: {train_loss:8.5} val loss: {val_loss:8.5}");
        let stats = EpochStats {
            epoch,
            train_loss,
            val_loss,
        };
        if let Some(metrics) = metrics.as_mut() {
            metrics.record(&stats)?
        }
        history.push(stats)
    }
    Ok(history)
}

/// Mean loss over `images`, computed in mini-batches without touching any
/// parameter.
pub fn evaluate<M: Model>(model: &M, images: &Tensor, batch_size: usize) -> Result<f32> {
    if batch_size == 0 {
        candle::bail!("batch size must be positive")
    }
    let n = images.dim(0)?;
    let mut loss_sum = 0f64;
    for start in (0..n).step_by(batch_size) {
        let len = usize::min(batch_size, n - start);
        let batch = images.narrow(0, start, len)?;
        let loss = model.loss(&batch)?.to_scalar::<f32>()?;
        loss_sum += loss as f64 * len as f64;
    }
    Ok((loss_sum / n as f64) as f32)
}
