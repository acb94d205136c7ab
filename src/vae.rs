//! Variational autoencoder.
//!
//! Instead of a deterministic latent code the encoder predicts a diagonal
//! Gaussian per image, as a mean and a log-variance, and the decoder
//! consumes a sample drawn from it. Sampling uses the reparameterization
//! `z = mu + exp(0.5 * logvar) * eps` with `eps ~ N(0, I)` so gradients
//! flow through the distribution parameters rather than the draw itself.

use candle::{Module, Result, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, VarBuilder};

use crate::model::{AutoencoderConfig, Decoder, EncodedShape};

/// Encoder head predicting the latent Gaussian's parameters.
#[derive(Debug)]
pub struct VaeEncoder {
    conv1: Conv2d,
    conv2: Conv2d,
    fc_mu: Linear,
    fc_logvar: Linear,
    encoded_shape: EncodedShape,
    span: tracing::Span,
}

impl VaeEncoder {
    pub fn new(cfg: &AutoencoderConfig, vb: VarBuilder) -> Result<Self> {
        let encoded_shape = cfg.encoded_shape()?;
        let conv_cfg = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let (c1, c2) = cfg.conv_channels;
        let conv1 = conv2d(1, c1, 3, conv_cfg, vb.pp("conv1"))?;
        let conv2 = conv2d(c1, c2, 3, conv_cfg, vb.pp("conv2"))?;
        let (c, h, w) = encoded_shape;
        let fc_mu = linear(c * h * w, cfg.latent_dim, vb.pp("fc_mu"))?;
        let fc_logvar = linear(c * h * w, cfg.latent_dim, vb.pp("fc_logvar"))?;
        let span = tracing::span!(tracing::Level::TRACE, "vae-encoder");
        Ok(Self {
            conv1,
            conv2,
            fc_mu,
            fc_logvar,
            encoded_shape,
            span,
        })
    }

    pub fn encoded_shape(&self) -> EncodedShape {
        self.encoded_shape
    }

    /// Returns `(mu, logvar)`, each `(batch, latent_dim)`.
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let _enter = self.span.enter();
        let xs = self.conv1.forward(xs)?.relu()?;
        let xs = self.conv2.forward(&xs)?.relu()?;
        let xs = xs.flatten_from(1)?;
        Ok((self.fc_mu.forward(&xs)?, self.fc_logvar.forward(&xs)?))
    }
}

/// Draws `z = mu + exp(0.5 * logvar) * eps` with fresh standard normal
/// noise. The noise tensor is a leaf, so backpropagation reaches `mu` and
/// `logvar` but not the draw.
pub fn reparameterize(mu: &Tensor, logvar: &Tensor) -> Result<Tensor> {
    let std = (logvar * 0.5)?.exp()?;
    let eps = mu.randn_like(0., 1.)?;
    mu + (std * eps)?
}

/// Variational autoencoder sharing the plain model's decoder architecture.
#[derive(Debug)]
pub struct Vae {
    encoder: VaeEncoder,
    decoder: Decoder,
    image_dim: usize,
}

impl Vae {
    pub fn new(cfg: &AutoencoderConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = VaeEncoder::new(cfg, vb.pp("encoder"))?;
        let decoder = Decoder::new(cfg, encoder.encoded_shape(), vb.pp("decoder"))?;
        Ok(Self {
            encoder,
            decoder,
            image_dim: cfg.image_width * cfg.image_height,
        })
    }

    pub fn encoder(&self) -> &VaeEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Pre-sigmoid reconstruction of a sampled latent code, together with
    /// the Gaussian parameters it was drawn from.
    pub fn forward_parts(&self, xs: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let (mu, logvar) = self.encoder.forward(xs)?;
        let zs = reparameterize(&mu, &logvar)?;
        Ok((self.decoder.forward_logits(&zs)?, mu, logvar))
    }

    /// KL divergence between `N(mu, exp(logvar))` and the unit Gaussian,
    /// `0.5 * sum(exp(logvar) + mu^2 - 1 - logvar)`, summed over latent
    /// dimensions and averaged over the batch.
    pub fn kl_divergence(mu: &Tensor, logvar: &Tensor) -> Result<Tensor> {
        let kl = ((logvar.exp()? + mu.sqr()?)? - 1.)?.sub(logvar)?;
        kl.sum(1)?.mean_all()? * 0.5
    }

    /// Negated evidence lower bound: per-image-summed binary cross-entropy
    /// between input and reconstruction plus the KL regularizer, both
    /// averaged over the batch.
    pub fn elbo_loss(&self, xs: &Tensor) -> Result<Tensor> {
        let (logits, mu, logvar) = self.forward_parts(xs)?;
        let batch = xs.dim(0)?;
        let targets = xs.reshape((batch, self.image_dim))?;
        let logits = logits.reshape((batch, self.image_dim))?;
        let recon = (candle_nn::loss::binary_cross_entropy_with_logit(&logits, &targets)?
            * self.image_dim as f64)?;
        recon + Self::kl_divergence(&mu, &logvar)?
    }
}

impl Module for Vae {
    /// Sigmoid-bounded reconstruction of a freshly sampled latent code.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (mu, logvar) = self.encoder.forward(xs)?;
        let zs = reparameterize(&mu, &logvar)?;
        self.decoder.forward(&zs)
    }
}
