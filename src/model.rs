//! Encoder/decoder pair and their composition.
//!
//! The encoder compresses a single-channel glyph image into a fixed-length
//! latent vector through two strided convolutions and a linear projection.
//! The decoder mirrors it: a linear layer back to the encoder's pre-flatten
//! shape, two stride-2 transposed convolutions, and a final transposed
//! convolution down to one channel. Composing the two yields the
//! autoencoder trained for reconstruction.

use candle::{Module, Result, Tensor};
use candle_nn::{
    conv2d, conv_transpose2d, linear, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    Linear, VarBuilder,
};

/// Encoder activation shape just before flattening, as
/// `(channels, height, width)`.
pub type EncodedShape = (usize, usize, usize);

#[derive(Debug, Clone)]
pub struct AutoencoderConfig {
    /// Input and reconstruction width. Must be a multiple of 4.
    pub image_width: usize,
    /// Input and reconstruction height. Must be a multiple of 4.
    pub image_height: usize,
    /// Size of the latent bottleneck.
    pub latent_dim: usize,
    /// Filter counts of the two encoder convolutions. The decoder mirrors
    /// them in reverse.
    pub conv_channels: (usize, usize),
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            image_width: 64,
            image_height: 64,
            latent_dim: 128,
            conv_channels: (32, 64),
        }
    }
}

impl AutoencoderConfig {
    pub(crate) fn encoded_shape(&self) -> Result<EncodedShape> {
        if self.image_width % 4 != 0 || self.image_height % 4 != 0 {
            candle::bail!(
                "image dimensions {}x{} are not divisible by 4, so two stride-2 convolutions \
                 cannot be undone by two stride-2 upsamplings",
                self.image_width,
                self.image_height
            )
        }
        let (_c1, c2) = self.conv_channels;
        Ok((c2, self.image_height / 4, self.image_width / 4))
    }
}

/// Maps `(batch, 1, H, W)` images to `(batch, latent_dim)` vectors.
#[derive(Debug)]
pub struct Encoder {
    conv1: Conv2d,
    conv2: Conv2d,
    fc: Linear,
    encoded_shape: EncodedShape,
    span: tracing::Span,
}

impl Encoder {
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
        let fc = linear(c * h * w, cfg.latent_dim, vb.pp("fc"))?;
        let span = tracing::span!(tracing::Level::TRACE, "encoder");
        Ok(Self {
            conv1,
            conv2,
            fc,
            encoded_shape,
            span,
        })
    }

    /// The pre-flatten activation shape the decoder reshapes back to.
    pub fn encoded_shape(&self) -> EncodedShape {
        self.encoded_shape
    }
}

impl Module for Encoder {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let xs = self.conv1.forward(xs)?.relu()?;
        let xs = self.conv2.forward(&xs)?.relu()?;
        // The bottleneck projection carries no activation.
        xs.flatten_from(1)?.apply(&self.fc)
    }
}

/// Maps `(batch, latent_dim)` vectors back to `(batch, 1, H, W)` images.
#[derive(Debug)]
pub struct Decoder {
    fc: Linear,
    deconv1: ConvTranspose2d,
    deconv2: ConvTranspose2d,
    deconv3: ConvTranspose2d,
    encoded_shape: EncodedShape,
    span: tracing::Span,
}

impl Decoder {
    /// `encoded_shape` must be the matching encoder's recorded pre-flatten
    /// shape.
    pub fn new(
        cfg: &AutoencoderConfig,
        encoded_shape: EncodedShape,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (c, h, w) = encoded_shape;
        let fc = linear(cfg.latent_dim, c * h * w, vb.pp("fc"))?;
        let up_cfg = ConvTranspose2dConfig {
            padding: 1,
            output_padding: 1,
            stride: 2,
            ..Default::default()
        };
        let (c1, c2) = cfg.conv_channels;
        let deconv1 = conv_transpose2d(c2, c2, 3, up_cfg, vb.pp("deconv1"))?;
        let deconv2 = conv_transpose2d(c2, c1, 3, up_cfg, vb.pp("deconv2"))?;
        let out_cfg = ConvTranspose2dConfig {
            padding: 1,
            ..Default::default()
        };
        let deconv3 = conv_transpose2d(c1, 1, 3, out_cfg, vb.pp("deconv3"))?;
        let span = tracing::span!(tracing::Level::TRACE, "decoder");
        Ok(Self {
            fc,
            deconv1,
            deconv2,
            deconv3,
            encoded_shape,
            span,
        })
    }

    /// Reconstruction before the sigmoid, as consumed by the cross-entropy
    /// loss.
    pub fn forward_logits(&self, zs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (c, h, w) = self.encoded_shape;
        let batch = zs.dim(0)?;
        let xs = self.fc.forward(zs)?.reshape((batch, c, h, w))?;
        let xs = self.deconv1.forward(&xs)?.relu()?;
        let xs = self.deconv2.forward(&xs)?.relu()?;
        self.deconv3.forward(&xs)
    }
}

impl Module for Decoder {
    /// Sigmoid-bounded reconstruction in `[0, 1]`.
    fn forward(&self, zs: &Tensor) -> Result<Tensor> {
        candle_nn::ops::sigmoid(&self.forward_logits(zs)?)
    }
}

/// Reconstruction model: the decoder applied to the encoder's latent code.
#[derive(Debug)]
pub struct Autoencoder {
    encoder: Encoder,
    decoder: Decoder,
}

impl Autoencoder {
    pub fn new(cfg: &AutoencoderConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = Encoder::new(cfg, vb.pp("encoder"))?;
        let decoder = Decoder::new(cfg, encoder.encoded_shape(), vb.pp("decoder"))?;
        Ok(Self { encoder, decoder })
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Latent codes for a batch of images.
    pub fn encode(&self, xs: &Tensor) -> Result<Tensor> {
        self.encoder.forward(xs)
    }

    /// Reconstruction before the sigmoid.
    pub fn forward_logits(&self, xs: &Tensor) -> Result<Tensor> {
        self.decoder.forward_logits(&self.encoder.forward(xs)?)
    }
}

impl Module for Autoencoder {
    /// Sigmoid-bounded reconstruction with the input's shape.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.decoder.forward(&self.encoder.forward(xs)?)
    }
}
