//! Loading augmented glyph corpora into tensors.

use candle::{DType, Device, Result, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Lists the image files under `dir` in sorted filename order.
///
/// Directory enumeration order is filesystem dependent, so every stage that
/// treats a directory as a corpus goes through this sort to keep output
/// numbering and train/test membership stable across platforms. Files
/// without a recognized image extension are skipped.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| candle::Error::Msg(format!("cannot read directory {dir:?}: {err}")))?;
    let mut files = vec![];
    for entry in entries {
        let path = entry?.path();
        let is_image = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if is_image {
            files.push(path)
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every image under `dir` as grayscale into a `(N, 1, H, W)` f32
/// tensor with values in `[0, 1]`.
///
/// Pixel intensities are divided by 255 exactly once, here. The returned
/// tensor is final: normalizing it again would shrink the data towards zero.
/// Images whose dimensions differ from `width` x `height` abort the load,
/// as do files that fail to decode.
pub fn load_dir(dir: &Path, width: usize, height: usize, device: &Device) -> Result<Tensor> {
    let span = tracing::span!(tracing::Level::TRACE, "load-dataset");
    let _enter = span.enter();
    let files = list_image_files(dir)?;
    if files.is_empty() {
        candle::bail!("no images found in {dir:?}")
    }
    let mut data = Vec::with_capacity(files.len() * width * height);
    for file in files.iter() {
        let img = image::ImageReader::open(file)?
            .decode()
            .map_err(|err| candle::Error::Msg(format!("cannot decode {file:?}: {err}")))?
            .to_luma8();
        let (w, h) = img.dimensions();
        if (w as usize, h as usize) != (width, height) {
            candle::bail!("{file:?} is {w}x{h}, expected {width}x{height}")
        }
        data.extend_from_slice(img.as_raw());
    }
    let images = Tensor::from_vec(data, (files.len(), 1, height, width), device)?;
    images.to_dtype(DType::F32)? / 255.
}

/// Train/test partition of a glyph corpus.
pub struct Dataset {
    pub train_images: Tensor,
    pub test_images: Tensor,
}

impl Dataset {
    /// Randomly partitions `images` into disjoint train and test subsets.
    ///
    /// The test side receives `round(N * test_fraction)` images, clamped so
    /// that both sides keep at least one image. Splitting fewer than two
    /// images is an error.
    pub fn split<R: Rng + ?Sized>(
        images: &Tensor,
        test_fraction: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let n = images.dim(0)?;
        if n < 2 {
            candle::bail!("cannot split {n} image(s) into train and test sets")
        }
        if !(0.0..1.0).contains(&test_fraction) {
            candle::bail!("test fraction {test_fraction} is outside [0, 1)")
        }
        let mut indices: Vec<u32> = (0..n as u32).collect();
        indices.shuffle(rng);
        let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
        let test_idx = Tensor::from_vec(indices[..n_test].to_vec(), n_test, images.device())?;
        let train_idx = Tensor::from_vec(indices[n_test..].to_vec(), n - n_test, images.device())?;
        Ok(Self {
            train_images: images.index_select(&train_idx, 0)?,
            test_images: images.index_select(&test_idx, 0)?,
        })
    }
}
