//! Corpus preprocessing: polarity inversion.
//!
//! Raw scans are dark glyphs on a light background while the model trains
//! on the opposite convention. A pixel with any channel above
//! [`LUMA_THRESHOLD`] becomes pure black, every other pixel pure white, so
//! the converted corpus is strictly bilevel.

use candle::Result;
use image::{Rgb, RgbImage};
use std::path::Path;

use crate::dataset::list_image_files;

/// Channel value above which a pixel counts as background.
pub const LUMA_THRESHOLD: u8 = 128;

/// Inverts the polarity of one image.
///
/// The check is per channel: a single channel above the threshold is enough
/// for the pixel to count as background and turn black.
pub fn invert_polarity(img: &RgbImage) -> RgbImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let v = if pixel.0.iter().any(|&c| c > LUMA_THRESHOLD) {
            0
        } else {
            255
        };
        *pixel = Rgb([v, v, v]);
    }
    out
}

/// Converts every corpus image under `source_dir`, writing sequentially
/// numbered PNGs (`1.png`, `2.png`, ...) into `converted_dir`. The source
/// directory is never mutated. Returns the number of images written.
///
/// Numbering follows sorted filename order. A corpus file that cannot be
/// decoded aborts the stage naming the offending file; files without an
/// image extension are not part of the corpus and are ignored by
/// [`list_image_files`].
pub fn invert_corpus(source_dir: &Path, converted_dir: &Path) -> Result<usize> {
    let span = tracing::span!(tracing::Level::TRACE, "preprocess");
    let _enter = span.enter();
    let files = list_image_files(source_dir)?;
    if files.is_empty() {
        candle::bail!("no images to preprocess in {source_dir:?}")
    }
    std::fs::create_dir_all(converted_dir)?;
    for (idx, file) in files.iter().enumerate() {
        let img = image::ImageReader::open(file)?
            .decode()
            .map_err(|err| candle::Error::Msg(format!("cannot decode {file:?}: {err}")))?
            .to_rgb8();
        let converted = invert_polarity(&img);
        let dst = converted_dir.join(format!("{}.png", idx + 1));
        converted
            .save(&dst)
            .map_err(|err| candle::Error::Msg(format!("cannot write {dst:?}: {err}")))?;
    }
    Ok(files.len())
}
