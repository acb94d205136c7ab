//! Randomized corpus augmentation.
//!
//! Every sampled image is resized to the target dimensions and collapsed to
//! grayscale, and may additionally be rotated or skewed. The optional
//! transforms are drawn independently per sample, so one output can receive
//! any subset of them. Revealed areas are filled with black, the background
//! color of the converted corpus.

use candle::Result;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, warp, Interpolation, Projection};
use rand::Rng;
use std::path::{Path, PathBuf};

use crate::dataset::list_image_files;

/// Probability of the exact quarter-turn rotation.
const ROTATE90_PROB: f64 = 0.1;
/// Probability of the small-angle rotation.
const ROTATE_PROB: f64 = 0.2;
/// Small-angle rotation bounds, in degrees.
const ROTATE_DEGREES: (f32, f32) = (-5.0, 10.0);
/// Probability of the horizontal skew.
const SKEW_PROB: f64 = 0.1;
/// Horizontal shear factor magnitude bounds.
const SKEW_MAGNITUDE: (f32, f32) = (0.05, 0.25);

/// Randomized augmentation pipeline rooted at a corpus directory.
#[derive(Debug, Clone)]
pub struct Augmentor {
    source_dir: PathBuf,
    width: u32,
    height: u32,
}

impl Augmentor {
    pub fn new<P: AsRef<Path>>(source_dir: P, width: usize, height: usize) -> Self {
        Self {
            source_dir: source_dir.as_ref().to_path_buf(),
            width: width as u32,
            height: height as u32,
        }
    }

    /// Directory the generated samples are written to.
    pub fn output_dir(&self) -> PathBuf {
        self.source_dir.join("output")
    }

    /// Generates exactly `n` augmented grayscale PNGs under
    /// [`Self::output_dir`], drawing source images uniformly with
    /// replacement. Returns the written paths in generation order.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<PathBuf>> {
        let span = tracing::span!(tracing::Level::TRACE, "augment");
        let _enter = span.enter();
        let files = list_image_files(&self.source_dir)?;
        if files.is_empty() {
            candle::bail!(
                "cannot sample {n} augmented images: no source images in {:?}",
                self.source_dir
            )
        }
        let output_dir = self.output_dir();
        std::fs::create_dir_all(&output_dir)?;
        let mut written = Vec::with_capacity(n);
        for idx in 0..n {
            let file = &files[rng.random_range(0..files.len())];
            let img = image::ImageReader::open(file)?
                .decode()
                .map_err(|err| candle::Error::Msg(format!("cannot decode {file:?}: {err}")))?;
            let img = self.transform(img, rng);
            let dst = output_dir.join(format!("glyph_{:05}.png", idx + 1));
            img.save(&dst)
                .map_err(|err| candle::Error::Msg(format!("cannot write {dst:?}: {err}")))?;
            written.push(dst)
        }
        Ok(written)
    }

    /// Applies one randomized pass of the transform chain.
    ///
    /// The quarter turn swaps the axes, so it runs before the resize. The
    /// remaining transforms preserve dimensions; every output leaves the
    /// chain at the target width and height.
    fn transform<R: Rng + ?Sized>(&self, img: DynamicImage, rng: &mut R) -> DynamicImage {
        let img = if rng.random_bool(ROTATE90_PROB) {
            img.rotate90()
        } else {
            img
        };
        let mut img = img
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_rgb8();
        if rng.random_bool(ROTATE_PROB) {
            let degrees = rng.random_range(ROTATE_DEGREES.0..=ROTATE_DEGREES.1);
            img = rotate_about_center(
                &img,
                degrees.to_radians(),
                Interpolation::Bilinear,
                Rgb([0, 0, 0]),
            );
        }
        if rng.random_bool(SKEW_PROB) {
            let magnitude = rng.random_range(SKEW_MAGNITUDE.0..=SKEW_MAGNITUDE.1);
            let factor = if rng.random_bool(0.5) {
                magnitude
            } else {
                -magnitude
            };
            img = skew_horizontal(&img, factor);
        }
        DynamicImage::ImageRgb8(img).grayscale()
    }
}

/// Shears the image horizontally about its center. `factor` is the
/// horizontal shift of a row, in pixels per pixel of distance from the
/// center row, signed by direction.
fn skew_horizontal(img: &RgbImage, factor: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let shear = Projection::from_matrix([1.0, factor, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
        .expect("shear matrix is invertible");
    let centered = Projection::translate(cx, cy) * shear * Projection::translate(-cx, -cy);
    warp(img, &centered, Interpolation::Bilinear, Rgb([0, 0, 0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn transform_output_is_grayscale_at_target_size() {
        // Rectangular target: a stray axis swap would come out as 8x16.
        let augmentor = Augmentor::new("unused", 16, 8);
        let mut rng = StdRng::seed_from_u64(7);
        let src = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([200, 10, 10])));
        for _ in 0..100 {
            let out = augmentor.transform(src.clone(), &mut rng);
            assert_eq!(out.dimensions(), (16, 8));
            assert_eq!(out.color().channel_count(), 1);
        }
    }

    #[test]
    fn skew_keeps_dimensions() {
        let img = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let out = skew_horizontal(&img, 0.25);
        assert_eq!(out.dimensions(), (20, 20));
    }
}
