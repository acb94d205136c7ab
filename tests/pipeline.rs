#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use anyhow::Result;
use candle::Device;
use glyph_autoencoder::augment::Augmentor;
use glyph_autoencoder::dataset::{self, Dataset};
use glyph_autoencoder::preprocess;
use glyph_autoencoder::train::{EpochStats, MetricsWriter};
use image::{GenericImageView, GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

/// Writes `n` raw corpus scans: dark glyph pixels on a white background.
fn write_raw_scans(dir: &Path, n: usize, size: u32) -> Result<()> {
    for i in 0..n {
        let mut img = RgbImage::from_pixel(size, size, Rgb([255, 255, 255]));
        img.put_pixel(i as u32 % size, (i as u32 / size) % size, Rgb([0, 0, 0]));
        img.save(dir.join(format!("scan_{i}.png")))?;
    }
    Ok(())
}

/// Writes `n` already-converted grayscale glyphs.
fn write_converted_glyphs(dir: &Path, n: usize, width: u32, height: u32) -> Result<()> {
    for i in 0..n {
        let mut img = GrayImage::from_pixel(width, height, Luma([0]));
        img.put_pixel(i as u32 % width, (i as u32 / width) % height, Luma([255]));
        img.save(dir.join(format!("glyph_{i}.png")))?;
    }
    Ok(())
}

#[test]
fn preprocess_inverts_and_numbers_corpus() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw = tmp.path().join("raw");
    let converted = tmp.path().join("converted");
    std::fs::create_dir(&raw)?;
    write_raw_scans(&raw, 3, 4)?;
    std::fs::write(raw.join("notes.txt"), "not an image")?;

    let n = preprocess::invert_corpus(&raw, &converted)?;
    assert_eq!(n, 3);
    for idx in 1..=3 {
        assert!(converted.join(format!("{idx}.png")).exists());
    }
    // Polarity flipped: white background turns black, the glyph pixel white.
    let img = image::open(converted.join("1.png"))?.to_rgb8();
    assert_eq!(img.get_pixel(0, 0), &Rgb([255, 255, 255]));
    assert_eq!(img.get_pixel(1, 0), &Rgb([0, 0, 0]));
    // Source corpus untouched.
    let raw_img = image::open(raw.join("scan_0.png"))?.to_rgb8();
    assert_eq!(raw_img.get_pixel(1, 0), &Rgb([255, 255, 255]));
    Ok(())
}

#[test]
fn preprocess_missing_source_dir_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("does-not-exist");
    let converted = tmp.path().join("converted");
    assert!(preprocess::invert_corpus(&missing, &converted).is_err());
}

#[test]
fn list_image_files_sorts_and_filters() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    for name in ["c.png", "a.jpg", "b.jpeg", "d.txt", "e.PNG"] {
        std::fs::write(tmp.path().join(name), b"placeholder")?;
    }
    let files = dataset::list_image_files(tmp.path())?;
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap())
        .collect();
    assert_eq!(names, ["a.jpg", "b.jpeg", "c.png", "e.PNG"]);
    Ok(())
}

#[test]
fn augment_generates_exact_count_and_shape() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_converted_glyphs(tmp.path(), 2, 10, 12)?;
    // Rectangular target over enough draws that the quarter turn fires:
    // a stray axis swap would come out as an 8x16 file.
    let augmentor = Augmentor::new(tmp.path(), 16, 8);
    let mut rng = StdRng::seed_from_u64(0);
    let written = augmentor.sample(80, &mut rng)?;
    assert_eq!(written.len(), 80);
    assert_eq!(dataset::list_image_files(&augmentor.output_dir())?.len(), 80);
    for path in written.iter() {
        let img = image::open(path)?;
        assert_eq!(img.dimensions(), (16, 8));
        assert_eq!(img.color().channel_count(), 1);
    }
    Ok(())
}

#[test]
fn augment_empty_source_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let augmentor = Augmentor::new(tmp.path(), 8, 8);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(augmentor.sample(5, &mut rng).is_err());
}

#[test]
fn load_dir_normalizes_exactly_once() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut img = GrayImage::from_pixel(4, 4, Luma([0]));
    img.put_pixel(0, 0, Luma([255]));
    img.put_pixel(1, 0, Luma([51]));
    img.save(tmp.path().join("glyph.png"))?;

    let images = dataset::load_dir(tmp.path(), 4, 4, &Device::Cpu)?;
    assert_eq!(images.dims(), [1, 1, 4, 4]);
    let values = images.flatten_all()?.to_vec1::<f32>()?;
    assert!((values[0] - 1.0).abs() < 1e-6);
    assert!((values[1] - 0.2).abs() < 1e-6);
    assert_eq!(values[2], 0.0);
    Ok(())
}

#[test]
fn load_dir_rejects_mismatched_dimensions() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    GrayImage::from_pixel(4, 4, Luma([0])).save(tmp.path().join("a.png"))?;
    GrayImage::from_pixel(5, 4, Luma([0])).save(tmp.path().join("b.png"))?;
    assert!(dataset::load_dir(tmp.path(), 4, 4, &Device::Cpu).is_err());
    Ok(())
}

#[test]
fn undecodable_image_fails_naming_path() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw = tmp.path().join("raw");
    std::fs::create_dir(&raw)?;
    write_raw_scans(&raw, 1, 4)?;
    std::fs::write(raw.join("truncated.png"), b"not a png")?;

    // The file carries an image extension, so it is part of the corpus and
    // must abort the stage rather than being skipped.
    let err = preprocess::invert_corpus(&raw, &tmp.path().join("converted")).unwrap_err();
    assert!(err.to_string().contains("truncated.png"));
    let err = dataset::load_dir(&raw, 4, 4, &Device::Cpu).unwrap_err();
    assert!(err.to_string().contains("truncated.png"));
    Ok(())
}

#[test]
fn split_is_disjoint_and_exhaustive() -> Result<()> {
    let images = candle::Tensor::arange(0f32, 20., &Device::Cpu)?.reshape((20, 1, 1, 1))?;
    let mut rng = StdRng::seed_from_u64(3);
    let data = Dataset::split(&images, 0.2, &mut rng)?;
    assert_eq!(data.train_images.dims(), [16, 1, 1, 1]);
    assert_eq!(data.test_images.dims(), [4, 1, 1, 1]);

    let mut seen: Vec<i64> = data
        .train_images
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .chain(data.test_images.flatten_all()?.to_vec1::<f32>()?)
        .map(|v| v as i64)
        .collect();
    seen.sort_unstable();
    let expected: Vec<i64> = (0..20).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn split_rejects_degenerate_inputs() -> Result<()> {
    let one = candle::Tensor::zeros((1, 1, 2, 2), candle::DType::F32, &Device::Cpu)?;
    let mut rng = StdRng::seed_from_u64(0);
    assert!(Dataset::split(&one, 0.2, &mut rng).is_err());

    let two = candle::Tensor::zeros((2, 1, 2, 2), candle::DType::F32, &Device::Cpu)?;
    assert!(Dataset::split(&two, 1.5, &mut rng).is_err());
    // Tiny fractions still hold out at least one image.
    let data = Dataset::split(&two, 0.01, &mut rng)?;
    assert_eq!(data.train_images.dims()[0], 1);
    assert_eq!(data.test_images.dims()[0], 1);
    Ok(())
}

#[test]
fn metrics_writer_appends_json_lines() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut metrics = MetricsWriter::create(tmp.path())?;
    for epoch in 1..=2 {
        metrics.record(&EpochStats {
            epoch,
            train_loss: 0.5,
            val_loss: 0.25,
        })?;
    }
    let contents = std::fs::read_to_string(tmp.path().join("metrics.jsonl"))?;
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    let record: serde_json::Value = serde_json::from_str(lines[1])?;
    assert_eq!(record["epoch"], 2);
    assert_eq!(record["val_loss"], 0.25);
    Ok(())
}

#[test]
fn pipeline_end_to_end_shapes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw = tmp.path().join("raw");
    let converted = tmp.path().join("converted");
    std::fs::create_dir(&raw)?;
    write_raw_scans(&raw, 5, 8)?;

    assert_eq!(preprocess::invert_corpus(&raw, &converted)?, 5);
    let augmentor = Augmentor::new(&converted, 8, 8);
    let mut rng = StdRng::seed_from_u64(42);
    augmentor.sample(20, &mut rng)?;

    let images = dataset::load_dir(&augmentor.output_dir(), 8, 8, &Device::Cpu)?;
    assert_eq!(images.dims(), [20, 1, 8, 8]);
    let flat = images.flatten_all()?.to_vec1::<f32>()?;
    assert!(flat.iter().all(|v| (0.0..=1.0).contains(v)));

    let data = Dataset::split(&images, 0.2, &mut rng)?;
    assert_eq!(data.train_images.dims(), [16, 1, 8, 8]);
    assert_eq!(data.test_images.dims(), [4, 1, 8, 8]);
    Ok(())
}
