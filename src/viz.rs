//! Qualitative evaluation: original versus reconstruction grids.

use candle::{DType, Module, Result, Tensor};
use image::GrayImage;
use rand::Rng;
use std::path::Path;

/// Draws `n` distinct random indices out of `len`.
pub fn sample_indices<R: Rng + ?Sized>(rng: &mut R, len: usize, n: usize) -> Result<Vec<u32>> {
    if n == 0 || n > len {
        candle::bail!("cannot sample {n} distinct indices from {len} test images")
    }
    Ok(rand::seq::index::sample(rng, len, n)
        .iter()
        .map(|i| i as u32)
        .collect())
}

/// Renders originals (top row) against reconstructions (bottom row).
///
/// Both tensors must be `(N, 1, H, W)` with values in `[0, 1]`. The grid is
/// their u8 rendition, `N * W` pixels wide and `2 * H` tall, pairing each
/// original with its reconstruction in the same column.
pub fn render_reconstructions(originals: &Tensor, reconstructions: &Tensor) -> Result<GrayImage> {
    let (n, _c, h, w) = originals.dims4()?;
    if reconstructions.dims() != originals.dims() {
        candle::bail!(
            "reconstruction shape {:?} does not match original shape {:?}",
            reconstructions.dims(),
            originals.dims()
        )
    }
    let rows = [to_bytes(originals)?, to_bytes(reconstructions)?];
    let mut grid = GrayImage::new((n * w) as u32, (2 * h) as u32);
    for (row, data) in rows.iter().enumerate() {
        for idx in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let v = data[idx * h * w + y * w + x];
                    grid.put_pixel((idx * w + x) as u32, (row * h + y) as u32, image::Luma([v]));
                }
            }
        }
    }
    Ok(grid)
}

fn to_bytes(images: &Tensor) -> Result<Vec<u8>> {
    (images.clamp(0f32, 1.)? * 255.)?
        .to_dtype(DType::U8)?
        .flatten_all()?
        .to_vec1::<u8>()
}

/// Runs `model` over `n` random test images and writes the paired grid to
/// `path` as one PNG.
pub fn save_reconstructions<M: Module, R: Rng + ?Sized>(
    model: &M,
    test_images: &Tensor,
    n: usize,
    rng: &mut R,
    path: &Path,
) -> Result<()> {
    let ids = sample_indices(rng, test_images.dim(0)?, n)?;
    let ids = Tensor::from_vec(ids, n, test_images.device())?;
    let originals = test_images.index_select(&ids, 0)?;
    let reconstructions = model.forward(&originals)?;
    let grid = render_reconstructions(&originals, &reconstructions)?;
    grid.save(path)
        .map_err(|err| candle::Error::Msg(format!("cannot write {path:?}: {err}")))?;
    Ok(())
}
