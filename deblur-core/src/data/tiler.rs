//! Lossless patch tiling and reconstruction
//!
//! Tiling is pure slicing, reconstruction pure concatenation, so
//! `reconstruct(&tile(img, grid)?, grid)? == img` holds bit-for-bit.

use serde::{Deserialize, Serialize};

use super::image::{Image, ImagePair, Pixel};
use crate::error::{PipelineError, Result};

/// Grid of `rows x cols` non-overlapping patches, indexed `row * cols + col`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGrid {
    pub rows: usize,
    pub cols: usize,
}

impl PatchGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Patches per image
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of the patch at `(row, col)`
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Patch `(height, width)` for an image of the given size
    pub fn patch_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        if self.rows == 0 || self.cols == 0 || height % self.rows != 0 || width % self.cols != 0 {
            return Err(PipelineError::PatchGeometry {
                rows: self.rows,
                cols: self.cols,
                height,
                width,
            });
        }
        Ok((height / self.rows, width / self.cols))
    }
}

/// Split one image into `grid.len()` patches in row-major order
pub fn tile<P: Pixel>(image: &Image<P>, grid: PatchGrid) -> Result<Vec<Image<P>>> {
    let (ph, pw) = grid.patch_size(image.height(), image.width())?;
    let c = image.channels();
    let mut patches = Vec::with_capacity(grid.len());

    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let mut data = Vec::with_capacity(ph * pw * c);
            for y in row * ph..(row + 1) * ph {
                let line = image.row(y);
                data.extend_from_slice(&line[col * pw * c..(col + 1) * pw * c]);
            }
            patches.push(Image::from_vec(ph, pw, c, data)?);
        }
    }
    Ok(patches)
}

/// Tile both images of a pair with the same grid, keeping patch `i` of the
/// degraded image paired with patch `i` of the clean one
pub fn tile_pair<P: Pixel>(pair: &ImagePair<P>, grid: PatchGrid) -> Result<Vec<ImagePair<P>>> {
    let degraded = tile(pair.degraded(), grid)?;
    let clean = tile(pair.clean(), grid)?;
    degraded
        .into_iter()
        .zip(clean)
        .map(|(d, c)| ImagePair::new(d, c))
        .collect()
}

/// Reassemble an image from `grid.len()` row-major patches
///
/// Usable on its own, e.g. to stitch model predictions made per patch.
pub fn reconstruct<P: Pixel>(patches: &[Image<P>], grid: PatchGrid) -> Result<Image<P>> {
    if grid.is_empty() || patches.len() != grid.len() {
        return Err(PipelineError::invalid_config(format!(
            "expected {} patches for a {}x{} grid, got {}",
            grid.len(),
            grid.rows,
            grid.cols,
            patches.len()
        )));
    }
    let shape = patches[0].shape();
    if let Some(bad) = patches.iter().find(|p| p.shape() != shape) {
        return Err(PipelineError::ShapeMismatch {
            left: shape,
            right: bad.shape(),
        });
    }
    let (ph, pw, c) = shape;
    let (height, width) = (ph * grid.rows, pw * grid.cols);
    let mut data = Vec::with_capacity(height * width * c);

    for row in 0..grid.rows {
        let band = &patches[grid.index(row, 0)..grid.index(row, 0) + grid.cols];
        for y in 0..ph {
            for patch in band {
                data.extend_from_slice(patch.row(y));
            }
        }
    }
    Image::from_vec(height, width, c, data)
}

/// Reassemble both images of a pair from row-major patch pairs
pub fn reconstruct_pair<P: Pixel>(patches: &[ImagePair<P>], grid: PatchGrid) -> Result<ImagePair<P>> {
    let degraded: Vec<Image<P>> = patches.iter().map(|p| p.degraded().clone()).collect();
    let clean: Vec<Image<P>> = patches.iter().map(|p| p.clean().clone()).collect();
    ImagePair::new(reconstruct(&degraded, grid)?, reconstruct(&clean, grid)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image::CHANNELS;

    fn indexed(height: usize, width: usize) -> Image {
        let data = (0..height * width * CHANNELS).map(|i| i as f32).collect();
        Image::from_vec(height, width, CHANNELS, data).unwrap()
    }

    #[test]
    fn test_patch_order_is_row_major() {
        let img = indexed(4, 6);
        let grid = PatchGrid::new(2, 3);
        let patches = tile(&img, grid).unwrap();
        assert_eq!(patches.len(), 6);
        assert!(patches.iter().all(|p| p.shape() == (2, 2, 3)));
        // patch (1, 2) starts at pixel (2, 4)
        let expected = ((2 * 6 + 4) * CHANNELS) as f32;
        assert_eq!(patches[grid.index(1, 2)].as_slice()[0], expected);
    }

    #[test]
    fn test_round_trip() {
        let img = indexed(288 / 8, 512 / 8);
        let grid = PatchGrid::new(3, 4);
        let patches = tile(&img, grid).unwrap();
        assert_eq!(reconstruct(&patches, grid).unwrap(), img);
    }

    #[test]
    fn test_non_divisible_is_error() {
        let err = tile(&indexed(5, 4), PatchGrid::new(2, 2)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_reconstruct_wrong_count() {
        let patches = tile(&indexed(4, 4), PatchGrid::new(2, 2)).unwrap();
        assert!(reconstruct(&patches[..3], PatchGrid::new(2, 2)).is_err());
    }

    #[test]
    fn test_pair_patches_stay_aligned() {
        let clean = indexed(4, 4);
        let degraded = clean.flip_vertical();
        let pair = ImagePair::new(degraded, clean).unwrap();
        let grid = PatchGrid::new(2, 2);
        let patches = tile_pair(&pair, grid).unwrap();
        assert_eq!(reconstruct_pair(&patches, grid).unwrap(), pair);
    }
}
