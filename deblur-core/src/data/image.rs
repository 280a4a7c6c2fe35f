//! Pixel buffers and paired images
//!
//! Images are row-major HWC buffers of normalized intensities in [0, 1].

use half::bf16;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Number of channels every decoded image carries (RGB)
pub const CHANNELS: usize = 3;

/// Numeric representation of one stored intensity
pub trait Pixel: Copy + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Storage precision tag
    const PRECISION: Precision;

    /// Convert from a unit-range `f32`
    fn from_unit(value: f32) -> Self;

    /// Widen back to `f32`
    fn to_f32(self) -> f32;
}

impl Pixel for f32 {
    const PRECISION: Precision = Precision::F32;

    #[inline]
    fn from_unit(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl Pixel for bf16 {
    const PRECISION: Precision = Precision::Bf16;

    #[inline]
    fn from_unit(value: f32) -> Self {
        bf16::from_f32(value)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
}

/// Storage precision for cached pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit float
    #[default]
    F32,
    /// bfloat16, half the memory of f32
    Bf16,
}

impl Precision {
    /// Bytes per stored intensity
    pub fn bytes_per_value(&self) -> usize {
        match self {
            Precision::F32 => 4,
            Precision::Bf16 => 2,
        }
    }
}

/// A single image as a row-major `[height, width, channels]` buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Image<P: Pixel = f32> {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<P>,
}

impl<P: Pixel> Image<P> {
    /// Wrap an existing buffer, checking its length against the shape
    pub fn from_vec(height: usize, width: usize, channels: usize, data: Vec<P>) -> Result<Self> {
        if data.len() != height * width * channels {
            return Err(PipelineError::invalid_config(format!(
                "buffer of {} values cannot hold a {}x{}x{} image",
                data.len(),
                height,
                width,
                channels
            )));
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Build an image from 8-bit RGB pixels, rescaling to [0, 1]
    pub fn from_rgb8(img: &image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let data = img
            .as_raw()
            .iter()
            .map(|&v| P::from_unit(v as f32 / 255.0))
            .collect();
        Self {
            height: height as usize,
            width: width as usize,
            channels: CHANNELS,
            data,
        }
    }

    /// Quantize back to 8-bit RGB. Only valid for 3-channel images.
    pub fn to_rgb8(&self) -> Result<image::RgbImage> {
        if self.channels != CHANNELS {
            return Err(PipelineError::invalid_config(format!(
                "cannot export {}-channel image as RGB",
                self.channels
            )));
        }
        let raw = self
            .data
            .iter()
            .map(|v| (v.to_f32().clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        image::RgbImage::from_raw(self.width as u32, self.height as u32, raw).ok_or_else(|| {
            PipelineError::Internal {
                message: "RGB buffer size mismatch".into(),
            }
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    pub fn as_slice(&self) -> &[P] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<P> {
        self.data
    }

    /// Values in one row, all columns and channels
    pub fn row(&self, y: usize) -> &[P] {
        let stride = self.width * self.channels;
        &self.data[y * stride..(y + 1) * stride]
    }

    /// Stored size in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<P>()
    }

    /// Mirror left-to-right
    pub fn flip_horizontal(&self) -> Self {
        let c = self.channels;
        let mut data = Vec::with_capacity(self.data.len());
        for y in 0..self.height {
            let row = self.row(y);
            for x in (0..self.width).rev() {
                data.extend_from_slice(&row[x * c..(x + 1) * c]);
            }
        }
        Self { data, ..*self }
    }

    /// Mirror top-to-bottom
    pub fn flip_vertical(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for y in (0..self.height).rev() {
            data.extend_from_slice(self.row(y));
        }
        Self { data, ..*self }
    }
}

/// A degraded image and its clean target, always the same shape
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePair<P: Pixel = f32> {
    degraded: Image<P>,
    clean: Image<P>,
}

impl<P: Pixel> ImagePair<P> {
    /// Pair two images, rejecting mismatched shapes
    pub fn new(degraded: Image<P>, clean: Image<P>) -> Result<Self> {
        if degraded.shape() != clean.shape() {
            return Err(PipelineError::ShapeMismatch {
                left: degraded.shape(),
                right: clean.shape(),
            });
        }
        Ok(Self { degraded, clean })
    }

    pub fn degraded(&self) -> &Image<P> {
        &self.degraded
    }

    pub fn clean(&self) -> &Image<P> {
        &self.clean
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.clean.shape()
    }

    pub fn byte_size(&self) -> usize {
        self.degraded.byte_size() + self.clean.byte_size()
    }

    pub fn into_parts(self) -> (Image<P>, Image<P>) {
        (self.degraded, self.clean)
    }

    /// Apply the same image transform to both members
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(&Image<P>) -> Image<P>,
    {
        Self {
            degraded: f(&self.degraded),
            clean: f(&self.clean),
        }
    }
}
