//! Record decoding: bytes to normalized image pairs

use image::imageops::FilterType;
use std::marker::PhantomData;
use std::time::Instant;

use super::image::{Image, ImagePair, Pixel};
use super::record::PairRecord;
use crate::error::{PipelineError, Result};
use crate::metrics::standard;

/// Decodes records into pairs at a fixed `(height, width)`
#[derive(Debug, Clone, Copy)]
pub struct RecordDecoder<P: Pixel = f32> {
    height: u32,
    width: u32,
    _pixel: PhantomData<P>,
}

impl<P: Pixel> RecordDecoder<P> {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            height: resolution.0,
            width: resolution.1,
            _pixel: PhantomData,
        }
    }

    /// `(height, width)` every decoded image ends up with
    pub fn resolution(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Parse a framed payload and decode both images
    pub fn decode_payload(&self, payload: bytes::Bytes) -> Result<ImagePair<P>> {
        let record = PairRecord::decode(payload)?;
        self.decode(&record)
    }

    /// Decode both fields of a record
    pub fn decode(&self, record: &PairRecord) -> Result<ImagePair<P>> {
        let start = Instant::now();
        let degraded = self.decode_image(&record.degraded, "degraded")?;
        let clean = self.decode_image(&record.clean, "clean")?;
        let pair = ImagePair::new(degraded, clean)?;
        standard::RECORDS_DECODED.inc();
        standard::DECODE_DURATION.observe(start.elapsed().as_secs_f64());
        Ok(pair)
    }

    /// Decode one encoded image to RGB, resize bilinearly, rescale to [0, 1]
    pub fn decode_image(&self, bytes: &[u8], field: &'static str) -> Result<Image<P>> {
        let rgb = image::load_from_memory(bytes)
            .map_err(|source| PipelineError::Decode { field, source })?
            .to_rgb8();
        if rgb.dimensions() == (self.width, self.height) {
            return Ok(Image::from_rgb8(&rgb));
        }
        let resized = image::imageops::resize(&rgb, self.width, self.height, FilterType::Triangle);
        Ok(Image::from_rgb8(&resized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::bf16;
    use std::io::Cursor;

    fn png(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([value, value / 2, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_resizes_and_normalizes() {
        let decoder = RecordDecoder::<f32>::new((8, 12));
        let record = PairRecord::new(png(24, 16, 100), png(24, 16, 200));
        let pair = decoder.decode(&record).unwrap();
        assert_eq!(pair.shape(), (8, 12, 3));
        assert!(pair.clean().as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((pair.clean().as_slice()[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_bf16() {
        let decoder = RecordDecoder::<bf16>::new((4, 4));
        let pair = decoder
            .decode(&PairRecord::new(png(4, 4, 0), png(4, 4, 255)))
            .unwrap();
        assert_eq!(pair.degraded().as_slice()[0].to_f32(), 0.0);
        assert_eq!(pair.clean().as_slice()[0].to_f32(), 1.0);
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let decoder = RecordDecoder::<f32>::new((4, 4));
        let err = decoder
            .decode(&PairRecord::new(vec![0u8, 1, 2, 3], png(4, 4, 1)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode { field: "degraded", .. }));
    }

    #[test]
    fn test_decode_payload_rejects_malformed() {
        let decoder = RecordDecoder::<f32>::new((4, 4));
        let err = decoder.decode_payload(bytes::Bytes::from_static(&[1, 0])).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { .. }));
    }
}
