//! Still frames sampled from a video stream

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};

use crate::error::{CaptureError, Result};

/// A single RGBA frame drawn from the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Wrap an RGBA buffer, checking that its size matches the dimensions
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(CaptureError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            timestamp: Utc::now(),
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp: Utc::now(),
        }
    }

    /// A stream that has not delivered data yet reports zero dimensions.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Convert to RGBA image buffer
    pub fn to_image(&self) -> Option<RgbaImage> {
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
    }

    /// Encode as a JPEG `data:` URI, the format the next screen consumes.
    pub fn to_data_uri(&self, quality: u8) -> Result<String> {
        let image = self.to_image().ok_or(CaptureError::InvalidFrame {
            expected: self.area() as usize * 4,
            actual: self.data.len(),
        })?;

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(&rgb)?;

        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
    }
}
