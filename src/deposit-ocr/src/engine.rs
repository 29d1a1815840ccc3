//! Text recognition seam
//!
//! Engines recognise text inside one rectangle of a still, restricted to a
//! character whitelist. For checks that rectangle is the MICR band along the
//! bottom edge.

use deposit_capture::Frame;
use image::imageops;
use serde::{Deserialize, Serialize};

use crate::error::{OcrError, Result};

/// Characters a MICR line is recognised with. The amount field therefore
/// comes back as plain digits; add `.` to read a printed decimal point.
pub const DIGIT_WHITELIST: &str = "0123456789";

/// Rectangle of the image handed to the recogniser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RecognitionRegion {
    /// Bottom band of an image: the last `height_ratio` of its height and the
    /// centred `width_ratio` of its width.
    pub fn bottom_band(width: u32, height: u32, height_ratio: f32, width_ratio: f32) -> Self {
        let band_height = ((height as f32 * height_ratio.clamp(0.0, 1.0)).round() as u32)
            .clamp(1.min(height), height);
        let band_width = ((width as f32 * width_ratio.clamp(0.0, 1.0)).round() as u32)
            .clamp(1.min(width), width);

        Self {
            x: (width - band_width) / 2,
            y: height - band_height,
            width: band_width,
            height: band_height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Cut this region out of `frame`
    pub fn crop(&self, frame: &Frame) -> Result<Frame> {
        if self.is_empty() || self.x + self.width > frame.width || self.y + self.height > frame.height {
            return Err(OcrError::ConversionError(format!(
                "region {:?} does not fit {}x{} frame",
                self, frame.width, frame.height
            )));
        }

        let image = frame
            .to_image()
            .ok_or_else(|| OcrError::ConversionError("failed to create image buffer".to_string()))?;
        let band = imageops::crop_imm(&image, self.x, self.y, self.width, self.height).to_image();
        Ok(Frame::from_image(band))
    }
}

/// Text recognition collaborator
#[allow(async_fn_in_trait)]
pub trait OcrEngine {
    /// Recognise text inside `region` of `image`, restricted to the
    /// characters in `whitelist`. Lines are separated by `\n`.
    async fn recognize(
        &self,
        image: &Frame,
        region: RecognitionRegion,
        whitelist: &str,
    ) -> Result<String>;
}
