//! Padded crops around a detected document

use image::imageops;

use deposit_capture::Frame;

use crate::detector::Bounds;
use crate::error::{Result, VisionError};

/// Crop parameters passed to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRequest {
    /// Bounding box from the last qualifying detection
    pub hint: Option<Bounds>,
    /// Margin added on every side, clamped to the frame
    pub padding: u32,
}

/// Cut `bounds` grown by `padding` out of `frame`
pub fn crop_with_padding(frame: &Frame, bounds: Bounds, padding: u32) -> Result<Frame> {
    if frame.is_empty() {
        return Err(VisionError::EmptyFrame);
    }
    if bounds.width == 0
        || bounds.height == 0
        || bounds.x >= frame.width
        || bounds.y >= frame.height
    {
        return Err(VisionError::OutOfBounds(format!("{:?}", bounds)));
    }

    let x = bounds.x.saturating_sub(padding);
    let y = bounds.y.saturating_sub(padding);
    let right = (bounds.x + bounds.width).saturating_add(padding).min(frame.width);
    let bottom = (bounds.y + bounds.height).saturating_add(padding).min(frame.height);

    let image = frame
        .to_image()
        .ok_or_else(|| VisionError::ConversionError("frame buffer size mismatch".to_string()))?;
    let cropped = imageops::crop_imm(&image, x, y, right - x, bottom - y).to_image();

    Ok(Frame::from_image(cropped))
}
