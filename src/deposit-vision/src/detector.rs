//! Document detection
//!
//! The detector contract mirrors what a contour finder reports: whether an
//! outline was found, its area and how many corners its polygon
//! approximation has. [`DetectionResult`] is what the capture loop consumes.

use serde::{Deserialize, Serialize};
use tracing::trace;

use deposit_capture::Frame;

use crate::crop::{crop_with_padding, CropRequest};
use crate::error::{Result, VisionError};

/// Axis-aligned bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Raw output of a contour pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContourReport {
    pub has_contour: bool,
    /// Area of the best candidate contour, in pixels
    pub area: f64,
    pub corner_count: u32,
    pub bounds: Option<Bounds>,
}

/// Detection outcome for one sampled frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DetectionResult {
    pub detected: bool,
    /// Candidate contour area over total frame area, in `[0, 1]`
    pub size_ratio: f32,
    pub bounds: Option<Bounds>,
}

impl DetectionResult {
    /// A document is a four cornered contour.
    pub fn from_report(report: &ContourReport, frame_area: u64) -> Self {
        if !report.has_contour || frame_area == 0 {
            return Self::default();
        }

        let size_ratio = (report.area / frame_area as f64).clamp(0.0, 1.0) as f32;
        Self {
            detected: report.corner_count == 4,
            size_ratio,
            bounds: report.bounds,
        }
    }
}

/// Image processing collaborator
#[allow(async_fn_in_trait)]
pub trait DocumentDetector {
    async fn detect(&self, frame: &Frame) -> Result<ContourReport>;

    /// Cut the document out of `frame`. Without a hint the implementation
    /// picks its own best guess.
    async fn crop_to_bounds(&self, frame: &Frame, request: CropRequest) -> Result<Frame>;
}

/// Tuning for [`LuminanceDetector`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Minimum spread between darkest and brightest pixel
    pub min_contrast: u8,
    /// Fraction of the bounding box the bright region must fill to count
    /// as a quadrilateral
    pub min_fill: f32,
    /// Smallest region, as a fraction of the frame, reported as a contour
    pub min_coverage: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            min_contrast: 40,
            min_fill: 0.85,
            min_coverage: 0.01,
        }
    }
}

/// Finds a light document on a darker background.
///
/// Pixels brighter than the midpoint of the frame's luminance range form
/// the candidate region; a region that nearly fills its bounding box is
/// reported as a quadrilateral.
#[derive(Debug, Clone, Default)]
pub struct LuminanceDetector {
    options: DetectorOptions,
}

impl LuminanceDetector {
    pub fn new(options: DetectorOptions) -> Self {
        Self { options }
    }

    pub fn analyze(&self, frame: &Frame) -> Result<ContourReport> {
        if frame.is_empty() {
            return Err(VisionError::EmptyFrame);
        }

        let expected = frame.area() as usize * 4;
        if frame.data.len() != expected {
            return Err(VisionError::ConversionError(format!(
                "expected {} bytes, got {}",
                expected,
                frame.data.len()
            )));
        }

        let luma: Vec<u8> = frame
            .data
            .chunks_exact(4)
            .map(|px| ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8)
            .collect();

        let min = luma.iter().copied().min().unwrap_or(0);
        let max = luma.iter().copied().max().unwrap_or(0);
        if max.saturating_sub(min) < self.options.min_contrast {
            trace!("flat frame (contrast {}), no contour", max - min);
            return Ok(ContourReport::default());
        }

        let threshold = min + (max - min) / 2;
        let width = frame.width as usize;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);
        let mut count = 0u64;

        for (i, &value) in luma.iter().enumerate() {
            if value > threshold {
                let (x, y) = (i % width, i / width);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                count += 1;
            }
        }

        let coverage = count as f64 / frame.area() as f64;
        if count == 0 || coverage < self.options.min_coverage as f64 {
            return Ok(ContourReport::default());
        }

        let bounds = Bounds {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        };
        let fill = count as f64 / bounds.area() as f64;
        let corner_count = if fill >= self.options.min_fill as f64 { 4 } else { 0 };

        trace!(
            "contour {:?} coverage {:.3} fill {:.3} corners {}",
            bounds,
            coverage,
            fill,
            corner_count
        );

        Ok(ContourReport {
            has_contour: true,
            area: count as f64,
            corner_count,
            bounds: Some(bounds),
        })
    }
}

impl DocumentDetector for LuminanceDetector {
    async fn detect(&self, frame: &Frame) -> Result<ContourReport> {
        self.analyze(frame)
    }

    async fn crop_to_bounds(&self, frame: &Frame, request: CropRequest) -> Result<Frame> {
        let bounds = match request.hint {
            Some(bounds) => bounds,
            None => self.analyze(frame)?.bounds.ok_or(VisionError::NoDocument)?,
        };

        crop_with_padding(frame, bounds, request.padding)
    }
}
