//! MICR field extraction: one OCR pass over the bottom band, then parsing

use deposit_capture::Frame;
use tracing::{debug, info};

use crate::engine::{OcrEngine, RecognitionRegion, DIGIT_WHITELIST};
use crate::error::{OcrError, Result};
use crate::micr::{parse_micr, MicrFields};

/// Where on the check the MICR line is read from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandLayout {
    /// Fraction of the image height, measured from the bottom edge
    pub height_ratio: f32,
    /// Fraction of the image width, centred
    pub width_ratio: f32,
}

impl Default for BandLayout {
    fn default() -> Self {
        Self {
            height_ratio: 0.15,
            width_ratio: 0.8,
        }
    }
}

/// Runs OCR on the MICR band and parses the result
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    layout: BandLayout,
    whitelist: String,
}

impl FieldExtractor {
    pub fn new(layout: BandLayout, whitelist: impl Into<String>) -> Self {
        Self {
            layout,
            whitelist: whitelist.into(),
        }
    }

    pub fn region_for(&self, image: &Frame) -> RecognitionRegion {
        RecognitionRegion::bottom_band(
            image.width,
            image.height,
            self.layout.height_ratio,
            self.layout.width_ratio,
        )
    }

    /// Recognise and parse the MICR line of `image`.
    ///
    /// Blank OCR output is reported as [`OcrError::EmptyResult`]; any text at
    /// all is parsed, even if no field comes out of it.
    pub async fn extract<E: OcrEngine>(&self, engine: &E, image: &Frame) -> Result<MicrFields> {
        if image.is_empty() {
            return Err(OcrError::ConversionError("image has no pixels".to_string()));
        }

        let region = self.region_for(image);
        debug!(
            "recognising MICR band {:?} of {}x{} image",
            region, image.width, image.height
        );

        let text = engine.recognize(image, region, &self.whitelist).await?;
        if text.trim().is_empty() {
            return Err(OcrError::EmptyResult);
        }

        let fields = parse_micr(&text);
        info!(
            "MICR line parsed: {} of 4 field(s) from {:?}",
            fields.populated(),
            fields.raw_line
        );
        Ok(fields)
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(BandLayout::default(), DIGIT_WHITELIST)
    }
}
