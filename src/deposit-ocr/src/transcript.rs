//! OCR engine backed by a recorded transcript
//!
//! Used for replayed capture sessions, where the recognised text of the
//! check is known ahead of time.

use std::path::PathBuf;

use deposit_capture::Frame;
use tracing::debug;

use crate::engine::{OcrEngine, RecognitionRegion};
use crate::error::Result;

pub enum TranscriptOcr {
    Text(String),
    File(PathBuf),
}

impl TranscriptOcr {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Transcript is read on each recognition, so it may be edited between runs
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }
}

impl OcrEngine for TranscriptOcr {
    async fn recognize(
        &self,
        image: &Frame,
        region: RecognitionRegion,
        whitelist: &str,
    ) -> Result<String> {
        // Same band a real engine would read; fails if it does not fit
        let band = region.crop(image)?;
        debug!("transcript OCR over {}x{} band", band.width, band.height);

        let text = match self {
            Self::Text(text) => text.clone(),
            Self::File(path) => tokio::fs::read_to_string(path).await?,
        };

        // Keep line structure, drop what the whitelist excludes
        let filtered: String = text
            .chars()
            .filter(|c| c.is_whitespace() || whitelist.contains(*c))
            .collect();

        debug!("transcript OCR returned {} line(s)", filtered.lines().count());
        Ok(filtered)
    }
}
