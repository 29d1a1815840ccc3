//! MICR field extraction for deposit capture
//!
//! This crate runs text recognition over the bottom band of a captured check
//! and turns the recognised MICR line into routing, account and check number
//! plus amount. Parsing is positional and performs no validation.

mod engine;
mod error;
mod extractor;
mod micr;
mod transcript;

pub use engine::{OcrEngine, RecognitionRegion, DIGIT_WHITELIST};
pub use error::{OcrError, Result};
pub use extractor::{BandLayout, FieldExtractor};
pub use micr::{clean_line, parse_micr, MicrFields};
pub use transcript::TranscriptOcr;
