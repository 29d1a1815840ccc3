//! OCR error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    #[error("OCR returned no text")]
    EmptyResult,

    #[error("frame conversion error: {0}")]
    ConversionError(String),

    #[error("OCR processing error: {0}")]
    ProcessingError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OcrError>;
