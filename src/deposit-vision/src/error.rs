use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("frame has no pixels")]
    EmptyFrame,

    #[error("no document found to crop")]
    NoDocument,

    #[error("crop region {0} lies outside the frame")]
    OutOfBounds(String),

    #[error("frame conversion error: {0}")]
    ConversionError(String),
}

pub type Result<T> = std::result::Result<T, VisionError>;
