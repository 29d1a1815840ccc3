//! Capture error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera access denied: {0}")]
    AccessDenied(String),

    #[error("no camera matching the requested constraints")]
    NoDevice,

    #[error("failed to stop track: {0}")]
    TrackStop(String),

    #[error("invalid frame buffer: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },

    #[error("no frames found in {0}")]
    NoFrames(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
