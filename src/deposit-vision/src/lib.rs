//! deposit-vision - Document detection and cropping
//!
//! Finds the document in a camera frame and cuts a padded crop around it.

pub mod crop;
pub mod detector;
pub mod error;

pub use crop::{crop_with_padding, CropRequest};
pub use detector::{
    Bounds, ContourReport, DetectionResult, DetectorOptions, DocumentDetector, LuminanceDetector,
};
pub use error::{Result, VisionError};
