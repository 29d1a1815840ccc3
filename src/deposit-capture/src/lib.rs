//! deposit-capture - Camera acquisition for the deposit capture flow
//!
//! Owns the live video stream of a capture session and the still frames
//! sampled from it.

pub mod camera;
pub mod error;
pub mod frame;
pub mod manager;
pub mod preview;
pub mod replay;

pub use camera::{CameraBackend, Facing, StreamConstraints, VideoStream};
pub use error::CaptureError;
pub use frame::Frame;
pub use manager::{CameraHandle, CameraSessionManager, HandleId, ReleaseReason};
pub use preview::{NullPreview, PreviewSink};
pub use replay::{ReplayCamera, ReplayStream};
