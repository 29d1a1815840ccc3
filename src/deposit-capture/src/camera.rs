//! Camera hardware abstraction
//!
//! A `CameraBackend` opens video streams; a `VideoStream` hands out the frame
//! currently on screen and stops its tracks on request.

use crate::error::Result;
use crate::frame::Frame;

/// Which camera to prefer when several are available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    /// Rear camera, the one pointed at the document
    #[default]
    Environment,
    User,
}

/// Constraints sent with every stream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
    /// Always false: capture never needs the microphone
    pub audio: bool,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing: Facing::Environment,
            ideal_width: 1280,
            ideal_height: 720,
            audio: false,
        }
    }
}

/// A live video stream
pub trait VideoStream {
    /// Frame currently displayed, or `None` while the stream has no data.
    fn current_frame(&self) -> Option<Frame>;

    /// Stop every track of the stream. Must tolerate repeated calls.
    fn stop(&mut self) -> Result<()>;

    fn is_live(&self) -> bool;

    fn track_count(&self) -> usize;
}

/// Device camera API
#[allow(async_fn_in_trait)]
pub trait CameraBackend {
    type Stream: VideoStream + 'static;

    /// Request a stream. Permission denial and device errors surface as `Err`.
    async fn open(&self, constraints: &StreamConstraints) -> Result<Self::Stream>;
}
