//! Preview surface the live stream is attached to

use crate::frame::Frame;
use crate::manager::HandleId;

/// Where the user sees the camera. Rendering itself is the embedder's job.
pub trait PreviewSink {
    /// Attach the live stream of `handle`
    fn show_live(&self, handle: HandleId);

    /// Replace the live picture with a frozen still
    fn show_frozen(&self, frame: &Frame);

    /// Detach the live stream. A frozen still stays on screen.
    fn clear(&self);
}

/// Preview for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn show_live(&self, _handle: HandleId) {}

    fn show_frozen(&self, _frame: &Frame) {}

    fn clear(&self) {}
}
