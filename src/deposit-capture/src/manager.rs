//! Camera session ownership
//!
//! `CameraSessionManager` is the only owner of the live stream. Every exit
//! path (capture done, retake, cancel, page hide, navigation, teardown) goes
//! through [`CameraSessionManager::release`], and a handle that is dropped
//! without being released stops its tracks on the way out.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::camera::{CameraBackend, StreamConstraints, VideoStream};
use crate::error::Result;
use crate::frame::Frame;
use crate::preview::PreviewSink;

/// Identifies one acquisition of the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera#{}", self.0)
    }
}

/// Why the camera is being released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    CaptureComplete,
    Retake,
    Cancel,
    Back,
    Continue,
    PageHidden,
    NavigatedAway,
    Unload,
    Teardown,
    /// A second stream was installed over a live one
    Replaced,
    /// The stream arrived after its session moved on
    Stale,
}

impl ReleaseReason {
    /// Releases triggered from outside the capture flow
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            ReleaseReason::NavigatedAway | ReleaseReason::Unload | ReleaseReason::Teardown
        )
    }
}

/// Exclusive ownership of one live stream
pub struct CameraHandle<S: VideoStream> {
    id: HandleId,
    stream: S,
    released: bool,
}

impl<S: VideoStream> CameraHandle<S> {
    pub fn new(id: HandleId, stream: S) -> Self {
        Self {
            id,
            stream,
            released: false,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop all tracks. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        debug!(
            "stopping {} with {} track(s)",
            self.id,
            self.stream.track_count()
        );
        self.stream.stop()
    }
}

impl<S: VideoStream> Drop for CameraHandle<S> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to stop {} on drop: {}", self.id, e);
        }
    }
}

/// Owns device video stream acquisition and release for one capture session
pub struct CameraSessionManager<B: CameraBackend> {
    backend: Rc<B>,
    constraints: StreamConstraints,
    preview: Rc<dyn PreviewSink>,
    live: Option<CameraHandle<B::Stream>>,
    next_id: u64,
}

impl<B: CameraBackend + 'static> CameraSessionManager<B> {
    pub fn new(backend: B, constraints: StreamConstraints, preview: Rc<dyn PreviewSink>) -> Self {
        Self {
            backend: Rc::new(backend),
            constraints,
            preview,
            live: None,
            next_id: 1,
        }
    }

    pub fn constraints(&self) -> &StreamConstraints {
        &self.constraints
    }

    /// Request a stream from the backend.
    ///
    /// The returned future owns everything it needs, so the caller may run
    /// it as a separate task and hand the stream back through [`install`]
    /// or [`discard`] once it resolves.
    ///
    /// [`install`]: CameraSessionManager::install
    /// [`discard`]: CameraSessionManager::discard
    pub fn open_stream(&self) -> impl Future<Output = Result<B::Stream>> + 'static {
        let backend = Rc::clone(&self.backend);
        let constraints = self.constraints.clone();

        async move {
            debug!(
                "requesting {:?} camera at {}x{}",
                constraints.facing, constraints.ideal_width, constraints.ideal_height
            );
            backend.open(&constraints).await
        }
    }

    /// Take ownership of a freshly opened stream and attach it to the preview.
    pub fn install(&mut self, stream: B::Stream) -> HandleId {
        if self.live.is_some() {
            self.release(ReleaseReason::Replaced);
        }

        let id = HandleId(self.next_id);
        self.next_id += 1;

        info!("{} acquired ({} track(s))", id, stream.track_count());
        self.preview.show_live(id);
        self.live = Some(CameraHandle::new(id, stream));
        id
    }

    /// Stop a stream that resolved after its request became stale.
    pub fn discard(&mut self, stream: B::Stream) {
        let mut handle = CameraHandle::new(HandleId(0), stream);
        if let Err(e) = handle.release() {
            warn!("failed to stop stale stream: {}", e);
        }
        info!("discarded stale camera stream");
    }

    /// Release the live stream, if any. Never fails; returns whether a live
    /// handle was stopped.
    pub fn release(&mut self, reason: ReleaseReason) -> bool {
        let Some(mut handle) = self.live.take() else {
            debug!("release ({:?}): no live camera", reason);
            return false;
        };

        if let Err(e) = handle.release() {
            warn!("error stopping {} ({:?}): {}", handle.id(), reason, e);
        }
        self.preview.clear();

        if reason.is_forced() {
            info!("{} force released ({:?})", handle.id(), reason);
        } else {
            info!("{} released ({:?})", handle.id(), reason);
        }
        true
    }

    /// Frame currently on the live stream
    pub fn current_frame(&self) -> Option<Frame> {
        self.live
            .as_ref()
            .and_then(|handle| handle.stream().current_frame())
    }

    /// Show a still in place of the live picture
    pub fn freeze_preview(&self, frame: &Frame) {
        self.preview.show_frozen(frame);
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_handle(&self) -> Option<HandleId> {
        self.live.as_ref().map(CameraHandle::id)
    }
}

impl<B: CameraBackend> Drop for CameraSessionManager<B> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.live.take() {
            if let Err(e) = handle.release() {
                warn!("error stopping {} on teardown: {}", handle.id(), e);
            }
            self.preview.clear();
            info!("{} force released ({:?})", handle.id(), ReleaseReason::Teardown);
        }
    }
}
