//! Capture session state
//!
//! The phase is the single source of truth for what the session is doing;
//! the counting-down and extracting flags are derived from it. Only the
//! orchestrator mutates a [`SessionState`].

use std::rc::Rc;

use serde::Serialize;

use deposit_capture::Frame;
use deposit_ocr::MicrFields;
use deposit_vision::Bounds;

use crate::detection::DetectionStatus;

/// Which side of the check is being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Front,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Uninitialized,
    Initializing,
    Ready,
    Released,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    CameraInitializing,
    /// Acquisition failed; waits for a manual start or retake
    CameraDenied,
    /// Page hidden before capture finished; resumes when visible
    Suspended,
    Detecting,
    CountingDown,
    Capturing,
    Extracting,
    Complete,
    /// Results handed to the next screen
    Finished,
    Cancelled,
}

impl Phase {
    /// Phases holding or waiting on the live camera
    pub fn uses_camera(&self) -> bool {
        matches!(
            self,
            Phase::CameraInitializing | Phase::Detecting | Phase::CountingDown
        )
    }
}

/// Mutable state of one capture session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: Phase,
    pub step: Step,
    pub camera: CameraState,
    pub status: DetectionStatus,
    pub countdown: Option<u8>,
    pub front_image: Option<Rc<Frame>>,
    pub front_fields: MicrFields,
    /// Bounding box of the detection that started the countdown
    pub crop_hint: Option<Bounds>,
    /// Bumped whenever in-flight work must be ignored on arrival
    pub epoch: u64,
    /// Epoch of the detection call still running, if any. Cleared only when
    /// that call reports back, so a new epoch cannot overlap it.
    pub detection_in_flight: Option<u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            step: Step::Front,
            camera: CameraState::Uninitialized,
            status: DetectionStatus::Idle,
            countdown: None,
            front_image: None,
            front_fields: MicrFields::default(),
            crop_hint: None,
            epoch: 0,
            detection_in_flight: None,
        }
    }
}

impl SessionState {
    pub fn is_counting_down(&self) -> bool {
        self.phase == Phase::CountingDown
    }

    pub fn is_extracting(&self) -> bool {
        matches!(self.phase, Phase::Capturing | Phase::Extracting)
    }

    /// Whether a detection sample may start now
    pub fn detection_eligible(&self) -> bool {
        self.step == Step::Front
            && self.camera == CameraState::Ready
            && self.phase == Phase::Detecting
            && self.detection_in_flight.is_none()
    }

    /// Invalidate everything in flight. A running detection call keeps its
    /// marker; its result is dropped as stale when it arrives.
    pub fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Drop captured data and return to the front step
    pub fn clear_capture(&mut self) {
        self.step = Step::Front;
        self.front_image = None;
        self.front_fields = MicrFields::default();
        self.crop_hint = None;
        self.countdown = None;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            step: self.step,
            camera: self.camera,
            status: self.status.clone(),
            countdown: self.countdown,
            is_counting_down: self.is_counting_down(),
            is_extracting: self.is_extracting(),
            front_image: self.front_image.clone(),
            front_fields: self.front_fields.clone(),
        }
    }
}

/// Read-only view published to observers
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub step: Step,
    pub camera: CameraState,
    pub status: DetectionStatus,
    pub countdown: Option<u8>,
    pub is_counting_down: bool,
    pub is_extracting: bool,
    pub front_image: Option<Rc<Frame>>,
    pub front_fields: MicrFields,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionState::default().snapshot()
    }
}
