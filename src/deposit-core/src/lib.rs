//! Deposit Core Library
//!
//! Capture session orchestration for check deposits: camera lifecycle,
//! document detection loop, countdown, still capture and MICR extraction.

pub mod colored_logger;
pub mod config;
pub mod countdown;
pub mod detection;
pub mod handoff;
pub mod orchestrator;
pub mod ready;
pub mod session;

pub use config::CaptureConfig;
pub use countdown::{CaptureCountdown, CountdownTick};
pub use detection::{Classification, DetectionStatus, MIN_DOCUMENT_SIZE_PERCENTAGE};
pub use handoff::{CaptureHandoff, NextScreen};
pub use orchestrator::{
    CaptureController, CaptureOrchestrator, Command, SessionEvent, SessionOutcome,
};
pub use ready::{Initializer, Readiness};
pub use session::{CameraState, Phase, SessionSnapshot, SessionState, Step};
