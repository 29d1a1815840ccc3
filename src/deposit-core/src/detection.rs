//! Detection classification and the status shown to the user

use std::fmt;

use serde::Serialize;

use deposit_vision::DetectionResult;

/// Smallest document area, as a fraction of the frame, that triggers capture
pub const MIN_DOCUMENT_SIZE_PERCENTAGE: f32 = 0.45;

/// Status line shown over the camera preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionStatus {
    Idle,
    InitializingCamera,
    CameraDenied,
    PositionDocument,
    TooSmall { observed_pct: u32, required_pct: u32 },
    HoldStill,
    Extracting,
    Complete,
    Paused,
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionStatus::Idle => write!(f, "Ready to capture"),
            DetectionStatus::InitializingCamera => write!(f, "Initializing camera..."),
            DetectionStatus::CameraDenied => {
                write!(f, "Camera access denied. Allow camera access and try again.")
            }
            DetectionStatus::PositionDocument => write!(f, "Position document within frame"),
            DetectionStatus::TooSmall {
                observed_pct,
                required_pct,
            } => write!(
                f,
                "Move closer: document fills {}% of the frame, {}% needed",
                observed_pct, required_pct
            ),
            DetectionStatus::HoldStill => write!(f, "Hold still..."),
            DetectionStatus::Extracting => write!(f, "Extracting..."),
            DetectionStatus::Complete => write!(f, "Capture complete"),
            DetectionStatus::Paused => write!(f, "Camera paused"),
        }
    }
}

/// What a detection sample means for the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    /// Large enough: start the countdown
    Capture,
    /// Something was seen but it is too small
    TooSmall { observed_pct: u32, required_pct: u32 },
    NotFound,
}

impl Classification {
    /// Classify one detection sample. Rules apply in order; the caller is
    /// responsible for skipping this while a countdown runs.
    pub fn of(result: &DetectionResult, min_ratio: f32) -> Self {
        if result.detected && result.size_ratio >= min_ratio {
            Classification::Capture
        } else if result.size_ratio > 0.0 && result.size_ratio < min_ratio {
            Classification::TooSmall {
                observed_pct: to_pct(result.size_ratio),
                required_pct: to_pct(min_ratio),
            }
        } else {
            Classification::NotFound
        }
    }

    pub fn status(&self) -> DetectionStatus {
        match *self {
            Classification::Capture => DetectionStatus::HoldStill,
            Classification::TooSmall {
                observed_pct,
                required_pct,
            } => DetectionStatus::TooSmall {
                observed_pct,
                required_pct,
            },
            Classification::NotFound => DetectionStatus::PositionDocument,
        }
    }
}

fn to_pct(ratio: f32) -> u32 {
    (ratio * 100.0).round() as u32
}
