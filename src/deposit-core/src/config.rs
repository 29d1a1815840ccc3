//! Capture configuration
//!
//! TOML-based settings with named profiles. Every section falls back to the
//! defaults of the capture flow, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use deposit_capture::{Facing, StreamConstraints};
use deposit_ocr::{BandLayout, FieldExtractor, DIGIT_WHITELIST};

/// Main capture configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub countdown: CountdownConfig,

    #[serde(default)]
    pub capture: StillConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    /// Named profiles that can override base config
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

/// Stream request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// "environment" (rear) or "user" (front)
    #[serde(default = "default_facing")]
    pub facing: String,
}

/// Detection loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Time between detection samples
    #[serde(default = "default_detection_interval")]
    pub interval_ms: u64,

    /// Smallest document area, as a fraction of the frame, that triggers capture
    #[serde(default = "default_min_document_ratio")]
    pub min_document_ratio: f32,
}

/// Countdown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownConfig {
    #[serde(default = "default_countdown_start")]
    pub start: u8,

    #[serde(default = "default_countdown_tick")]
    pub tick_ms: u64,
}

/// Still frame settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StillConfig {
    /// Margin kept around the detected document when cropping
    #[serde(default = "default_crop_padding")]
    pub crop_padding_px: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// MICR recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_band_height")]
    pub band_height_ratio: f32,

    #[serde(default = "default_band_width")]
    pub band_width_ratio: f32,

    #[serde(default = "default_whitelist")]
    pub whitelist: String,
}

/// Profile for overriding settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub camera: Option<CameraConfig>,
    pub detection: Option<DetectionConfig>,
    pub countdown: Option<CountdownConfig>,
    pub capture: Option<StillConfig>,
    pub ocr: Option<OcrConfig>,
}

// Default value functions
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_facing() -> String { "environment".to_string() }
fn default_detection_interval() -> u64 { 2000 }
fn default_min_document_ratio() -> f32 { 0.45 }
fn default_countdown_start() -> u8 { 3 }
fn default_countdown_tick() -> u64 { 750 }
fn default_crop_padding() -> u32 { 20 }
fn default_jpeg_quality() -> u8 { 80 }
fn default_band_height() -> f32 { 0.15 }
fn default_band_width() -> f32 { 0.8 }
fn default_whitelist() -> String { DIGIT_WHITELIST.to_string() }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            facing: default_facing(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_detection_interval(),
            min_document_ratio: default_min_document_ratio(),
        }
    }
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            start: default_countdown_start(),
            tick_ms: default_countdown_tick(),
        }
    }
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            crop_padding_px: default_crop_padding(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            band_height_ratio: default_band_height(),
            band_width_ratio: default_band_width(),
            whitelist: default_whitelist(),
        }
    }
}

impl CameraConfig {
    pub fn constraints(&self) -> StreamConstraints {
        let facing = if self.facing.eq_ignore_ascii_case("user") {
            Facing::User
        } else {
            Facing::Environment
        };

        StreamConstraints {
            facing,
            ideal_width: self.width,
            ideal_height: self.height,
            audio: false,
        }
    }
}

impl DetectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl CountdownConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl OcrConfig {
    pub fn extractor(&self) -> FieldExtractor {
        FieldExtractor::new(
            BandLayout {
                height_ratio: self.band_height_ratio,
                width_ratio: self.band_width_ratio,
            },
            self.whitelist.clone(),
        )
    }
}

impl CaptureConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&content).context("Failed to parse capture config TOML")
    }

    /// Load from `path`, or from the default location if it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply a named profile, merging settings
    ///
    /// Profile settings override base configuration values.
    pub fn apply_profile(mut self, profile_name: &str) -> Result<Self> {
        let profile = self
            .profiles
            .get(profile_name)
            .with_context(|| format!("Profile '{}' not found", profile_name))?
            .clone();

        if let Some(camera) = profile.camera {
            self.camera = camera;
        }
        if let Some(detection) = profile.detection {
            self.detection = detection;
        }
        if let Some(countdown) = profile.countdown {
            self.countdown = countdown;
        }
        if let Some(capture) = profile.capture {
            self.capture = capture;
        }
        if let Some(ocr) = profile.ocr {
            self.ocr = ocr;
        }

        Ok(self)
    }

    /// `<config dir>/deposit/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deposit")
            .join("config.toml")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize capture config")
    }
}
