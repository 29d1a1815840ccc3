//! Camera backend that replays still images from a directory
//!
//! Each sample advances to the next image; the last image is held once the
//! sequence runs out, the way a steady hand holds a document in frame.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};

use crate::camera::{CameraBackend, StreamConstraints, VideoStream};
use crate::error::{CaptureError, Result};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub struct ReplayCamera {
    source: PathBuf,
    frames: Rc<Vec<Frame>>,
}

impl ReplayCamera {
    /// Load every image in `dir`, in file name order
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let image = image::open(path)?.to_rgba8();
            debug!("loaded replay frame {:?} ({}x{})", path, image.width(), image.height());
            frames.push(Frame::from_image(image));
        }

        info!("replay camera loaded {} frame(s) from {:?}", frames.len(), dir);
        Ok(Self::from_frames(dir.to_path_buf(), frames))
    }

    pub fn from_frames(source: PathBuf, frames: Vec<Frame>) -> Self {
        Self {
            source,
            frames: Rc::new(frames),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl CameraBackend for ReplayCamera {
    type Stream = ReplayStream;

    async fn open(&self, constraints: &StreamConstraints) -> Result<ReplayStream> {
        if self.frames.is_empty() {
            return Err(CaptureError::NoFrames(self.source.display().to_string()));
        }

        debug!(
            "replay stream opened (requested {}x{})",
            constraints.ideal_width, constraints.ideal_height
        );
        Ok(ReplayStream {
            frames: Rc::clone(&self.frames),
            cursor: Cell::new(0),
            live: true,
        })
    }
}

pub struct ReplayStream {
    frames: Rc<Vec<Frame>>,
    cursor: Cell<usize>,
    live: bool,
}

impl VideoStream for ReplayStream {
    fn current_frame(&self) -> Option<Frame> {
        if !self.live {
            return None;
        }

        let index = self.cursor.get().min(self.frames.len().saturating_sub(1));
        self.cursor.set(index + 1);
        self.frames.get(index).cloned()
    }

    fn stop(&mut self) -> Result<()> {
        self.live = false;
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn track_count(&self) -> usize {
        usize::from(self.live)
    }
}
