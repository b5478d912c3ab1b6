use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::frame::Frame;

/// Frame acquisition failures. Fatal for the detection phase.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to open frame source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no images found in {0}")]
    Empty(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame source exhausted")]
    Exhausted,
}

/// Blocking frame producer. Dropping the source releases the device.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays still images from a directory, in file-name order.
#[derive(Debug)]
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
}

impl ImageSequence {
    pub fn open(dir: &Path, looping: bool) -> Result<Self, CaptureError> {
        let entries = std::fs::read_dir(dir).map_err(|source| CaptureError::Open {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        if files.is_empty() {
            return Err(CaptureError::Empty(dir.to_path_buf()));
        }
        files.sort();
        tracing::info!(dir = %dir.display(), frames = files.len(), looping, "image sequence opened");
        Ok(Self { dir: dir.to_path_buf(), files, next: 0, looping })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn name(&self) -> &str {
        "image-sequence"
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Err(CaptureError::Exhausted);
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;
        let img = image::open(path).map_err(|source| CaptureError::Decode {
            path: path.clone(),
            source,
        })?;
        Ok(Frame::from(img.to_rgb8()))
    }
}

impl Drop for ImageSequence {
    fn drop(&mut self) {
        tracing::debug!(dir = %self.dir.display(), "image sequence released");
    }
}

/// In-memory frames, handed out in order.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
}

impl FrameQueue {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self { frames: frames.into_iter().collect() }
    }

    /// `frame` repeated `n` times.
    pub fn repeat(frame: Frame, n: usize) -> Self {
        Self::new(std::iter::repeat_n(frame, n))
    }
}

impl FrameSource for FrameQueue {
    fn name(&self) -> &str {
        "frame-queue"
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.frames.pop_front().ok_or(CaptureError::Exhausted)
    }
}
