//! Tray card detection: ROI masking, HSV classification, region extraction and debouncing.

pub mod color;
pub mod detector;
pub mod frame;
pub mod regions;
pub mod source;

pub use color::{ColorRange, HsvBand};
pub use detector::{CardDetector, DetectionCounter, DetectorCfg, FrameReport};
pub use frame::{Frame, Hsv, HsvImage, Mask, Roi};
pub use regions::{Region, find_regions};
pub use source::{CaptureError, FrameQueue, FrameSource, ImageSequence};
