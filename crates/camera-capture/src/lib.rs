//! Frame sources for the drowsiness monitor
//!
//! Provides the frames that feed per-frame classification:
//! - Cabin webcam (640x480 requested) through V4L2 (feature `v4l2`)
//! - Uploaded video files (`.mp4`, `.avi`) through FFmpeg (feature `ffmpeg`)
//! - Synthetic `stub://` sources for tests and dry runs

pub mod camera;
pub mod file;
pub mod frame;
pub mod source;

#[cfg(feature = "ffmpeg")]
mod file_ffmpeg;
#[cfg(feature = "v4l2")]
mod v4l2;

pub use camera::CameraSource;
pub use file::{FileConfig, VideoFileSource, SUPPORTED_EXTENSIONS};
pub use frame::VideoFrame;
pub use source::FrameSource;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Failed to open video file: {0}")]
    File(String),

    #[error("Unsupported video file: {0} (expected .mp4 or .avi)")]
    UnsupportedFile(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Camera not initialized")]
    NotInitialized,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0", or "stub://cabin" for synthetic frames)
    pub device: String,
    /// Requested capture width
    pub width: u32,
    /// Requested capture height
    pub height: u32,
    /// Requested FPS (0 leaves the device default)
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CameraConfig {
    /// Synthetic camera config for tests and dry runs
    pub fn stub() -> Self {
        Self {
            device: "stub://cabin".to_string(),
            ..Default::default()
        }
    }
}

/// Returns true for `stub://` source paths.
pub(crate) fn is_stub(path: &str) -> bool {
    path.starts_with("stub://")
}

/// Capture timestamp in nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
