//! Uploaded video file source.
//!
//! Only local `.mp4` and `.avi` files are accepted. Real files are decoded
//! with FFmpeg (feature `ffmpeg`); `stub://name?frames=N` paths yield `N`
//! synthetic frames and then end.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[cfg(feature = "ffmpeg")]
use crate::file_ffmpeg::FfmpegFile;
use crate::source::{FrameSource, SyntheticFrames};
use crate::{CameraError, VideoFrame};

/// Extensions accepted by the video file picker
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi"];

/// Frame size of synthetic file frames
const STUB_WIDTH: u32 = 320;
const STUB_HEIGHT: u32 = 240;

/// Configuration for a video file source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Local file path (e.g., "/home/me/drive.mp4")
    pub path: String,
}

/// Video file frame source
pub struct VideoFileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic { frames: SyntheticFrames, limit: u64 },
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(FfmpegFile),
}

impl VideoFileSource {
    /// Open a video file for a single playback pass
    pub fn open(config: &FileConfig) -> Result<Self, CameraError> {
        let path = config.path.trim();
        if path.is_empty() {
            return Err(CameraError::File("no video file selected".into()));
        }

        if crate::is_stub(path) {
            let limit = stub_frame_count(path)?;
            info!("Video file {} opened (synthetic, {} frames)", path, limit);
            return Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Synthetic {
                    frames: SyntheticFrames::new(STUB_WIDTH, STUB_HEIGHT),
                    limit,
                },
            });
        }

        if path.contains("://") {
            return Err(CameraError::File(format!(
                "{}: only local files are supported",
                path
            )));
        }
        if !has_supported_extension(path) {
            return Err(CameraError::UnsupportedFile(path.to_string()));
        }

        #[cfg(feature = "ffmpeg")]
        {
            let decoder = FfmpegFile::open(path)?;
            Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Ffmpeg(decoder),
            })
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            Err(CameraError::File(format!(
                "{}: video decoding requires the ffmpeg feature",
                path
            )))
        }
    }

    /// Path this source was opened from
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FrameSource for VideoFileSource {
    fn name(&self) -> &str {
        &self.path
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        match &mut self.backend {
            FileBackend::Synthetic { frames, limit } => {
                if frames.frame_count() >= *limit {
                    Ok(None)
                } else {
                    Ok(Some(frames.next()))
                }
            }
            #[cfg(feature = "ffmpeg")]
            FileBackend::Ffmpeg(decoder) => decoder.next_frame(),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic { frames, .. } => frames.frame_count(),
            #[cfg(feature = "ffmpeg")]
            FileBackend::Ffmpeg(decoder) => decoder.frames_captured(),
        }
    }
}

/// Case-insensitive check against `SUPPORTED_EXTENSIONS`
pub fn has_supported_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Parse `frames=N` from a stub path query; a bare stub path has 100 frames.
fn stub_frame_count(path: &str) -> Result<u64, CameraError> {
    let Some((_, query)) = path.split_once('?') else {
        return Ok(100);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            return value
                .parse()
                .map_err(|_| CameraError::File(format!("{}: invalid frame count", path)));
        }
    }
    Ok(100)
}
