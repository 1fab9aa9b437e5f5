//! Frame source abstraction shared by live capture and file playback

use crate::{CameraError, VideoFrame};

/// A producer of video frames.
///
/// `Ok(None)` means the source has no frame to give: end of stream for a
/// file, or a dropped read for a camera. Errors are transport failures.
pub trait FrameSource {
    /// Human-readable source identifier (device or path)
    fn name(&self) -> &str;

    /// Capture the next frame
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;

    /// Frames successfully captured so far
    fn frames_captured(&self) -> u64;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        (**self).next_frame()
    }

    fn frames_captured(&self) -> u64 {
        (**self).frames_captured()
    }
}

/// Deterministic pixel generator behind `stub://` sources.
///
/// Alternates between a dark and a bright scene every 50 frames.
#[derive(Debug, Clone)]
pub(crate) struct SyntheticFrames {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticFrames {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
        }
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// RGB bytes per frame
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub(crate) fn next(&mut self) -> VideoFrame {
        let sequence = self.frame_count as u32;
        self.frame_count += 1;

        let base: u8 = if (sequence / 50) % 2 == 1 { 220 } else { 40 };
        let mut pixels = vec![0u8; self.frame_len()];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = base.wrapping_add(((i as u64 + self.frame_count) % 16) as u8);
        }

        VideoFrame::new(pixels, self.width, self.height, crate::now_ns(), sequence)
    }
}
