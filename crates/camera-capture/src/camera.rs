//! Live camera source.
//!
//! Uses V4L2 for real devices (feature `v4l2`), with a synthetic fallback for
//! `stub://` device paths.

use tracing::info;

use crate::source::{FrameSource, SyntheticFrames};
#[cfg(feature = "v4l2")]
use crate::v4l2::DeviceCamera;
use crate::{CameraConfig, CameraError, VideoFrame};

/// Live camera frame source
pub struct CameraSource {
    config: CameraConfig,
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticFrames),
    #[cfg(feature = "v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    /// Open the configured camera and request its capture resolution
    pub fn open(config: CameraConfig) -> Result<Self, CameraError> {
        if config.width == 0 || config.height == 0 {
            return Err(CameraError::Format(format!(
                "invalid capture size {}x{}",
                config.width, config.height
            )));
        }

        if crate::is_stub(&config.device) {
            info!("Camera {} opened (synthetic {}x{})", config.device, config.width, config.height);
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticFrames::new(config.width, config.height)),
                config,
            });
        }

        #[cfg(feature = "v4l2")]
        {
            let device = DeviceCamera::open(&config)?;
            Ok(Self {
                backend: CameraBackend::Device(device),
                config,
            })
        }
        #[cfg(not(feature = "v4l2"))]
        {
            Err(CameraError::Open(format!(
                "{}: camera capture requires the v4l2 feature",
                config.device
            )))
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        match &mut self.backend {
            CameraBackend::Synthetic(frames) => Ok(Some(frames.next())),
            #[cfg(feature = "v4l2")]
            CameraBackend::Device(device) => device.next_frame(),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            CameraBackend::Synthetic(frames) => frames.frame_count(),
            #[cfg(feature = "v4l2")]
            CameraBackend::Device(device) => device.frames_captured(),
        }
    }
}
