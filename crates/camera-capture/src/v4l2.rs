//! V4L2 webcam capture.

use ouroboros::self_referencing;
use tracing::{info, warn};

use crate::{CameraConfig, CameraError, VideoFrame};

const RGB3: [u8; 4] = *b"RGB3";
const YUYV: [u8; 4] = *b"YUYV";

#[self_referencing]
struct DeviceStream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub(crate) struct DeviceCamera {
    stream: DeviceStream,
    width: u32,
    height: u32,
    fourcc: [u8; 4],
    frame_count: u64,
}

impl DeviceCamera {
    pub(crate) fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let open_err = |e: std::io::Error| CameraError::Open(format!("{}: {}", config.device, e));

        let device = v4l::Device::with_path(&config.device).map_err(open_err)?;
        let mut format = device.format().map_err(open_err)?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(&RGB3);

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                warn!("Failed to set RGB format on {}: {}", config.device, err);
                device.format().map_err(open_err)?
            }
        };

        if format.fourcc.repr != RGB3 && format.fourcc.repr != YUYV {
            return Err(CameraError::Format(format!(
                "{}: unsupported pixel format {}",
                config.device, format.fourcc
            )));
        }

        if config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.fps);
            if let Err(err) = device.set_params(&params) {
                warn!("Failed to set fps on {}: {}", config.device, err);
            }
        }

        let stream = DeviceStreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|e| CameraError::Stream(format!("create buffer stream: {}", e)))?;

        info!(
            "Camera {} opened ({}x{} {})",
            config.device, format.width, format.height, format.fourcc
        );

        Ok(Self {
            stream,
            width: format.width,
            height: format.height,
            fourcc: format.fourcc.repr,
            frame_count: 0,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        use v4l::io::traits::CaptureStream;

        let raw = self
            .stream
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| CameraError::Stream(e.to_string()))?;

        let pixels = if self.fourcc == YUYV {
            yuyv_to_rgb(&raw, self.width, self.height)?
        } else {
            raw
        };

        let sequence = self.frame_count as u32;
        self.frame_count += 1;
        VideoFrame::from_rgb(pixels, self.width, self.height, crate::now_ns(), sequence).map(Some)
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn yuyv_to_rgb(raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    let expected = width as usize * height as usize * 2;
    let packed = raw
        .get(..expected)
        .ok_or_else(|| CameraError::Format(format!("YUYV frame too short: {}", raw.len())))?;

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in packed.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgb.push(r.clamp(0.0, 255.0) as u8);
            rgb.push(g.clamp(0.0, 255.0) as u8);
            rgb.push(b.clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}
