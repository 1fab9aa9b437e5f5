//! FFmpeg-backed video file decoding.

use ffmpeg_next as ffmpeg;
use tracing::{debug, info};

use crate::{CameraError, VideoFrame};

pub(crate) struct FfmpegFile {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
}

fn decode_err(context: &str, err: ffmpeg::Error) -> CameraError {
    CameraError::Decode(format!("{}: {}", context, err))
}

impl FfmpegFile {
    pub(crate) fn open(path: &str) -> Result<Self, CameraError> {
        ffmpeg::init().map_err(|e| decode_err("initialize ffmpeg", e))?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| CameraError::File(format!("{}: {}", path, e)))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| CameraError::File(format!("{}: file has no video track", path)))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| decode_err("load video decoder parameters", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| decode_err("open video decoder", e))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| decode_err("create RGB scaler", e))?;

        info!(
            "Video file {} opened ({}x{})",
            path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                debug!("Video file {} drained after {} frames", self.path, self.frame_count);
                return Ok(None);
            }

            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| decode_err("send packet to decoder", e))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| decode_err("flush decoder", e))?;
                    self.eof_sent = true;
                }
            }
        }
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<VideoFrame, CameraError> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|e| decode_err("scale frame to RGB", e))?;

        let width = rgb_frame.width();
        let height = rgb_frame.height();
        let row_bytes = width as usize * 3;
        let stride = rgb_frame.stride(0);
        let data = rgb_frame.data(0);

        let pixels = if stride == row_bytes {
            data.get(..row_bytes * height as usize)
                .ok_or_else(|| CameraError::Decode("frame buffer too small".into()))?
                .to_vec()
        } else {
            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                let slice = data
                    .get(start..start + row_bytes)
                    .ok_or_else(|| CameraError::Decode("frame row is out of bounds".into()))?;
                pixels.extend_from_slice(slice);
            }
            pixels
        };

        let sequence = self.frame_count as u32;
        self.frame_count += 1;
        VideoFrame::from_rgb(pixels, width, height, crate::now_ns(), sequence)
    }
}
