//! Driver Monitoring System (DMS)
//!
//! Drowsiness monitoring over camera or video-file frames:
//! - Per-frame drowsiness detection (ONNX model, or a mock without weights)
//! - Rolling drowsy-frame ratio checked every window of frames
//! - Live capture sessions and cancellable video-file scans

pub mod config;
pub mod detector;
pub mod monitor;
pub mod session;

pub use config::DmsConfig;
pub use detector::{
    build_classifier, Detection, Detections, FrameClassifier, MockDetector, OnnxDetector,
    ScriptedClassifier,
};
pub use monitor::{CounterPolicy, RollingMonitor, WindowStats};
pub use session::{
    run_scan, AppContext, CancelToken, FrameReport, LiveSession, ScanStep, ScanSummary,
    TickOutcome, VideoScan,
};

use camera_capture::CameraError;
use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Frame source error: {0}")]
    Capture(#[from] CameraError),
}
