//! Drowsiness detection models

use camera_capture::frame::VideoFrame;
use image::{imageops, Rgb, RgbImage};
use ndarray::{Array4, ArrayView2, Axis, Ix2};
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::{DmsConfig, DmsError};

/// Letterbox padding value used by YOLO-style exports
const PAD_VALUE: u8 = 114;

/// One detected region, in source-frame pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Class index in the model's label list
    pub class: usize,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Detections for one frame, ranked by descending confidence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections(Vec<Detection>);

impl Detections {
    /// Rank an unordered list of detections
    pub fn ranked(mut detections: Vec<Detection>) -> Self {
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Self(detections)
    }

    /// No detections
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Highest-confidence detection
    pub fn top(&self) -> Option<&Detection> {
        self.0.first()
    }

    /// Confidence of the top detection, or None when nothing was found
    pub fn top_confidence(&self) -> Option<f32> {
        self.top().map(|d| d.confidence)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.0.iter()
    }
}

/// Per-frame classifier consumed by the monitoring sessions
pub trait FrameClassifier {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Run detection on a frame
    fn classify(&mut self, frame: &VideoFrame) -> Result<Detections, DmsError>;
}

/// Build the configured classifier: ONNX weights when a model path is set,
/// the mock detector otherwise.
pub fn build_classifier(config: &DmsConfig) -> Result<Box<dyn FrameClassifier>, DmsError> {
    match &config.model_path {
        Some(_) => Ok(Box::new(OnnxDetector::new(config)?)),
        None => {
            warn!("No drowsiness model path configured. Using mock detector.");
            Ok(Box::new(MockDetector))
        }
    }
}

/// Scale and padding applied when fitting a frame into the model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: f32,
    height: f32,
}

impl Letterbox {
    pub(crate) fn fit(width: u32, height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input_size as f32 - new_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - new_h) / 2.0).floor(),
            width: width as f32,
            height: height as f32,
        }
    }

    fn resized_size(&self) -> (u32, u32) {
        (
            (self.width * self.scale).round() as u32,
            (self.height * self.scale).round() as u32,
        )
    }

    fn unmap_x(&self, x: f32) -> f32 {
        ((x - self.pad_x) / self.scale).clamp(0.0, self.width)
    }

    fn unmap_y(&self, y: f32) -> f32 {
        ((y - self.pad_y) / self.scale).clamp(0.0, self.height)
    }
}

/// Postprocessing parameters for raw model rows
#[derive(Debug, Clone)]
pub(crate) struct DecodeParams {
    pub(crate) min_confidence: f32,
    pub(crate) iou_threshold: f32,
    pub(crate) max_detections: usize,
    pub(crate) class_filter: Option<usize>,
}

impl From<&DmsConfig> for DecodeParams {
    fn from(config: &DmsConfig) -> Self {
        Self {
            min_confidence: config.model_confidence,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
            class_filter: config.drowsy_class,
        }
    }
}

/// Decode `[rows, 5 + classes]` predictions (cx, cy, w, h, objectness,
/// class scores...) into ranked, non-overlapping detections.
pub(crate) fn decode_predictions(
    rows: ArrayView2<f32>,
    params: &DecodeParams,
    letterbox: &Letterbox,
) -> Result<Detections, DmsError> {
    if rows.ncols() < 6 {
        return Err(DmsError::Inference(format!(
            "expected at least 6 values per prediction, got {}",
            rows.ncols()
        )));
    }

    let mut candidates = Vec::new();
    for row in rows.outer_iter() {
        let objectness = row[4];
        if objectness < params.min_confidence {
            continue;
        }

        let Some((class, class_score)) = row
            .iter()
            .skip(5)
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };

        let confidence = objectness * class_score;
        if confidence < params.min_confidence {
            continue;
        }
        if params.class_filter.is_some_and(|wanted| wanted != class) {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        candidates.push(Detection {
            x1: letterbox.unmap_x(cx - w / 2.0),
            y1: letterbox.unmap_y(cy - h / 2.0),
            x2: letterbox.unmap_x(cx + w / 2.0),
            y2: letterbox.unmap_y(cy + h / 2.0),
            confidence,
            class,
        });
    }

    let ranked = Detections::ranked(candidates);
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in ranked.0 {
        if kept.len() >= params.max_detections {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.class == candidate.class && k.iou(&candidate) > params.iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }

    Ok(Detections(kept))
}

/// YOLO-style ONNX detector loaded once from a weights file
pub struct OnnxDetector {
    session: Session,
    input_size: u32,
    params: DecodeParams,
}

impl OnnxDetector {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        config.validate()?;
        let path = config
            .model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("model_path is not set".into()))?;
        if !Path::new(path).is_file() {
            return Err(DmsError::ModelLoad(format!("{}: no such model file", path)));
        }

        info!("Loading drowsiness model from {}", path);
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| {
                error!("Failed to load drowsiness model: {}", e);
                DmsError::ModelLoad(e.to_string())
            })?;

        Ok(Self {
            session,
            input_size: config.input_size,
            params: DecodeParams::from(config),
        })
    }

    /// Letterbox the frame into a normalised 1x3xSxS tensor
    fn preprocess(&self, frame: &VideoFrame) -> Result<(Array4<f32>, Letterbox), DmsError> {
        let img = frame
            .to_rgb_image()
            .ok_or_else(|| DmsError::ImageProcessing("Failed to create image buffer".into()))?;

        let size = self.input_size;
        let letterbox = Letterbox::fit(frame.width, frame.height, size);
        let (new_w, new_h) = letterbox.resized_size();
        let resized = imageops::resize(&img, new_w.max(1), new_h.max(1), imageops::FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::overlay(&mut canvas, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }
        Ok((input, letterbox))
    }
}

impl FrameClassifier for OnnxDetector {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn classify(&mut self, frame: &VideoFrame) -> Result<Detections, DmsError> {
        if frame.is_empty() {
            return Ok(Detections::empty());
        }
        let (input, letterbox) = self.preprocess(frame)?;

        let inference = |e: ort::Error| DmsError::Inference(e.to_string());
        let outputs = self
            .session
            .run(ort::inputs![input.view()].map_err(inference)?)
            .map_err(inference)?;
        let output = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;

        let rows = output
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| DmsError::Inference(format!("unexpected output shape: {}", e)))?;

        let detections = decode_predictions(rows, &self.params, &letterbox)?;
        debug!(
            "Frame {}: {} detections, top {:?}",
            frame.sequence,
            detections.len(),
            detections.top_confidence()
        );
        Ok(detections)
    }
}

/// Stand-in detector when no weights are configured.
///
/// Reports a single full-frame detection whose confidence is the frame's
/// mean luminance.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockDetector;

impl FrameClassifier for MockDetector {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn classify(&mut self, frame: &VideoFrame) -> Result<Detections, DmsError> {
        let Some(confidence) = frame.mean_luminance() else {
            return Ok(Detections::empty());
        };
        Ok(Detections(vec![Detection {
            x1: 0.0,
            y1: 0.0,
            x2: frame.width as f32,
            y2: frame.height as f32,
            confidence,
            class: 0,
        }]))
    }
}

/// Replays a fixed sequence of top confidences, then reports no detection
#[derive(Debug, Default, Clone)]
pub struct ScriptedClassifier {
    script: VecDeque<Option<f32>>,
}

impl ScriptedClassifier {
    pub fn new(script: impl IntoIterator<Item = Option<f32>>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }
}

impl FrameClassifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn classify(&mut self, frame: &VideoFrame) -> Result<Detections, DmsError> {
        match self.script.pop_front().flatten() {
            Some(confidence) => Ok(Detections(vec![Detection {
                x1: 0.0,
                y1: 0.0,
                x2: frame.width as f32,
                y2: frame.height as f32,
                confidence,
                class: 0,
            }])),
            None => Ok(Detections::empty()),
        }
    }
}
