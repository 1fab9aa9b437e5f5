//! DMS configuration

use serde::{Deserialize, Serialize};

use crate::monitor::CounterPolicy;
use crate::DmsError;

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Per-frame cutoff: a frame is drowsy when its confidence exceeds this
    pub frame_threshold: f32,

    /// Window-level cutoff: alert when drowsy frames / total frames exceeds this.
    /// Shares its default with `frame_threshold` only by coincidence.
    pub alert_ratio: f64,

    /// Frames between alert decisions
    pub window_size: u64,

    /// What happens to the counters after an alert
    pub counter_policy: CounterPolicy,

    /// ONNX weights for the drowsiness detector (mock detector when unset)
    pub model_path: Option<String>,

    /// Detections below this confidence are discarded by the detector
    pub model_confidence: f32,

    /// IoU above which overlapping detections of one class are suppressed
    pub iou_threshold: f32,

    /// Square model input size in pixels
    pub input_size: u32,

    /// Maximum detections kept per frame
    pub max_detections: usize,

    /// Only count detections of this class index (any class when unset)
    pub drowsy_class: Option<usize>,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            frame_threshold: 0.5,
            alert_ratio: 0.5,
            window_size: 100,
            counter_policy: CounterPolicy::Accumulate,
            model_path: None,
            model_confidence: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            max_detections: 1000,
            drowsy_class: None,
        }
    }
}

impl DmsConfig {
    /// Check ranges before a monitor or detector is built from this config
    pub fn validate(&self) -> Result<(), DmsError> {
        if !(0.0..=1.0).contains(&self.frame_threshold) {
            return Err(DmsError::Config(format!(
                "frame_threshold must be in [0, 1], got {}",
                self.frame_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.alert_ratio) {
            return Err(DmsError::Config(format!(
                "alert_ratio must be in [0, 1], got {}",
                self.alert_ratio
            )));
        }
        if self.window_size == 0 {
            return Err(DmsError::Config("window_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.model_confidence) || !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(DmsError::Config(
                "model_confidence and iou_threshold must be in [0, 1]".into(),
            ));
        }
        if self.input_size == 0 {
            return Err(DmsError::Config("input_size must be positive".into()));
        }
        Ok(())
    }
}
