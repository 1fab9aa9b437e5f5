//! Alert notification and delivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::AlertError;

/// Dialog title shown with every drowsiness alert
pub const ALERT_TITLE: &str = "Warning";
/// Fixed alert text
pub const ALERT_MESSAGE: &str = "Drowsiness detected!";

/// Where the monitored frames came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    /// Live camera capture
    Live,
    /// Uploaded video file
    Video,
}

/// A raised drowsiness alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrowsinessAlert {
    pub title: String,
    pub message: String,
    pub source: AlertSource,
    /// Drowsy frames in the window
    pub positive: u64,
    /// Frames in the window
    pub total: u64,
    /// positive / total at the decision point
    pub ratio: f64,
    pub raised_at: DateTime<Utc>,
}

impl DrowsinessAlert {
    /// Build the alert for a window decision
    pub fn new(source: AlertSource, positive: u64, total: u64) -> Self {
        let ratio = if total == 0 {
            0.0
        } else {
            positive as f64 / total as f64
        };
        Self {
            title: ALERT_TITLE.to_string(),
            message: ALERT_MESSAGE.to_string(),
            source,
            positive,
            total,
            ratio,
            raised_at: Utc::now(),
        }
    }
}

/// Delivery target for alerts
pub trait AlertSink {
    /// Deliver one alert to the user
    fn notify(&mut self, alert: &DrowsinessAlert) -> Result<(), AlertError>;
}

/// Writes alerts to the log at WARN level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&mut self, alert: &DrowsinessAlert) -> Result<(), AlertError> {
        warn!(
            source = ?alert.source,
            positive = alert.positive,
            total = alert.total,
            ratio = alert.ratio,
            "{}: {}",
            alert.title,
            alert.message
        );
        Ok(())
    }
}

/// Forwards alerts to an interface task over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DrowsinessAlert>,
}

impl ChannelSink {
    /// Create a sink and the receiver the interface listens on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DrowsinessAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn notify(&mut self, alert: &DrowsinessAlert) -> Result<(), AlertError> {
        self.tx
            .send(alert.clone())
            .map_err(|_| AlertError::ChannelClosed)
    }
}
