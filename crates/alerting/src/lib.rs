//! Alerting System
//!
//! Builds the user-facing drowsiness alert and delivers it through
//! pluggable sinks (log, or a channel to an interface task).

mod notifier;

pub use notifier::{
    AlertSink, AlertSource, ChannelSink, DrowsinessAlert, LogSink, ALERT_MESSAGE, ALERT_TITLE,
};

use thiserror::Error;

/// Errors delivering alerts
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert channel closed")]
    ChannelClosed,
}
