//! Rolling drowsiness ratio over a fixed frame window
//!
//! Every observed frame bumps `total`; frames whose confidence exceeds the
//! per-frame threshold also bump `positive`. Each time `total` reaches a
//! multiple of the window size, the drowsy share `positive / total` is
//! compared against the alert ratio.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{DmsConfig, DmsError};

/// Counter handling after an alert fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterPolicy {
    /// Keep accumulating for the session lifetime; the ratio drifts toward
    /// the long-run average
    #[default]
    Accumulate,
    /// Zero both counters after each alert so the next window starts fresh
    ResetAfterAlert,
}

/// Snapshot of the monitor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowStats {
    /// Frames observed
    pub total: u64,
    /// Frames classified drowsy
    pub positive: u64,
}

impl WindowStats {
    /// Drowsy share, or None before the first frame
    pub fn ratio(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.positive as f64 / self.total as f64)
        }
    }
}

/// Rolling drowsiness monitor
#[derive(Debug, Clone)]
pub struct RollingMonitor {
    frame_threshold: f32,
    alert_ratio: f64,
    window_size: u64,
    policy: CounterPolicy,
    stats: WindowStats,
}

impl RollingMonitor {
    /// Create a monitor with accumulating counters
    pub fn new(frame_threshold: f32, alert_ratio: f64, window_size: u64) -> Result<Self, DmsError> {
        let config = DmsConfig {
            frame_threshold,
            alert_ratio,
            window_size,
            ..Default::default()
        };
        Self::from_config(&config)
    }

    /// Create a monitor from DMS configuration
    pub fn from_config(config: &DmsConfig) -> Result<Self, DmsError> {
        config.validate()?;
        Ok(Self {
            frame_threshold: config.frame_threshold,
            alert_ratio: config.alert_ratio,
            window_size: config.window_size,
            policy: config.counter_policy,
            stats: WindowStats::default(),
        })
    }

    /// Set the counter policy
    pub fn with_policy(mut self, policy: CounterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether a confidence counts as a drowsy frame
    pub fn is_positive(&self, confidence: Option<f32>) -> bool {
        matches!(confidence, Some(c) if c > self.frame_threshold)
    }

    /// Record one frame and return whether an alert should be raised.
    ///
    /// `None` means the classifier found nothing in the frame; it counts
    /// toward `total` but never toward `positive`.
    pub fn observe(&mut self, confidence: Option<f32>) -> bool {
        self.stats.total += 1;
        if self.is_positive(confidence) {
            self.stats.positive += 1;
        }

        if self.stats.total % self.window_size != 0 {
            return false;
        }

        let ratio = self.stats.ratio().unwrap_or(0.0);
        let alert = ratio > self.alert_ratio;
        debug!(
            "Window check at {} frames: {} drowsy (ratio {:.3}, alert {})",
            self.stats.total, self.stats.positive, ratio, alert
        );

        if alert && self.policy == CounterPolicy::ResetAfterAlert {
            info!("Resetting drowsiness counters after alert");
            self.stats = WindowStats::default();
        }
        alert
    }

    /// Current drowsy share, or None before the first frame
    pub fn ratio(&self) -> Option<f64> {
        self.stats.ratio()
    }

    /// Current counters
    pub fn stats(&self) -> WindowStats {
        self.stats
    }

    /// Frames between alert decisions
    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Zero both counters
    pub fn reset(&mut self) {
        self.stats = WindowStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn monitor() -> RollingMonitor {
        RollingMonitor::new(0.5, 0.5, 100).unwrap()
    }

    #[test]
    fn test_all_positive_alerts_on_window_boundary_only() {
        let mut m = monitor();
        for call in 1..=100 {
            let alert = m.observe(Some(0.9));
            assert_eq!(alert, call == 100, "call {}", call);
        }
    }

    #[test]
    fn test_all_at_or_below_threshold_never_alerts() {
        let mut m = monitor();
        for call in 1..=100 {
            let confidence = if call % 2 == 0 { 0.5 } else { 0.2 };
            assert!(!m.observe(Some(confidence)));
        }
        assert_eq!(m.stats().positive, 0);
    }

    #[test]
    fn test_no_detection_counts_total_only() {
        let mut m = monitor();
        for _ in 0..100 {
            assert!(!m.observe(None));
        }
        assert_eq!(m.stats(), WindowStats { total: 100, positive: 0 });
    }

    #[test]
    fn test_alert_at_100_not_at_150() {
        let mut m = monitor();
        // 60 drowsy of the first 100; 60 of 150 overall
        let mut alerts = Vec::new();
        for call in 1..=150u64 {
            let confidence = if call <= 60 { 0.9 } else { 0.1 };
            if m.observe(Some(confidence)) {
                alerts.push(call);
            }
        }
        assert_eq!(alerts, vec![100]);
        assert_eq!(m.ratio(), Some(60.0 / 150.0));
    }

    #[test]
    fn test_sixty_forty_scenario() {
        let mut m = monitor();
        for _ in 0..60 {
            assert!(!m.observe(Some(0.9)));
        }
        for _ in 0..39 {
            assert!(!m.observe(Some(0.1)));
        }
        assert!(m.observe(Some(0.1)));
        assert_eq!(m.stats(), WindowStats { total: 100, positive: 60 });
        assert_eq!(m.ratio(), Some(0.6));
    }

    #[test]
    fn test_zero_observations_have_no_ratio() {
        let m = monitor();
        assert_eq!(m.ratio(), None);
        assert_eq!(WindowStats::default().ratio(), None);
    }

    #[test]
    fn test_accumulate_keeps_counters_after_alert() {
        let mut m = monitor();
        let mut alerts = 0;
        for _ in 0..200 {
            if m.observe(Some(0.9)) {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 2);
        assert_eq!(m.stats(), WindowStats { total: 200, positive: 200 });

        // 200 of 300 still drowsy
        for _ in 0..100 {
            m.observe(Some(0.1));
        }
        assert_eq!(m.stats(), WindowStats { total: 300, positive: 200 });
    }

    #[test]
    fn test_reset_after_alert_policy() {
        let mut m = monitor().with_policy(CounterPolicy::ResetAfterAlert);
        for _ in 0..99 {
            m.observe(Some(0.9));
        }
        assert!(m.observe(Some(0.9)));
        assert_eq!(m.stats(), WindowStats::default());

        for _ in 0..100 {
            m.observe(Some(0.1));
        }
        assert_eq!(m.stats(), WindowStats { total: 100, positive: 0 });
    }

    #[test]
    fn test_independent_thresholds() {
        // Low frame cutoff, high alert cutoff
        let mut m = RollingMonitor::new(0.2, 0.9, 10).unwrap();
        let mut alert = false;
        for _ in 0..10 {
            alert = m.observe(Some(0.3));
        }
        assert_eq!(m.stats().positive, 10);
        assert!(alert);

        let mut m = RollingMonitor::new(0.2, 0.9, 10).unwrap();
        for call in 0..10 {
            alert = m.observe(if call == 0 { None } else { Some(0.3) });
        }
        assert!(!alert, "9/10 is not above 0.9");
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(RollingMonitor::new(0.5, 0.5, 0).is_err());
        assert!(RollingMonitor::new(2.0, 0.5, 100).is_err());
        assert!(RollingMonitor::new(0.5, 1.1, 100).is_err());
    }

    proptest! {
        #[test]
        fn prop_positive_never_exceeds_total(
            observations in proptest::collection::vec(proptest::option::of(0.0f32..=1.0), 0..400)
        ) {
            let mut m = monitor();
            for confidence in observations {
                m.observe(confidence);
                let stats = m.stats();
                prop_assert!(stats.positive <= stats.total);
            }
        }

        #[test]
        fn prop_alerts_only_on_window_multiples(
            observations in proptest::collection::vec(proptest::option::of(0.0f32..=1.0), 1..400)
        ) {
            let mut m = RollingMonitor::new(0.5, 0.5, 25).unwrap();
            for confidence in observations {
                if m.observe(confidence) {
                    let stats = m.stats();
                    prop_assert_eq!(stats.total % 25, 0);
                    prop_assert!(stats.positive as f64 / stats.total as f64 > 0.5);
                }
            }
        }
    }
}
