//! Live capture and video-file monitoring sessions
//!
//! Both sessions push frames through the shared classifier into their own
//! `RollingMonitor`. Work happens one frame at a time so the hosting loop
//! stays in control between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alerting::{AlertSink, AlertSource, DrowsinessAlert};
use camera_capture::{FrameSource, VideoFrame};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detector::{build_classifier, FrameClassifier};
use crate::monitor::{RollingMonitor, WindowStats};
use crate::{DmsConfig, DmsError};

/// Process-wide state handed to every session: configuration, the detector
/// (loaded once) and the alert sink.
pub struct AppContext {
    config: DmsConfig,
    classifier: Box<dyn FrameClassifier>,
    alerts: Box<dyn AlertSink>,
}

impl AppContext {
    pub fn new(
        config: DmsConfig,
        classifier: Box<dyn FrameClassifier>,
        alerts: Box<dyn AlertSink>,
    ) -> Result<Self, DmsError> {
        config.validate()?;
        info!(
            "Monitoring with {} classifier (frame threshold {}, alert ratio {}, window {})",
            classifier.name(),
            config.frame_threshold,
            config.alert_ratio,
            config.window_size
        );
        Ok(Self {
            config,
            classifier,
            alerts,
        })
    }

    /// Build the context with the classifier the configuration names
    pub fn from_config(config: DmsConfig, alerts: Box<dyn AlertSink>) -> Result<Self, DmsError> {
        let classifier = build_classifier(&config)?;
        Self::new(config, classifier, alerts)
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    /// Fresh monitor for a new session
    fn new_monitor(&self) -> Result<RollingMonitor, DmsError> {
        RollingMonitor::from_config(&self.config)
    }

    /// Classify one frame, update the monitor and deliver any alert
    fn process(
        &mut self,
        frame: &VideoFrame,
        monitor: &mut RollingMonitor,
        source: AlertSource,
    ) -> Result<FrameReport, DmsError> {
        let detections = self.classifier.classify(frame)?;
        let confidence = detections.top_confidence();
        let positive = monitor.is_positive(confidence);
        let before = monitor.stats();
        let alert = monitor.observe(confidence);

        if alert {
            // Counters may have been reset by the policy; report the window
            // that triggered the alert.
            let positive_count = before.positive + positive as u64;
            let notification = DrowsinessAlert::new(source, positive_count, before.total + 1);
            if let Err(e) = self.alerts.notify(&notification) {
                warn!("Failed to deliver drowsiness alert: {}", e);
            }
        }

        Ok(FrameReport {
            sequence: frame.sequence,
            confidence,
            positive,
            alert,
            stats: monitor.stats(),
        })
    }
}

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub sequence: u32,
    /// Top detection confidence, None when nothing was detected
    pub confidence: Option<f32>,
    /// Whether the frame counted as drowsy
    pub positive: bool,
    /// Whether this frame raised an alert
    pub alert: bool,
    /// Counters after this frame
    pub stats: WindowStats,
}

/// Result of one live timer tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The camera produced no frame; nothing was counted
    Skipped,
    Processed(FrameReport),
}

/// Live camera session driven by a periodic timer
pub struct LiveSession<S: FrameSource> {
    source: S,
    monitor: RollingMonitor,
    preview: Option<VideoFrame>,
    skipped: u64,
}

impl<S: FrameSource> LiveSession<S> {
    pub fn new(ctx: &AppContext, source: S) -> Result<Self, DmsError> {
        info!("Live session started on {}", source.name());
        Ok(Self {
            monitor: ctx.new_monitor()?,
            source,
            preview: None,
            skipped: 0,
        })
    }

    /// Read, preview and classify a single frame
    pub fn tick(&mut self, ctx: &mut AppContext) -> Result<TickOutcome, DmsError> {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.skipped += 1;
                debug!("No frame from {}", self.source.name());
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => {
                self.skipped += 1;
                debug!("Capture failed on {}: {}", self.source.name(), e);
                return Ok(TickOutcome::Skipped);
            }
        };

        self.preview = Some(frame.mirrored());
        let report = ctx.process(&frame, &mut self.monitor, AlertSource::Live)?;
        Ok(TickOutcome::Processed(report))
    }

    /// Latest frame, mirrored for display
    pub fn preview(&self) -> Option<&VideoFrame> {
        self.preview.as_ref()
    }

    pub fn stats(&self) -> WindowStats {
        self.monitor.stats()
    }

    /// Ticks that produced no frame
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }
}

/// Shared flag that stops a scan before its next frame
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of a finished or cancelled video scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Frames classified
    pub frames: u64,
    /// Frames counted drowsy
    pub positive: u64,
    /// Alerts raised during the scan
    pub alerts: u32,
    /// Drowsy share over the whole scan; None for a video with no frames
    pub final_ratio: Option<f64>,
    /// Whether the whole-video share exceeded the alert ratio. Never set for
    /// an empty or cancelled scan.
    pub final_alert: bool,
    pub cancelled: bool,
    /// Read failure that ended the scan early
    pub read_error: Option<String>,
}

/// Result of one scan step
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStep {
    Frame(FrameReport),
    Finished(ScanSummary),
    Cancelled(ScanSummary),
}

/// Single pass over a video file, one frame per `step`
pub struct VideoScan<S: FrameSource> {
    source: S,
    monitor: RollingMonitor,
    cancel: CancelToken,
    alerts: u32,
    frames: u64,
    positive: u64,
    done: Option<ScanStep>,
}

impl<S: FrameSource> VideoScan<S> {
    pub fn new(ctx: &AppContext, source: S) -> Result<Self, DmsError> {
        info!("Video scan started on {}", source.name());
        Ok(Self {
            monitor: ctx.new_monitor()?,
            source,
            cancel: CancelToken::new(),
            alerts: 0,
            frames: 0,
            positive: 0,
            done: None,
        })
    }

    /// Token that cancels this scan
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.is_some()
    }

    /// Process the next frame, or report how the scan ended
    pub fn step(&mut self, ctx: &mut AppContext) -> Result<ScanStep, DmsError> {
        if let Some(done) = &self.done {
            return Ok(done.clone());
        }

        if self.cancel.is_cancelled() {
            info!("Video scan of {} cancelled after {} frames", self.source.name(), self.frames);
            return Ok(self.finish(ctx, true, None));
        }

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(self.finish(ctx, false, None)),
            Err(e) => {
                warn!("Reading {} failed: {}", self.source.name(), e);
                return Ok(self.finish(ctx, false, Some(e.to_string())));
            }
        };

        let report = ctx.process(&frame, &mut self.monitor, AlertSource::Video)?;
        self.frames += 1;
        if report.positive {
            self.positive += 1;
        }
        if report.alert {
            self.alerts += 1;
        }
        Ok(ScanStep::Frame(report))
    }

    fn finish(
        &mut self,
        ctx: &mut AppContext,
        cancelled: bool,
        read_error: Option<String>,
    ) -> ScanStep {
        // Totals are kept apart from the monitor so a reset-after-alert
        // policy does not shrink the summary.
        let final_ratio = WindowStats {
            total: self.frames,
            positive: self.positive,
        }
        .ratio();
        let final_alert =
            !cancelled && final_ratio.is_some_and(|ratio| ratio > ctx.config.alert_ratio);

        if final_alert {
            let notification = DrowsinessAlert::new(AlertSource::Video, self.positive, self.frames);
            if let Err(e) = ctx.alerts.notify(&notification) {
                warn!("Failed to deliver drowsiness alert: {}", e);
            }
        }

        let summary = ScanSummary {
            frames: self.frames,
            positive: self.positive,
            alerts: self.alerts,
            final_ratio,
            final_alert,
            cancelled,
            read_error,
        };
        info!(
            "Video scan of {} ended: {} frames, {} drowsy, {} alerts, final alert {}",
            self.source.name(),
            summary.frames,
            summary.positive,
            summary.alerts,
            summary.final_alert
        );

        let step = if cancelled {
            ScanStep::Cancelled(summary)
        } else {
            ScanStep::Finished(summary)
        };
        self.done = Some(step.clone());
        step
    }
}

/// Step a scan to completion, yielding to the runtime after every frame
pub async fn run_scan<S: FrameSource>(
    ctx: &mut AppContext,
    scan: &mut VideoScan<S>,
) -> Result<ScanSummary, DmsError> {
    loop {
        match scan.step(ctx)? {
            ScanStep::Frame(_) => tokio::task::yield_now().await,
            ScanStep::Finished(summary) | ScanStep::Cancelled(summary) => return Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ScriptedClassifier;
    use crate::monitor::CounterPolicy;
    use alerting::{AlertError, ChannelSink};
    use camera_capture::CameraError;
    use std::collections::VecDeque;

    /// Frame source fed from a script of reads
    struct ScriptedSource {
        reads: VecDeque<Result<Option<VideoFrame>, CameraError>>,
        captured: u64,
    }

    impl ScriptedSource {
        fn frames(n: usize) -> Self {
            Self::reads((0..n).map(|i| Ok(Some(frame(i as u32)))))
        }

        fn reads(reads: impl IntoIterator<Item = Result<Option<VideoFrame>, CameraError>>) -> Self {
            Self {
                reads: reads.into_iter().collect(),
                captured: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
            let read = self.reads.pop_front().unwrap_or(Ok(None));
            if let Ok(Some(_)) = &read {
                self.captured += 1;
            }
            read
        }

        fn frames_captured(&self) -> u64 {
            self.captured
        }
    }

    fn frame(sequence: u32) -> VideoFrame {
        VideoFrame::new(vec![10, 20, 30, 40, 50, 60], 2, 1, 0, sequence)
    }

    fn context(
        script: Vec<Option<f32>>,
        config: DmsConfig,
    ) -> (AppContext, tokio::sync::mpsc::UnboundedReceiver<DrowsinessAlert>) {
        let (sink, rx) = ChannelSink::new();
        let ctx = AppContext::new(
            config,
            Box::new(ScriptedClassifier::new(script)),
            Box::new(sink),
        )
        .unwrap();
        (ctx, rx)
    }

    fn sixty_forty() -> Vec<Option<f32>> {
        std::iter::repeat(Some(0.9))
            .take(60)
            .chain(std::iter::repeat(Some(0.1)).take(40))
            .collect()
    }

    #[test]
    fn test_live_session_alerts_on_hundredth_frame() {
        let (mut ctx, mut rx) = context(sixty_forty(), DmsConfig::default());
        let mut session = LiveSession::new(&ctx, ScriptedSource::frames(100)).unwrap();

        for i in 1..=100 {
            match session.tick(&mut ctx).unwrap() {
                TickOutcome::Processed(report) => assert_eq!(report.alert, i == 100),
                TickOutcome::Skipped => panic!("unexpected skip"),
            }
        }

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.positive, 60);
        assert_eq!(alert.total, 100);
        assert_eq!(alert.message, "Drowsiness detected!");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_live_capture_failures_are_skipped() {
        let (mut ctx, _rx) = context(vec![Some(0.9), Some(0.9)], DmsConfig::default());
        let source = ScriptedSource::reads(vec![
            Ok(Some(frame(0))),
            Err(CameraError::Timeout),
            Ok(None),
            Ok(Some(frame(1))),
        ]);
        let mut session = LiveSession::new(&ctx, source).unwrap();

        assert!(matches!(session.tick(&mut ctx).unwrap(), TickOutcome::Processed(_)));
        assert_eq!(session.tick(&mut ctx).unwrap(), TickOutcome::Skipped);
        assert_eq!(session.tick(&mut ctx).unwrap(), TickOutcome::Skipped);
        assert!(matches!(session.tick(&mut ctx).unwrap(), TickOutcome::Processed(_)));

        assert_eq!(session.stats(), WindowStats { total: 2, positive: 2 });
        assert_eq!(session.skipped_frames(), 2);
    }

    #[test]
    fn test_live_preview_is_mirrored() {
        let (mut ctx, _rx) = context(vec![None], DmsConfig::default());
        let mut session = LiveSession::new(&ctx, ScriptedSource::frames(1)).unwrap();
        assert!(session.preview().is_none());

        session.tick(&mut ctx).unwrap();
        let preview = session.preview().unwrap();
        assert_eq!(preview.get_pixel(0, 0), Some([40, 50, 60]));
    }

    #[test]
    fn test_no_detection_frames_never_alert() {
        let (mut ctx, mut rx) = context(vec![None; 100], DmsConfig::default());
        let mut session = LiveSession::new(&ctx, ScriptedSource::frames(100)).unwrap();
        for _ in 0..100 {
            if let TickOutcome::Processed(report) = session.tick(&mut ctx).unwrap() {
                assert!(!report.alert);
                assert_eq!(report.confidence, None);
            }
        }
        assert_eq!(session.stats().total, 100);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_video_scan_steps_to_finish() {
        let mut script = sixty_forty();
        script.extend(std::iter::repeat(Some(0.1)).take(50));
        let (mut ctx, mut rx) = context(script, DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(150)).unwrap();

        let mut alert_frames = Vec::new();
        let summary = loop {
            match scan.step(&mut ctx).unwrap() {
                ScanStep::Frame(report) => {
                    if report.alert {
                        alert_frames.push(report.stats.total);
                    }
                }
                ScanStep::Finished(summary) => break summary,
                ScanStep::Cancelled(_) => panic!("not cancelled"),
            }
        };

        assert_eq!(alert_frames, vec![100]);
        assert_eq!(summary.frames, 150);
        assert_eq!(summary.positive, 60);
        assert_eq!(summary.alerts, 1);
        assert_eq!(summary.final_ratio, Some(0.4));
        assert!(!summary.final_alert);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        // Terminal result repeats
        assert_eq!(scan.step(&mut ctx).unwrap(), ScanStep::Finished(summary));
        assert!(scan.is_done());
    }

    #[test]
    fn test_zero_frame_video_has_no_ratio() {
        let (mut ctx, mut rx) = context(Vec::new(), DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(0)).unwrap();

        match scan.step(&mut ctx).unwrap() {
            ScanStep::Finished(summary) => {
                assert_eq!(summary.frames, 0);
                assert_eq!(summary.final_ratio, None);
                assert_eq!(summary.alerts, 0);
                assert!(!summary.final_alert);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_short_drowsy_video_alerts_at_end_of_stream() {
        let (mut ctx, mut rx) = context(vec![Some(0.9); 60], DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(60)).unwrap();

        let summary = loop {
            match scan.step(&mut ctx).unwrap() {
                ScanStep::Frame(report) => assert!(!report.alert),
                ScanStep::Finished(summary) => break summary,
                ScanStep::Cancelled(_) => panic!("not cancelled"),
            }
        };

        assert_eq!(summary.alerts, 0);
        assert_eq!(summary.final_ratio, Some(1.0));
        assert!(summary.final_alert);
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.source, AlertSource::Video);
        assert_eq!((alert.positive, alert.total), (60, 60));

        // Repeating the terminal step does not alert again
        assert!(matches!(scan.step(&mut ctx).unwrap(), ScanStep::Finished(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancelled_scan_skips_end_of_stream_decision() {
        let (mut ctx, mut rx) = context(vec![Some(0.9); 10], DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(10)).unwrap();
        scan.step(&mut ctx).unwrap();
        scan.cancel_token().cancel();

        match scan.step(&mut ctx).unwrap() {
            ScanStep::Cancelled(summary) => {
                assert_eq!(summary.final_ratio, Some(1.0));
                assert!(!summary.final_alert);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_video_read_error_ends_scan() {
        let (mut ctx, _rx) = context(vec![Some(0.9)], DmsConfig::default());
        let source = ScriptedSource::reads(vec![
            Ok(Some(frame(0))),
            Err(CameraError::Decode("corrupt packet".into())),
            Ok(Some(frame(1))),
        ]);
        let mut scan = VideoScan::new(&ctx, source).unwrap();

        assert!(matches!(scan.step(&mut ctx).unwrap(), ScanStep::Frame(_)));
        match scan.step(&mut ctx).unwrap() {
            ScanStep::Finished(summary) => {
                assert_eq!(summary.frames, 1);
                assert!(summary.read_error.unwrap().contains("corrupt packet"));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_cancel_stops_before_next_frame() {
        let (mut ctx, _rx) = context(vec![Some(0.9); 10], DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(10)).unwrap();
        let token = scan.cancel_token();

        assert!(matches!(scan.step(&mut ctx).unwrap(), ScanStep::Frame(_)));
        token.cancel();
        match scan.step(&mut ctx).unwrap() {
            ScanStep::Cancelled(summary) => {
                assert!(summary.cancelled);
                assert_eq!(summary.frames, 1);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_reset_policy_reports_triggering_window() {
        let config = DmsConfig {
            window_size: 10,
            counter_policy: CounterPolicy::ResetAfterAlert,
            ..Default::default()
        };
        let (mut ctx, mut rx) = context(vec![Some(0.9); 20], config);
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(20)).unwrap();

        let summary = loop {
            if let ScanStep::Finished(summary) = scan.step(&mut ctx).unwrap() {
                break summary;
            }
        };

        assert_eq!(summary.alerts, 2);
        assert_eq!(summary.frames, 20);
        let first = rx.try_recv().unwrap();
        assert_eq!((first.positive, first.total), (10, 10));
        let second = rx.try_recv().unwrap();
        assert_eq!((second.positive, second.total), (10, 10));
    }

    #[test]
    fn test_alert_delivery_failure_does_not_fail_frame() {
        struct ClosedSink;
        impl AlertSink for ClosedSink {
            fn notify(&mut self, _alert: &DrowsinessAlert) -> Result<(), AlertError> {
                Err(AlertError::ChannelClosed)
            }
        }

        let config = DmsConfig {
            window_size: 1,
            ..Default::default()
        };
        let mut ctx = AppContext::new(
            config,
            Box::new(ScriptedClassifier::new([Some(0.9)])),
            Box::new(ClosedSink),
        )
        .unwrap();
        let mut session = LiveSession::new(&ctx, ScriptedSource::frames(1)).unwrap();
        match session.tick(&mut ctx).unwrap() {
            TickOutcome::Processed(report) => assert!(report.alert),
            TickOutcome::Skipped => panic!("unexpected skip"),
        }
    }

    #[tokio::test]
    async fn test_run_scan_drives_to_completion() {
        let (mut ctx, _rx) = context(vec![Some(0.9); 5], DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(5)).unwrap();

        let summary = run_scan(&mut ctx, &mut scan).await.unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.final_ratio, Some(1.0));
        assert!(summary.final_alert);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_run_scan_honours_cancel_from_another_task() {
        let (mut ctx, _rx) = context(Vec::new(), DmsConfig::default());
        let mut scan = VideoScan::new(&ctx, ScriptedSource::frames(10_000)).unwrap();
        let token = scan.cancel_token();

        let canceller = tokio::spawn(async move {
            tokio::task::yield_now().await;
            token.cancel();
        });

        let summary = run_scan(&mut ctx, &mut scan).await.unwrap();
        canceller.await.unwrap();
        assert!(summary.cancelled);
        assert!(summary.frames < 10_000);
    }
}
