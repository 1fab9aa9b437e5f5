//! Drowsiness Watch host
//!
//! Wires configuration, logging, the frame sources and the monitoring
//! sessions together. Runs either a live camera session on a fixed timer or
//! a single cancellable pass over a video file.

pub mod settings;

use std::future::Future;
use std::time::Duration;

use alerting::{AlertSink, LogSink};
use anyhow::Context;
use camera_capture::{CameraSource, FrameSource, VideoFileSource};
use dms::{run_scan, AppContext, LiveSession, ScanSummary, TickOutcome, VideoScan};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub use settings::{AppConfig, LoggingConfig, Mode};

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("failed to set tracing subscriber")
}

/// Totals for a finished live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveReport {
    /// Frames classified
    pub processed: u64,
    /// Ticks where the camera gave no frame
    pub skipped: u64,
    /// Alerts raised
    pub alerts: u64,
    /// Ticks whose inference failed
    pub failed: u64,
}

/// Run the configured mode until it finishes or Ctrl-C
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    run_with_sink(config, Box::new(LogSink)).await
}

/// Run the configured mode, delivering alerts to `alerts`
pub async fn run_with_sink(config: AppConfig, alerts: Box<dyn AlertSink>) -> anyhow::Result<()> {
    let mut ctx = AppContext::from_config(config.dms.clone(), alerts)
        .context("failed to load drowsiness detector")?;

    match config.mode {
        Mode::Live => {
            let camera = CameraSource::open(config.camera.clone())
                .with_context(|| format!("failed to open camera {}", config.camera.device))?;
            let mut session = LiveSession::new(&ctx, camera)?;
            let report = drive_live(
                &mut ctx,
                &mut session,
                Duration::from_millis(config.tick_interval_ms),
                config.live_frame_limit,
                shutdown_signal(),
            )
            .await;
            info!(
                "Live session ended: {} frames, {} skipped, {} failed, {} alerts",
                report.processed, report.skipped, report.failed, report.alerts
            );
        }
        Mode::Video => {
            let summary = scan_video(&mut ctx, &config).await?;
            info!(
                frames = summary.frames,
                positive = summary.positive,
                alerts = summary.alerts,
                ratio = ?summary.final_ratio,
                final_alert = summary.final_alert,
                cancelled = summary.cancelled,
                "Video scan complete"
            );
        }
    }
    Ok(())
}

/// Tick a live session on a fixed timer until `shutdown` resolves or the
/// frame limit is reached. A tick that overruns delays the next one.
pub async fn drive_live<S, F>(
    ctx: &mut AppContext,
    session: &mut LiveSession<S>,
    period: Duration,
    frame_limit: Option<u64>,
    shutdown: F,
) -> LiveReport
where
    S: FrameSource,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut report = LiveReport::default();
    loop {
        if frame_limit.is_some_and(|limit| report.processed >= limit) {
            info!("Live frame limit of {} reached", report.processed);
            break;
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match session.tick(ctx) {
                    Ok(TickOutcome::Processed(frame)) => {
                        report.processed += 1;
                        if frame.alert {
                            report.alerts += 1;
                        }
                    }
                    Ok(TickOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!("Frame inference failed: {}", e);
                    }
                }
            }
        }
    }
    report
}

/// One pass over the configured video file; Ctrl-C cancels mid-scan
pub async fn scan_video(ctx: &mut AppContext, config: &AppConfig) -> anyhow::Result<ScanSummary> {
    let source = VideoFileSource::open(&config.video)
        .with_context(|| format!("failed to open video {}", config.video.path))?;
    let mut scan = VideoScan::new(ctx, source)?;

    let token = scan.cancel_token();
    let listener = tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    let result = run_scan(ctx, &mut scan).await;
    listener.abort();
    Ok(result?)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
