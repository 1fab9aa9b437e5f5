//! Drowsiness Watch - Main Entry Point

use monitor_app::{init_logging, run, AppConfig};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("=== Drowsiness Watch v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Starting in {:?} mode...", config.mode);

    run(config).await
}
