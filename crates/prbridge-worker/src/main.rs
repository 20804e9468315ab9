use anyhow::{Context, Result};
use prbridge_worker::{init_telemetry, App, AppConfig, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    // RUST_LOG or LOG_LEVEL: Log filter (default: "prbridge=debug")
    init_telemetry(TelemetryConfig::from_env());

    tracing::info!("prbridge starting...");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        project = %config.bitbucket.project,
        fetch_period = ?config.loops.fetch_period,
        retry_period = ?config.loops.retry_period,
        gc_period = ?config.loops.gc_period,
        gc_threshold = ?config.loops.gc_threshold,
        gc_policy = %config.loops.gc_policy,
        "Configuration loaded"
    );

    let app = App::start(config).await.context("Startup failed")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    app.shutdown().await;
    Ok(())
}
