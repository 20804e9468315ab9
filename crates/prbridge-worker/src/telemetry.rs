// Log subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_LEVEL: &str = "debug";

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Log filter (e.g., "info", "prbridge=debug")
    pub log_filter: Option<String>,
}

impl TelemetryConfig {
    /// `RUST_LOG` wins over `LOG_LEVEL`; a bare level applies to the prbridge crates
    pub fn from_env() -> Self {
        let log_filter = std::env::var("RUST_LOG")
            .ok()
            .or_else(|| std::env::var("LOG_LEVEL").ok().map(|level| crate_filter(&level)));
        Self { log_filter }
    }
}

fn crate_filter(level: &str) -> String {
    [
        "prbridge",
        "prbridge_core",
        "prbridge_storage",
        "prbridge_bitbucket",
        "prbridge_telegram",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .collect::<Vec<_>>()
    .join(",")
}

pub fn init_telemetry(config: TelemetryConfig) {
    let filter = config
        .log_filter
        .as_ref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(crate_filter(DEFAULT_LOG_LEVEL)));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter),
        )
        .init();
}
