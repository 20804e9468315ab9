//! prbridge binary support: configuration, logging and bootstrap

pub mod app;
pub mod config;
pub mod telemetry;

pub use app::{App, INIT_TIMEOUT};
pub use config::AppConfig;
pub use telemetry::{init_telemetry, TelemetryConfig};
