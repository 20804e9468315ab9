// Periodic control loops
//
// Poll, retry and GC run as independent tokio tasks. Each loop ticks on its
// own interval (first tick immediately), runs one tick inside a span carrying
// a fresh correlation ID and exits once the shutdown flag flips. Poll and
// retry ticks also watch the flag themselves, so a running tick stops at the
// next unit of work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::fetcher::Fetcher;
use crate::store::GcPolicy;

/// Loop periods and GC settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Poll loop period
    pub fetch_period: Duration,
    /// Retry loop period
    pub retry_period: Duration,
    /// GC loop period
    pub gc_period: Duration,
    /// Events older than this are collected
    pub gc_threshold: Duration,
    pub gc_policy: GcPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            fetch_period: Duration::from_secs(60),
            retry_period: Duration::from_secs(5 * 60),
            gc_period: Duration::from_secs(3 * 60 * 60),
            gc_threshold: Duration::from_secs(7 * 24 * 60 * 60),
            gc_policy: GcPolicy::default(),
        }
    }
}

impl LoopConfig {
    /// Every period and the GC threshold must be positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("fetch period", self.fetch_period),
            ("retry period", self.retry_period),
            ("events GC period", self.gc_period),
            ("events GC threshold", self.gc_threshold),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NonPositiveDuration { name, value });
            }
        }
        Ok(())
    }
}

/// Spawn the poll, retry and GC loops
pub fn spawn_workers(
    fetcher: Arc<Fetcher>,
    config: LoopConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, ConfigError> {
    config.validate()?;

    let poll = {
        let fetcher = fetcher.clone();
        let shutdown = shutdown_rx.clone();
        spawn_periodic("poll", config.fetch_period, shutdown_rx.clone(), move || {
            let fetcher = fetcher.clone();
            let shutdown = shutdown.clone();
            async move {
                fetcher.poll_tick(&shutdown).await;
            }
        })
    };

    let retry = {
        let fetcher = fetcher.clone();
        let shutdown = shutdown_rx.clone();
        spawn_periodic("retry", config.retry_period, shutdown_rx.clone(), move || {
            let fetcher = fetcher.clone();
            let shutdown = shutdown.clone();
            async move {
                fetcher.retry_tick(&shutdown).await;
            }
        })
    };

    let gc = {
        let threshold = config.gc_threshold;
        let policy = config.gc_policy;
        spawn_periodic("gc", config.gc_period, shutdown_rx, move || {
            let fetcher = fetcher.clone();
            async move {
                fetcher.gc_tick(Utc::now(), threshold, policy).await;
            }
        })
    };

    Ok(vec![poll, retry, gc])
}

/// Run `tick` every `period` until shutdown is signalled
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(worker = name, period = ?period, "Worker started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    let span = info_span!("tick", worker = name, correlation_id = %Uuid::now_v7());
                    tick().instrument(span).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker = name, "Worker stopped");
    })
}
