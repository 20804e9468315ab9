// Bootstrap: startup checks, background tasks and shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prbridge_bitbucket::BitbucketClient;
use prbridge_core::{spawn_workers, EventSender, Fetcher, NotifyStore};
use prbridge_storage::PostgresStore;
use prbridge_telegram::{TelegramClient, UpdateHandler};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::AppConfig;

/// Deadline for every startup check together
pub const INIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Running background tasks
pub struct App {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Connect everything, reconcile repos and start the loops
    pub async fn start(config: AppConfig) -> Result<Self> {
        let (fetcher, handler) = tokio::time::timeout(INIT_TIMEOUT, init(&config))
            .await
            .context("startup timed out")??;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = spawn_workers(Arc::new(fetcher), config.loops.clone(), shutdown_rx.clone())?;
        tasks.push(tokio::spawn(handler.run(shutdown_rx)));

        info!(tasks = tasks.len(), "prbridge started");
        Ok(Self { shutdown_tx, tasks })
    }

    /// Signal shutdown and wait for every task to finish
    pub async fn shutdown(self) {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Task ended abnormally");
            }
        }
        info!("Shutdown complete");
    }
}

async fn init(config: &AppConfig) -> Result<(Fetcher, UpdateHandler)> {
    let store: Arc<dyn NotifyStore> = Arc::new(
        PostgresStore::connect(&config.database_url, config.database_max_connections)
            .await
            .context("Failed to connect to database")?,
    );

    let telegram = TelegramClient::new(config.telegram.clone())
        .context("Failed to create Telegram client")?;
    let me = telegram
        .get_me()
        .await
        .context("Failed to reach the Telegram Bot API")?;
    info!(bot_id = me.id, bot = ?me.username, "Telegram bot authorized");

    let bitbucket = BitbucketClient::new(config.bitbucket.clone())
        .context("Failed to create Bitbucket client")?;
    bitbucket
        .ping()
        .await
        .context("Failed to reach Bitbucket")?;
    info!(project = %bitbucket.project(), "Bitbucket reachable");

    let sender = EventSender::new(store.clone(), Arc::new(telegram.clone()));
    let fetcher = Fetcher::new(store.clone(), Arc::new(bitbucket), sender);
    fetcher
        .sync_repos()
        .await
        .context("Failed to sync repositories")?;

    let handler = UpdateHandler::new(store, telegram, config.bitbucket.project.clone());
    Ok((fetcher, handler))
}
