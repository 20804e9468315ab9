// Pipeline ticks
//
// One method per scheduled loop. Every tick logs and swallows the errors of
// individual units of work; nothing here aborts a loop. Poll and retry ticks
// check the shutdown flag between units of work and stop early once it is set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::builder::build_pr_events;
use crate::error::{SourceError, StoreError};
use crate::models::{NewEvent, Repo};
use crate::resolver::resolve_subscribers;
use crate::sender::EventSender;
use crate::store::{GcPolicy, InsertOutcome, NotifyStore};
use crate::upstream::PullRequestSource;

/// Repo reconciliation errors (fatal at startup)
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("listing upstream repos: {0}")]
    Source(#[from] SourceError),

    #[error("creating repo: {0}")]
    Store(#[from] StoreError),
}

/// Counters of one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Candidates built across all repos
    pub candidates: usize,
    /// Candidates recorded as new events
    pub created: usize,
    /// New events delivered
    pub delivered: usize,
}

/// Counters of one retry tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Drives polling, retries and GC against the shared store
pub struct Fetcher {
    store: Arc<dyn NotifyStore>,
    source: Arc<dyn PullRequestSource>,
    sender: EventSender,
}

impl Fetcher {
    pub fn new(
        store: Arc<dyn NotifyStore>,
        source: Arc<dyn PullRequestSource>,
        sender: EventSender,
    ) -> Self {
        Self {
            store,
            source,
            sender,
        }
    }

    /// Create missing repos from the upstream repository list
    #[instrument(skip(self))]
    pub async fn sync_repos(&self) -> Result<usize, SyncError> {
        let upstream = self.source.list_repos().await?;
        for repo in &upstream {
            self.store.create_repo(&repo.project, &repo.slug).await?;
        }

        info!(count = upstream.len(), "Repos synced");
        Ok(upstream.len())
    }

    /// Build, record and deliver new events for every tracked repo
    pub async fn poll_tick(&self, shutdown: &watch::Receiver<bool>) -> PollReport {
        let repos = match self.store.list_repos().await {
            Ok(repos) => repos,
            Err(e) => {
                error!(error = %e, "Listing repos failed");
                return PollReport::default();
            }
        };

        let mut candidates = Vec::new();
        for repo in &repos {
            if stopping(shutdown) {
                info!("Shutdown requested, abandoning poll tick");
                return PollReport::default();
            }
            candidates.extend(self.repo_candidates(repo, shutdown).await);
        }

        let mut report = PollReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            if stopping(shutdown) {
                info!(created = report.created, "Shutdown requested, stopping poll tick");
                return report;
            }
            let hash = candidate.hash.clone();
            match self.store.create_event_if_absent(candidate).await {
                Ok(InsertOutcome::Created(event)) => {
                    report.created += 1;
                    debug!(event_id = event.id, event = %event, "Event created");
                    if self.sender.send(&event).await {
                        report.delivered += 1;
                    }
                }
                Ok(InsertOutcome::AlreadyExists) => {}
                Err(e) => {
                    error!(hash = %hash, error = %e, "Creating event failed");
                }
            }
        }

        if report.created > 0 {
            info!(
                candidates = report.candidates,
                created = report.created,
                delivered = report.delivered,
                "Poll tick finished"
            );
        }
        report
    }

    /// Candidates of one repo; errors are logged and yield what was built so far
    async fn repo_candidates(
        &self,
        repo: &Repo,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<NewEvent> {
        let subscribers = match resolve_subscribers(self.store.as_ref(), repo.id).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!(repo = %repo, error = %e, "Resolving subscribers failed");
                return Vec::new();
            }
        };
        if subscribers.is_empty() {
            return Vec::new();
        }

        let prs = match self.source.list_open_pull_requests(repo).await {
            Ok(prs) => prs,
            Err(e) => {
                error!(repo = %repo, error = %e, "Listing pull requests failed");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for pr in &prs {
            if stopping(shutdown) {
                return candidates;
            }
            let activities = match self.source.list_pr_activity(repo, pr.id).await {
                Ok(activities) => activities,
                Err(e) => {
                    error!(repo = %repo, pr_id = pr.id, error = %e, "Listing PR activity failed");
                    Vec::new()
                }
            };
            candidates.extend(build_pr_events(repo, pr, &activities, &subscribers));
        }

        debug!(repo = %repo, prs = prs.len(), candidates = candidates.len(), "Repo polled");
        candidates
    }

    /// Redeliver every unacked event
    pub async fn retry_tick(&self, shutdown: &watch::Receiver<bool>) -> RetryReport {
        let events = match self.store.list_unsent_events().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Listing unsent events failed");
                return RetryReport::default();
            }
        };

        let mut report = RetryReport {
            attempted: events.len(),
            ..Default::default()
        };
        for event in &events {
            if stopping(shutdown) {
                info!(delivered = report.delivered, "Shutdown requested, stopping retry tick");
                return report;
            }
            if self.sender.send(event).await {
                report.delivered += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                "Retry tick finished"
            );
        }
        report
    }

    /// Delete events older than `threshold` relative to `now`
    ///
    /// Returns the number of deleted events.
    pub async fn gc_tick(&self, now: DateTime<Utc>, threshold: Duration, policy: GcPolicy) -> u64 {
        let threshold = match chrono::Duration::from_std(threshold) {
            Ok(threshold) => threshold,
            Err(e) => {
                error!(error = %e, "GC threshold out of range");
                return 0;
            }
        };
        let cutoff = now - threshold;

        let ids = match self.store.list_outdated_event_ids(cutoff, policy).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Listing outdated events failed");
                return 0;
            }
        };

        if ids.is_empty() {
            debug!(%cutoff, %policy, "No outdated events");
            return 0;
        }

        match self.store.delete_events(&ids).await {
            Ok(deleted) => {
                info!(deleted, %cutoff, %policy, "Outdated events deleted");
                deleted
            }
            Err(e) => {
                warn!(count = ids.len(), error = %e, "Deleting outdated events failed");
                0
            }
        }
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
