//! NotifyStore trait definition

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Event, NewEvent, Repo, Subscription, SubscriptionKind, User};

/// Result of an idempotent event insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The event was recorded by this call
    Created(Event),
    /// An event with the same hash was already recorded
    AlreadyExists,
}

impl InsertOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Which events the GC removes once they are older than the retention threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcPolicy {
    /// Delivered events whose delivery time is older than the cutoff.
    /// Undelivered events are never collected and keep being retried.
    #[default]
    AckedBySentAt,
    /// Any event whose source time is older than the cutoff, delivered or not
    ByCreatedAt,
}

impl GcPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AckedBySentAt => "acked_sent_at",
            Self::ByCreatedAt => "created_at",
        }
    }

    /// Whether `event` is collectable for the given cutoff
    pub fn is_outdated(&self, event: &Event, cutoff: DateTime<Utc>) -> bool {
        match self {
            Self::AckedBySentAt => {
                event.send_ack && event.send_at.is_some_and(|sent_at| sent_at < cutoff)
            }
            Self::ByCreatedAt => event.created_at < cutoff,
        }
    }
}

impl fmt::Display for GcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GcPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acked_sent_at" => Ok(Self::AckedBySentAt),
            "created_at" => Ok(Self::ByCreatedAt),
            other => Err(format!(
                "unknown GC policy: {other} (expected acked_sent_at or created_at)"
            )),
        }
    }
}

/// Durable storage for repos, users, subscriptions, events and key-values
///
/// Implementations must be safe to share between the poll, retry, GC and
/// update tasks. Event inserts are idempotent on `hash` and the ack update is
/// safe to apply more than once, so callers never need in-process locking.
#[async_trait]
pub trait NotifyStore: Send + Sync + 'static {
    // =========================================================================
    // Repos
    // =========================================================================

    /// Create a repo if it does not exist yet (idempotent)
    async fn create_repo(&self, project: &str, name: &str) -> Result<(), StoreError>;

    async fn get_repo(&self, project: &str, name: &str) -> Result<Option<Repo>, StoreError>;

    async fn list_repos(&self) -> Result<Vec<Repo>, StoreError>;

    // =========================================================================
    // Users
    // =========================================================================

    /// Create an inactive user for a Telegram account
    async fn create_user(
        &self,
        tg_id: i64,
        tg_chat_id: i64,
        tg_login: &str,
    ) -> Result<User, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn get_user_by_tg_id(&self, tg_id: i64) -> Result<Option<User>, StoreError>;

    async fn get_user_by_bb_email(&self, bb_email: &str) -> Result<Option<User>, StoreError>;

    async fn set_user_bb_email(&self, user_id: i64, bb_email: &str) -> Result<(), StoreError>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn list_subscriptions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, StoreError>;

    async fn list_subscriptions_for_repo(
        &self,
        repo_id: i64,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Create or update the subscription of a user to a repo
    async fn set_subscription(
        &self,
        user_id: i64,
        repo_id: i64,
        kind: SubscriptionKind,
    ) -> Result<(), StoreError>;

    async fn delete_subscription(&self, user_id: i64, repo_id: i64) -> Result<(), StoreError>;

    // =========================================================================
    // Events
    // =========================================================================

    /// Record a candidate unless an event with the same hash exists
    async fn create_event_if_absent(&self, event: NewEvent) -> Result<InsertOutcome, StoreError>;

    /// Mark an event delivered. Keeps the first delivery time if already set.
    async fn set_event_sent(&self, event_id: i64, sent_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Events not delivered yet, oldest first
    async fn list_unsent_events(&self) -> Result<Vec<Event>, StoreError>;

    /// IDs of events the GC may delete for the given cutoff
    async fn list_outdated_event_ids(
        &self,
        cutoff: DateTime<Utc>,
        policy: GcPolicy,
    ) -> Result<Vec<i64>, StoreError>;

    /// Delete events by ID, returns the number of deleted rows
    async fn delete_events(&self, ids: &[i64]) -> Result<u64, StoreError>;

    // =========================================================================
    // Key-value
    // =========================================================================

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace a value
    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Input validation shared by store implementations for repo creation
pub fn validate_repo_names(project: &str, name: &str) -> Result<(), StoreError> {
    if project.is_empty() {
        return Err(StoreError::invalid("project name is empty"));
    }
    if name.is_empty() {
        return Err(StoreError::invalid("repo name is empty"));
    }
    Ok(())
}

/// Input validation shared by store implementations for user creation
pub fn validate_user_ids(tg_id: i64, tg_chat_id: i64) -> Result<(), StoreError> {
    if tg_id == 0 {
        return Err(StoreError::invalid("telegram ID is empty"));
    }
    if tg_chat_id == 0 {
        return Err(StoreError::invalid("telegram chat ID is empty"));
    }
    Ok(())
}
