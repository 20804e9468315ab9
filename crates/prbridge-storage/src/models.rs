// Database rows and their conversion into core models

use chrono::{DateTime, Utc};
use prbridge_core::{Event, Repo, StoreError, Subscription, User};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct RepoRow {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<RepoRow> for Repo {
    fn from(row: RepoRow) -> Self {
        Repo {
            id: row.id,
            project: row.project,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub tg_id: i64,
    pub tg_login: String,
    pub tg_chat_id: i64,
    pub bb_email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            tg_id: row.tg_id,
            tg_login: row.tg_login,
            tg_chat_id: row.tg_chat_id,
            bb_email: row.bb_email,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: i64,
    pub user_id: i64,
    pub repo_id: i64,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            repo_id: row.repo_id,
            kind: row.kind.parse().map_err(StoreError::Serialization)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub hash: String,
    pub event_type: String,
    pub recipient_tg_id: i64,
    pub recipient_chat_id: i64,
    pub sender_name: String,
    pub repo_project: String,
    pub repo_name: String,
    pub pr_id: i64,
    pub pr_title: String,
    pub pr_url: String,
    pub send_ack: bool,
    pub send_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            hash: row.hash,
            event_type: row.event_type.parse().map_err(StoreError::Serialization)?,
            recipient_tg_id: row.recipient_tg_id,
            recipient_chat_id: row.recipient_chat_id,
            sender_name: row.sender_name,
            repo_project: row.repo_project,
            repo_name: row.repo_name,
            pr_id: row.pr_id,
            pr_title: row.pr_title,
            pr_url: row.pr_url,
            send_ack: row.send_ack,
            send_at: row.send_at,
            created_at: row.created_at,
        })
    }
}
