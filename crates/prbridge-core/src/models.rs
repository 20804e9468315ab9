// Domain models shared by the pipeline, storage and transports

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================
// Repos
// ============================================

/// A tracked repository (Bitbucket project key + repository slug)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

// ============================================
// Users
// ============================================

/// A Telegram account linked to a Bitbucket email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Telegram user ID
    pub tg_id: i64,
    /// Telegram user name (may be empty)
    pub tg_login: String,
    /// Telegram chat ID (equals tg_id for private chats)
    pub tg_chat_id: i64,
    /// Bitbucket email, empty until the user sets it
    pub bb_email: String,
    /// Inactive users are not allowed to use the bot
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Email key used to match the user against Bitbucket participants
    pub fn email_key(&self) -> String {
        email_key(&self.bb_email)
    }
}

/// Normalizes an email for comparisons between Telegram users and Bitbucket participants
pub fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================
// Subscriptions
// ============================================

/// How a user wants to be notified about a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Every event of every open PR
    All,
    /// Only events of PRs the user reviews
    ReviewerOnly,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ReviewerOnly => "reviewer_only",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "reviewer_only" => Ok(Self::ReviewerOnly),
            other => Err(format!("unknown subscription kind: {other}")),
        }
    }
}

/// A user's subscription to a repository (one per user/repo pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub repo_id: i64,
    pub kind: SubscriptionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Events
// ============================================

/// What happened to a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "pr_open")]
    PrOpened,
    PrApproved,
    PrRejected,
    PrMerged,
    PrUpdated,
    Comment,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        Self::PrOpened,
        Self::PrApproved,
        Self::PrRejected,
        Self::PrMerged,
        Self::PrUpdated,
        Self::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrOpened => "pr_open",
            Self::PrApproved => "pr_approved",
            Self::PrRejected => "pr_rejected",
            Self::PrMerged => "pr_merged",
            Self::PrUpdated => "pr_updated",
            Self::Comment => "comment",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// A notification candidate, not yet recorded
///
/// `hash` is the content fingerprint used as the storage uniqueness key. Build
/// candidates through [`NewEvent::sealed`] so the hash always matches the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub hash: String,
    pub event_type: EventType,
    /// Recipient Telegram user ID
    pub recipient_tg_id: i64,
    /// Recipient Telegram chat ID
    pub recipient_chat_id: i64,
    /// Bitbucket display name of the actor
    pub sender_name: String,
    pub repo_project: String,
    pub repo_name: String,
    pub pr_id: i64,
    pub pr_title: String,
    pub pr_url: String,
    /// Source-side time (activity or PR creation), not insertion time
    pub created_at: DateTime<Utc>,
}

impl NewEvent {
    /// Recomputes the fingerprint from the content fields
    pub fn fingerprint(&self) -> String {
        let created_at = self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let tg_id = self.recipient_tg_id.to_be_bytes();
        let chat_id = self.recipient_chat_id.to_be_bytes();
        let pr_id = self.pr_id.to_be_bytes();
        let fields: [&[u8]; 10] = [
            self.event_type.as_str().as_bytes(),
            &tg_id,
            &chat_id,
            self.sender_name.as_bytes(),
            self.repo_project.as_bytes(),
            self.repo_name.as_bytes(),
            &pr_id,
            self.pr_title.as_bytes(),
            self.pr_url.as_bytes(),
            created_at.as_bytes(),
        ];

        // Length-prefix every field so ("ab", "c") and ("a", "bc") differ
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the candidate with `hash` set from its content
    pub fn sealed(mut self) -> Self {
        self.hash = self.fingerprint();
        self
    }
}

impl fmt::Display for NewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}): {} -> {}",
            self.repo_project, self.repo_name, self.event_type, self.sender_name, self.recipient_tg_id
        )
    }
}

/// A recorded notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub hash: String,
    pub event_type: EventType,
    pub recipient_tg_id: i64,
    pub recipient_chat_id: i64,
    pub sender_name: String,
    pub repo_project: String,
    pub repo_name: String,
    pub pr_id: i64,
    pub pr_title: String,
    pub pr_url: String,
    /// Whether the event was delivered; false events are retried
    pub send_ack: bool,
    /// Delivery time, set together with `send_ack`
    pub send_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Builds the stored form of a candidate
    pub fn from_new(id: i64, event: NewEvent) -> Self {
        Self {
            id,
            hash: event.hash,
            event_type: event.event_type,
            recipient_tg_id: event.recipient_tg_id,
            recipient_chat_id: event.recipient_chat_id,
            sender_name: event.sender_name,
            repo_project: event.repo_project,
            repo_name: event.repo_name,
            pr_id: event.pr_id,
            pr_title: event.pr_title,
            pr_url: event.pr_url,
            send_ack: false,
            send_at: None,
            created_at: event.created_at,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}): {} -> {}",
            self.repo_project, self.repo_name, self.event_type, self.sender_name, self.recipient_tg_id
        )
    }
}
