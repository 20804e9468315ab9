// Upstream pull-request source abstraction
//
// The pipeline only needs three read operations from the review tool. Wire
// formats stay in the client crate; these are the decoded records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::models::{EventType, Repo};

/// A repository as listed by the review tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRepo {
    /// Project key
    pub project: String,
    /// Repository slug
    pub slug: String,
}

/// A review-tool account
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    pub display_name: String,
}

/// A reviewer attached to a pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub user: Participant,
    pub approved: bool,
    /// Review status as reported upstream (APPROVED, UNAPPROVED, NEEDS_WORK)
    pub status: String,
}

/// An open pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub author: Participant,
    pub reviewers: Vec<Reviewer>,
    /// Self link to the PR page
    pub url: String,
}

/// Activity action codes
///
/// The mapping from upstream code is total: anything we don't notify about
/// lands in `Unmapped` and carries the raw code for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityAction {
    Approved,
    Updated,
    Commented,
    Merged,
    Declined,
    Unmapped(String),
}

impl ActivityAction {
    pub fn from_code(code: &str) -> Self {
        match code {
            "APPROVED" => Self::Approved,
            "UPDATED" => Self::Updated,
            "COMMENTED" => Self::Commented,
            "MERGED" => Self::Merged,
            "DECLINED" => Self::Declined,
            other => Self::Unmapped(other.to_string()),
        }
    }

    /// Event type to notify with, `None` for unmapped actions
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Self::Approved => Some(EventType::PrApproved),
            Self::Updated => Some(EventType::PrUpdated),
            Self::Commented => Some(EventType::Comment),
            Self::Merged => Some(EventType::PrMerged),
            Self::Declined => Some(EventType::PrRejected),
            Self::Unmapped(_) => None,
        }
    }
}

/// One entry of a pull request's activity history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub actor: Participant,
    pub action: ActivityAction,
}

/// Read access to the review tool
#[async_trait]
pub trait PullRequestSource: Send + Sync + 'static {
    /// All repositories visible to the configured account
    async fn list_repos(&self) -> Result<Vec<UpstreamRepo>, SourceError>;

    /// Open pull requests of a repository (all pages)
    async fn list_open_pull_requests(&self, repo: &Repo)
        -> Result<Vec<PullRequest>, SourceError>;

    /// Full activity history of a pull request (all pages)
    async fn list_pr_activity(&self, repo: &Repo, pr_id: i64)
        -> Result<Vec<Activity>, SourceError>;
}
