// Bitbucket Server REST wire types
//
// Only the fields the pipeline reads are decoded. Timestamps are epoch
// milliseconds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use prbridge_core::{Activity, ActivityAction, Participant, PullRequest, Reviewer, UpstreamRepo};
use serde::Deserialize;

/// One page of a paged collection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "default_last_page")]
    pub is_last_page: bool,
    #[serde(default)]
    pub next_page_start: Option<u32>,
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
}

fn default_last_page() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

pub type Links = HashMap<String, Vec<Link>>;

fn self_link(links: &Links) -> Option<&str> {
    links
        .get("self")
        .and_then(|l| l.first())
        .map(|l| l.href.as_str())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub display_name: String,
}

impl From<WireUser> for Participant {
    fn from(user: WireUser) -> Self {
        Participant {
            email: user.email_address,
            display_name: user.display_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePrUser {
    #[serde(default)]
    pub user: WireUser,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireProject {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireRepo {
    pub slug: String,
    pub project: Option<WireProject>,
}

impl WireRepo {
    /// Falls back to `default_project` when the project key is absent
    pub fn into_upstream(self, default_project: &str) -> UpstreamRepo {
        UpstreamRepo {
            project: self
                .project
                .map(|p| p.key)
                .filter(|key| !key.is_empty())
                .unwrap_or_else(|| default_project.to_string()),
            slug: self.slug,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePullRequest {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    pub created_date: i64,
    pub author: WirePrUser,
    #[serde(default)]
    pub reviewers: Vec<WirePrUser>,
    #[serde(default)]
    pub links: Links,
}

impl WirePullRequest {
    /// Converts into a core record, `None` without a self link or a valid timestamp
    pub fn into_pull_request(self) -> Option<PullRequest> {
        let url = self_link(&self.links)?.to_string();
        let created_at = millis_to_utc(self.created_date)?;

        Some(PullRequest {
            id: self.id,
            title: self.title,
            created_at,
            author: self.author.user.into(),
            reviewers: self
                .reviewers
                .into_iter()
                .map(|r| Reviewer {
                    user: r.user.into(),
                    approved: r.approved,
                    status: r.status,
                })
                .collect(),
            url,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireActivity {
    pub id: i64,
    pub created_date: i64,
    #[serde(default)]
    pub user: WireUser,
    pub action: String,
}

impl WireActivity {
    /// Converts into a core record, `None` for an invalid timestamp
    pub fn into_activity(self) -> Option<Activity> {
        Some(Activity {
            id: self.id,
            created_at: millis_to_utc(self.created_date)?,
            actor: self.user.into(),
            action: ActivityAction::from_code(&self.action),
        })
    }
}

/// Epoch milliseconds to UTC
pub fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
