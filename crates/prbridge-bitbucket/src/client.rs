// Bitbucket Server REST client
//
// Works with a single project. Every collection endpoint is paged; the client
// follows `nextPageStart` until `isLastPage`.

use std::time::Duration;

use async_trait::async_trait;
use prbridge_core::{
    Activity, PullRequest, PullRequestSource, Repo, SourceError, UpstreamRepo,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::models::{Page, WireActivity, WirePullRequest, WireRepo};

/// Bitbucket client configuration
#[derive(Debug, Clone)]
pub struct BitbucketConfig {
    /// REST API base, e.g. `https://bitbucket.example.com/rest/api/1.0`
    pub host: String,
    /// Personal access token
    pub token: String,
    /// Project key
    pub project: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Accept invalid TLS certificates (self-signed on-prem installs)
    pub insecure_tls: bool,
    /// Page size for paged endpoints
    pub page_limit: u32,
}

impl BitbucketConfig {
    pub fn new(
        host: impl Into<String>,
        token: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            token: token.into(),
            project: project.into(),
            timeout: Duration::from_secs(10),
            insecure_tls: false,
            page_limit: 50,
        }
    }
}

/// Bitbucket Server API client
#[derive(Clone)]
pub struct BitbucketClient {
    http: reqwest::Client,
    base: Url,
    project: String,
    page_limit: u32,
}

impl BitbucketClient {
    pub fn new(config: BitbucketConfig) -> Result<Self, SourceError> {
        if config.project.is_empty() {
            return Err(SourceError::InvalidConfig(
                "Bitbucket project is not defined".to_string(),
            ));
        }
        if config.page_limit == 0 {
            return Err(SourceError::InvalidConfig(
                "page limit must be positive".to_string(),
            ));
        }

        // Trailing slash so joined endpoints keep the API path prefix
        let mut host = config.host.trim_end_matches('/').to_string();
        host.push('/');
        let base = Url::parse(&host).map_err(|e| {
            SourceError::InvalidConfig(format!("parse host ({}): {e}", config.host))
        })?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|e| SourceError::InvalidConfig(format!("token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| SourceError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            base,
            project: config.project,
            page_limit: config.page_limit,
        })
    }

    /// Project key this client works with
    pub fn project(&self) -> &str {
        &self.project
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base
            .join(path)
            .map_err(|e| SourceError::InvalidConfig(format!("endpoint ({path}): {e}")))
    }

    /// Checks connectivity and credentials
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<(), SourceError> {
        let url = self.endpoint("application-properties")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| http_err(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        info!(host = %self.base, "Bitbucket reachable");
        Ok(())
    }

    /// Reads all pages of a collection endpoint
    async fn get_all<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, SourceError> {
        let url = self.endpoint(path)?;
        let limit = self.page_limit.to_string();

        let mut values = Vec::new();
        let mut start: u32 = 0;
        loop {
            let start_param = start.to_string();
            let response = self
                .http
                .get(url.clone())
                .query(query)
                .query(&[("start", start_param.as_str()), ("limit", limit.as_str())])
                .send()
                .await
                .map_err(|e| http_err(&url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let page: Page<T> = response.json().await.map_err(|e| SourceError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            debug!(url = %url, start, size = page.values.len(), last = page.is_last_page, "Page fetched");
            values.extend(page.values);

            if page.is_last_page {
                break;
            }
            match page.next_page_start {
                Some(next) if next > start => start = next,
                next => {
                    warn!(url = %url, start, ?next, "Page cursor did not advance, stopping");
                    break;
                }
            }
        }

        Ok(values)
    }
}

fn http_err(url: &Url, e: reqwest::Error) -> SourceError {
    SourceError::Http {
        url: url.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl PullRequestSource for BitbucketClient {
    #[instrument(skip(self))]
    async fn list_repos(&self) -> Result<Vec<UpstreamRepo>, SourceError> {
        let path = format!("projects/{}/repos", self.project);
        let repos: Vec<WireRepo> = self.get_all(&path, &[]).await?;

        Ok(repos
            .into_iter()
            .map(|r| r.into_upstream(&self.project))
            .collect())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_open_pull_requests(
        &self,
        repo: &Repo,
    ) -> Result<Vec<PullRequest>, SourceError> {
        let path = format!("projects/{}/repos/{}/pull-requests", repo.project, repo.name);
        let prs: Vec<WirePullRequest> = self.get_all(&path, &[("state", "OPEN")]).await?;

        Ok(prs
            .into_iter()
            .filter_map(|wire| {
                let id = wire.id;
                let pr = wire.into_pull_request();
                if pr.is_none() {
                    warn!(repo = %repo, pr_id = id, "Skipping PR without self link or valid timestamp");
                }
                pr
            })
            .collect())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_pr_activity(
        &self,
        repo: &Repo,
        pr_id: i64,
    ) -> Result<Vec<Activity>, SourceError> {
        let path = format!(
            "projects/{}/repos/{}/pull-requests/{}/activities",
            repo.project, repo.name, pr_id
        );
        let activities: Vec<WireActivity> = self.get_all(&path, &[]).await?;

        Ok(activities
            .into_iter()
            .filter_map(|wire| {
                let id = wire.id;
                let activity = wire.into_activity();
                if activity.is_none() {
                    warn!(repo = %repo, pr_id, activity_id = id, "Skipping activity with invalid timestamp");
                }
                activity
            })
            .collect())
    }
}
