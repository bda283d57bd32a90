//! GitHub issue source.
//!
//! Async client over the GitHub REST v3 issue endpoints. Listing walks
//! pages of 100 until an empty page comes back. Comment fetching shares a
//! counting permit set so concurrent reconcile tasks never hold more than
//! a handful of requests in flight, and retries transport failures with
//! exponential backoff. HTTP outcomes are classified into [`GithubError`]
//! here so nothing downstream looks at status codes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;
use reqwest::header;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::GithubConfig;

const USER_AGENT: &str = concat!("kindred/", env!("CARGO_PKG_VERSION"));

/// Page size for both issue and comment listings
const PER_PAGE: u32 = 100;

/// Comment page fetches: total attempts, first pause, pause ceiling
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("Repository not found: https://github.com/{owner}/{repo}")]
    RepositoryNotFound { owner: String, repo: String },

    #[error("GitHub rejected the access token")]
    Unauthorized,

    #[error("GitHub API rate limit exceeded, resets at {} UTC", format_reset_time(*reset_epoch))]
    RateLimited { reset_epoch: i64 },

    #[error("GitHub request to {url} failed with status {status}")]
    Status { status: u16, url: String },

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl GithubError {
    /// Transport failures worth another attempt. Classified statuses,
    /// auth and rate limits are final on first sight.
    pub fn is_transient(&self) -> bool {
        match self {
            GithubError::Request(err) => {
                err.is_timeout() || err.is_connect() || err.is_request()
            }
            _ => false,
        }
    }
}

/// Render a rate-limit reset epoch as fixed-format UTC.
pub fn format_reset_time(reset_epoch: i64) -> String {
    match chrono::Utc.timestamp_opt(reset_epoch, 0) {
        chrono::LocalResult::Single(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => format!("epoch {}", reset_epoch),
    }
}

/// Issue entry as returned by the listing endpoint. Pull requests show
/// up here too and are treated like any other issue.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    #[serde(rename = "html_url")]
    pub url: String,
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteComment {
    #[serde(default)]
    pub body: Option<String>,
}

/// The seam the sync engine fetches through.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Every issue in the repository, all states, in listing order.
    async fn list_issues(&self, owner: &str, repo: &str) -> Result<Vec<RemoteIssue>, GithubError>;

    /// Every comment on one issue, in listing order.
    async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<RemoteComment>, GithubError>;
}

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    comment_permits: Arc<Semaphore>,
    retry_base: Duration,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self, GithubError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        if config.token.is_none() {
            log::warn!("no GitHub access token configured, anonymous rate limits apply");
        }

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            comment_permits: Arc::new(Semaphore::new(config.comment_concurrency)),
            retry_base: BACKOFF_BASE,
        })
    }

    /// Shrink retry pauses. Tests use this to keep backoff from
    /// dominating wall time.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        owner: &str,
        repo: &str,
    ) -> Result<T, GithubError> {
        let mut request = self
            .http
            .get(url)
            .query(query)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("token {}", token));
        }

        let response = request.send().await?;
        let remaining = header_value(&response, "x-ratelimit-remaining");
        let reset = header_value(&response, "x-ratelimit-reset");
        if let Some(err) = classify_failure(
            response.status(),
            remaining.as_deref(),
            reset.as_deref(),
            owner,
            repo,
            url,
        ) {
            return Err(err);
        }

        Ok(response.json::<T>().await?)
    }

    async fn fetch_issue_page(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<RemoteIssue>, GithubError> {
        let url = format!("{}/repos/{}/{}/issues", self.api_base, owner, repo);
        let query = [
            ("state", "all".to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("page", page.to_string()),
        ];
        self.get_json(&url, &query, owner, repo).await
    }

    async fn fetch_comment_page(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
    ) -> Result<Vec<RemoteComment>, GithubError> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_base, owner, repo, number
        );
        let query = [
            ("per_page", PER_PAGE.to_string()),
            ("page", page.to_string()),
        ];

        // Permit covers the round trip only; it is back in the pool
        // before any retry pause.
        let _permit = self
            .comment_permits
            .acquire()
            .await
            .expect("comment permit semaphore closed");
        self.get_json(&url, &query, owner, repo).await
    }

    async fn fetch_comment_page_with_retry(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
    ) -> Result<Vec<RemoteComment>, GithubError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_comment_page(owner, repo, number, page).await {
                Ok(batch) => return Ok(batch),
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_delay(self.retry_base, attempt);
                    log::debug!(
                        "comment fetch for {}/{}#{} page {} failed on attempt {}: {}, retrying in {:?}",
                        owner, repo, number, page, attempt, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl IssueSource for GithubClient {
    async fn list_issues(&self, owner: &str, repo: &str) -> Result<Vec<RemoteIssue>, GithubError> {
        let mut issues = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.fetch_issue_page(owner, repo, page).await?;
            if batch.is_empty() {
                break;
            }
            issues.extend(batch);
            page += 1;
        }

        log::debug!("{}/{}: listed {} issues", owner, repo, issues.len());
        Ok(issues)
    }

    async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<RemoteComment>, GithubError> {
        let mut comments = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .fetch_comment_page_with_retry(owner, repo, number, page)
                .await?;
            if batch.is_empty() {
                break;
            }
            comments.extend(batch);
            page += 1;
        }
        Ok(comments)
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map a non-success response to its error. Rate limiting only counts
/// when the remaining-requests header says the quota is spent; any other
/// 403 is an ordinary status failure.
fn classify_failure(
    status: StatusCode,
    rate_remaining: Option<&str>,
    rate_reset: Option<&str>,
    owner: &str,
    repo: &str,
    url: &str,
) -> Option<GithubError> {
    if status.is_success() {
        return None;
    }

    if status == StatusCode::NOT_FOUND {
        return Some(GithubError::RepositoryNotFound {
            owner: owner.to_string(),
            repo: repo.to_string(),
        });
    }

    if status == StatusCode::UNAUTHORIZED {
        return Some(GithubError::Unauthorized);
    }

    if (status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS)
        && rate_remaining == Some("0")
    {
        let reset_epoch = rate_reset.and_then(|v| v.parse().ok()).unwrap_or(0);
        return Some(GithubError::RateLimited { reset_epoch });
    }

    Some(GithubError::Status {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << (attempt - 1).min(4)).min(BACKOFF_CAP)
}
