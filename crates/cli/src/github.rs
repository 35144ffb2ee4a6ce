//! GitHub API integration

use std::time::Duration;

use chrono::Utc;
use pkgpulse_core::{
    activity_series, normalize_stars, CommitWeek, ContributorStats, PullRequest, Release,
    RepositoryMetadata, RepositorySnapshot, RepositoryStats, StarEvent,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::GitHubSettings;
use crate::error::{Error, Result};
use crate::http::{send_with_retry, RetryPolicy};

/// Media type that adds `starred_at` to each stargazer
const STAR_MEDIA_TYPE: &str = "application/vnd.github.star+json";

const PER_PAGE: &str = "100";

/// Stargazer events collected by the pagination loop
#[derive(Debug, Default)]
pub struct StarPages {
    pub events: Vec<StarEvent>,
    /// Pages requested, including the terminating one
    pub requests: u32,
    /// The loop stopped before reaching an empty page
    pub truncated: bool,
    pub warning: Option<String>,
}

/// GitHub API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    authenticated: bool,
    api_base: String,
    retry: RetryPolicy,
    max_star_pages: u32,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("pkgpulse"));

        if let Some(ref t) = settings.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", t))
                    .map_err(|_| Error::Credentials("Invalid GitHub token format".to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            authenticated: settings.token.is_some(),
            api_base: settings.api_url.trim_end_matches('/').to_string(),
            retry,
            max_star_pages: settings.max_star_pages,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn repo_url(&self, owner: &str, name: &str, suffix: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_base, owner, name, suffix)
    }

    /// Base repository resource
    pub async fn fetch_repository(&self, owner: &str, name: &str) -> Result<RepositoryMetadata> {
        let url = self.repo_url(owner, name, "");
        let resp = send_with_retry(self.client.get(&url), &url, &self.retry).await?;
        let resp = expect_ok(resp, &url)?;
        resp.json().await.map_err(|e| Error::from_transport(&url, e))
    }

    /// Walk stargazer pages until an empty page, a non-200 response or the
    /// page limit.
    pub async fn fetch_stargazers(&self, owner: &str, name: &str) -> StarPages {
        let url = self.repo_url(owner, name, "/stargazers");
        let mut pages = StarPages::default();
        let mut page: u32 = 1;

        loop {
            if page > self.max_star_pages {
                let limit = Error::PaginationLimitExceeded {
                    max_pages: self.max_star_pages,
                };
                warn!("{}/{}: {}", owner, name, limit);
                pages.truncated = true;
                pages.warning = Some(limit.to_string());
                break;
            }

            pages.requests += 1;
            match self.fetch_star_page(&url, page).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    debug!("Stargazer page {} of {}/{}: {} events", page, owner, name, batch.len());
                    pages.events.extend(batch);
                    page += 1;
                }
                Err(e) => {
                    warn!("Stargazer page {} of {}/{} failed: {}", page, owner, name, e);
                    // A failure after some pages leaves a partial history
                    pages.truncated = page > 1;
                    pages.warning = Some(format!("stargazers: {e}"));
                    break;
                }
            }
        }

        pages
    }

    async fn fetch_star_page(&self, url: &str, page: u32) -> Result<Vec<StarEvent>> {
        let page = page.to_string();
        let request = self
            .client
            .get(url)
            .header(ACCEPT, STAR_MEDIA_TYPE)
            .query(&[("per_page", PER_PAGE), ("page", page.as_str())]);
        let resp = send_with_retry(request, url, &self.retry).await?;
        let resp = expect_ok(resp, url)?;
        resp.json().await.map_err(|e| Error::from_transport(url, e))
    }

    /// GET a JSON collection; anything other than 200 is an error
    async fn fetch_collection<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>> {
        let resp = send_with_retry(self.client.get(&url), &url, &self.retry).await?;
        if resp.status() == StatusCode::ACCEPTED {
            // Statistics are still being computed
            return Err(Error::UpstreamHttp {
                url,
                status: Some(202),
                message: "statistics are being generated".to_string(),
            });
        }
        let resp = expect_ok(resp, &url)?;
        resp.json().await.map_err(|e| Error::from_transport(&url, e))
    }

    /// Fetch the repository snapshot and weekly activity series.
    ///
    /// Returns `None` only when the repository cannot be identified or its
    /// metadata call fails. Every other sub-resource degrades to an empty
    /// collection and leaves a warning on the snapshot.
    pub async fn fetch_repository_stats(&self, repo: &str) -> Option<RepositoryStats> {
        let (owner, name) = match parse_github_repo(repo) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };

        info!("Fetching repository statistics for {}/{}", owner, name);
        if !self.is_authenticated() {
            debug!("No GitHub token set, using unauthenticated rate limits");
        }

        let metadata = match self.fetch_repository(&owner, &name).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Repository {}/{} unavailable: {}", owner, name, e);
                return None;
            }
        };

        let stars = self.fetch_stargazers(&owner, &name).await;

        let (commits, contributors, releases, pull_requests) = tokio::join!(
            self.fetch_collection::<CommitWeek>(
                self.repo_url(&owner, &name, "/stats/commit_activity")
            ),
            self.fetch_collection::<ContributorStats>(
                self.repo_url(&owner, &name, "/stats/contributors")
            ),
            self.fetch_collection::<Release>(self.repo_url(&owner, &name, "/releases")),
            self.fetch_collection::<PullRequest>(
                self.repo_url(&owner, &name, "/pulls?state=all&per_page=100")
            ),
        );

        let mut warnings = Vec::new();
        warnings.extend(stars.warning);
        let commits = degrade("commit activity", commits, &mut warnings);
        let contributors = degrade("contributors", contributors, &mut warnings);
        let releases = degrade("releases", releases, &mut warnings);
        let pull_requests = degrade("pull requests", pull_requests, &mut warnings);

        let today = Utc::now().date_naive();
        let activity = activity_series(&metadata, &commits, today);

        let mut snapshot = RepositorySnapshot::assemble(
            metadata,
            commits,
            contributors,
            releases,
            pull_requests,
            normalize_stars(&stars.events),
        );
        snapshot.star_history_truncated = stars.truncated;
        snapshot.warnings = warnings;

        info!(
            "{}/{}: {} star events over {} pages, {} warnings",
            owner,
            name,
            stars.events.len(),
            stars.requests,
            snapshot.warnings.len()
        );

        Some(RepositoryStats { activity, snapshot })
    }
}

fn expect_ok(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == StatusCode::OK {
        return Ok(resp);
    }
    Err(Error::UpstreamHttp {
        url: url.to_string(),
        status: Some(status.as_u16()),
        message: status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    })
}

fn degrade<T>(what: &str, result: Result<Vec<T>>, warnings: &mut Vec<String>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!("Could not fetch {}: {}", what, e);
        warnings.push(format!("{what}: {e}"));
        Vec::new()
    })
}

/// Parse a GitHub repository URL or string into owner and repo
pub fn parse_github_repo(repo: &str) -> Result<(String, String)> {
    let repo = repo.trim();
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    let invalid = || Error::InvalidRepository(repo.to_string());

    let pair = |path: &str, exact: bool| -> Option<(String, String)> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        let ok = if exact { parts.len() == 2 } else { parts.len() >= 2 };
        (ok && !parts[0].is_empty() && !parts[1].is_empty())
            .then(|| (parts[0].to_string(), parts[1].to_string()))
    };

    // owner/repo
    if !repo.contains("://") && !repo.contains('@') && !repo.contains("github.com") {
        return pair(repo, true).ok_or_else(invalid);
    }

    if let Some(path) = repo.strip_prefix("git@github.com:") {
        return pair(path, true).ok_or_else(invalid);
    }

    if let Some(path) = repo.strip_prefix("github.com/") {
        return pair(path, false).ok_or_else(invalid);
    }

    let url = url::Url::parse(repo).map_err(|_| invalid())?;
    pair(url.path(), false).ok_or_else(invalid)
}
