//! Fetch, normalize and aggregate package statistics
//!
//! [`Dashboard`] owns the upstream clients and the cache. Every fetch goes
//! through the cache; failures are isolated per top-level operation and
//! collected on the returned report.

use std::sync::Arc;

use chrono::Utc;
use pkgpulse_core::{
    ComparisonReport, ComparisonRow, DashboardReport, DateRange, DownloadRecord, Granularity,
    RepositoryCounts, RepositoryStats,
};
use tracing::{info, warn};

use crate::cache::{DownloadQuery, FetchCache};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::github::GitHubClient;
use crate::stats::StatsClient;
use crate::warehouse::WarehouseClient;

/// Inputs of a single-package report
#[derive(Debug, Clone)]
pub struct StatsRequest {
    pub package: String,
    pub repository: Option<String>,
    pub range: DateRange,
    pub granularity: Granularity,
}

pub struct Dashboard {
    /// Resolution errors are kept so only download queries fail without credentials
    warehouse: std::result::Result<WarehouseClient, Arc<Error>>,
    stats: StatsClient,
    github: GitHubClient,
    cache: FetchCache,
}

impl Dashboard {
    pub fn new(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let client = reqwest::Client::builder()
            .user_agent("pkgpulse")
            .timeout(settings.request_timeout)
            .build()?;

        let warehouse = WarehouseClient::new(client.clone(), &settings.warehouse).map_err(|e| {
            warn!("Warehouse unavailable: {}", e);
            Arc::new(e)
        });

        Ok(Self {
            warehouse,
            stats: StatsClient::new(client, &settings.stats_api_url, settings.retry),
            github: GitHubClient::new(&settings.github, settings.request_timeout, settings.retry)?,
            cache: FetchCache::new(settings.cache),
        })
    }

    /// Per-period download counts, cached for the downloads TTL
    pub async fn download_counts(
        &self,
        package: &str,
        range: DateRange,
        granularity: Granularity,
    ) -> Result<Arc<Vec<DownloadRecord>>> {
        let warehouse = self.warehouse.as_ref().map_err(|e| Error::Shared(e.clone()))?;
        let key = DownloadQuery {
            package: package.to_string(),
            range,
            granularity,
        };
        self.cache
            .downloads(key, warehouse.fetch_download_counts(package, range, granularity))
            .await
    }

    /// Lifetime total; callers fall back to 0 on error
    pub async fn lifetime_downloads(&self, package: &str) -> Result<u64> {
        self.cache
            .lifetime(package, self.stats.fetch_lifetime_downloads(package))
            .await
    }

    pub async fn repository_stats(&self, repo: &str) -> Option<Arc<RepositoryStats>> {
        self.cache
            .repository(repo, self.github.fetch_repository_stats(repo))
            .await
    }

    /// Run downloads, lifetime total and repository statistics in sequence.
    ///
    /// Never fails as a whole: each failed step leaves one message in
    /// `errors` and the remaining fields are still filled in.
    pub async fn report(&self, request: &StatsRequest) -> DashboardReport {
        let now = Utc::now();
        let mut report = DashboardReport::new(
            request.package.clone(),
            request.repository.clone(),
            request.range,
            request.granularity,
            now,
        );

        match self
            .download_counts(&request.package, request.range, request.granularity)
            .await
        {
            Ok(records) => report.set_downloads(records.as_ref().clone()),
            Err(e) => {
                warn!("Download counts for {} failed: {}", request.package, e);
                report
                    .errors
                    .push(format!("Error fetching download data for {}: {e}", request.package));
            }
        }

        match self.lifetime_downloads(&request.package).await {
            Ok(total) => report.lifetime_downloads = total,
            Err(e) => {
                warn!("Lifetime downloads for {} failed: {}", request.package, e);
                let reason = if e.is_transient() {
                    "temporarily unavailable"
                } else {
                    "unavailable"
                };
                report.errors.push(format!(
                    "Lifetime downloads {reason} for {}: {e}",
                    request.package
                ));
            }
        }

        if let Some(repo) = &request.repository {
            match self.repository_stats(repo).await {
                Some(stats) => report.set_repository(stats, now.date_naive()),
                None => report
                    .errors
                    .push(format!("Failed to fetch GitHub statistics for {repo}")),
            }
        }

        info!("{}", report.short_summary());
        report
    }

    /// Compare several packages over one range.
    ///
    /// Repository counts are attached only when `repositories` pairs up
    /// one-to-one with `packages`.
    pub async fn compare(
        &self,
        packages: &[String],
        repositories: &[String],
        range: DateRange,
        granularity: Granularity,
    ) -> ComparisonReport {
        let mut report = ComparisonReport::default();
        let paired = repositories.len() == packages.len();
        if !repositories.is_empty() && !paired {
            report.errors.push(format!(
                "{} repositories given for {} packages; repository data skipped",
                repositories.len(),
                packages.len()
            ));
        }

        for (i, package) in packages.iter().enumerate() {
            let series = match self.download_counts(package, range, granularity).await {
                Ok(records) => Some(records.as_ref().clone()),
                Err(e) => {
                    warn!("Download counts for {} failed: {}", package, e);
                    report
                        .errors
                        .push(format!("Error fetching download data for {package}: {e}"));
                    None
                }
            };

            let lifetime = self.lifetime_downloads(package).await.unwrap_or_else(|e| {
                warn!("Lifetime downloads for {} failed: {}", package, e);
                0
            });

            let mut row = match &series {
                Some(series) => ComparisonRow::new(package.clone(), series, lifetime),
                None => ComparisonRow::without_downloads(package.clone(), lifetime),
            };
            if paired {
                let repo = &repositories[i];
                match self.repository_stats(repo).await {
                    Some(stats) => {
                        let meta = &stats.snapshot.metadata;
                        row.repository = Some(RepositoryCounts {
                            stars: meta.stargazers_count,
                            forks: meta.forks_count,
                            open_issues: meta.open_issues_count,
                        });
                    }
                    None => report
                        .errors
                        .push(format!("No GitHub data found for {repo}")),
                }
            }

            report.rows.push(row);
            if let Some(series) = series {
                report.series.push((package.clone(), series));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GitHubSettings, WarehouseSettings};
    use crate::http::RetryPolicy;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> Settings {
        Settings {
            warehouse: WarehouseSettings {
                project_id: Some("analytics".to_string()),
                access_token: Some("tok".to_string()),
                api_url: server.uri(),
                ..WarehouseSettings::default()
            },
            github: GitHubSettings {
                token: None,
                api_url: server.uri(),
                max_star_pages: 10,
            },
            stats_api_url: server.uri(),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
            ..Settings::default()
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        )
        .unwrap()
    }

    fn request(repository: Option<&str>) -> StatsRequest {
        StatsRequest {
            package: "widget".to_string(),
            repository: repository.map(str::to_string),
            range: range(),
            granularity: Granularity::Daily,
        }
    }

    async fn mount_downloads(server: &MockServer, expect: u64) {
        Mock::given(method("POST"))
            .and(path("/projects/analytics/queries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "rows": [
                    {"f": [{"v": "2024-01-01"}, {"v": "10"}]},
                    {"f": [{"v": "2024-01-02"}, {"v": "20"}]},
                    {"f": [{"v": "2024-01-03"}, {"v": "15"}]}
                ],
                "jobReference": {"projectId": "analytics", "jobId": "job_1"}
            })))
            .expect(expect)
            .mount(server)
            .await;
    }

    async fn mount_lifetime(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/packages/widget/overall"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(json!({"data": [{"downloads": 500}]})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_report_combines_sources() {
        let server = MockServer::start().await;
        mount_downloads(&server, 1).await;
        mount_lifetime(&server, 200).await;

        let dashboard = Dashboard::new(&settings(&server)).unwrap();
        let report = dashboard.report(&request(None)).await;

        assert!(!report.has_errors());
        assert_eq!(report.lifetime_downloads, 500);
        let metrics = report.download_metrics.unwrap();
        assert_eq!(metrics.daily_change, -5);
        assert_eq!(metrics.peak, 20);
        assert_eq!(metrics.peak_change, -5);
    }

    #[tokio::test]
    async fn test_repeated_report_hits_cache() {
        let server = MockServer::start().await;
        mount_downloads(&server, 1).await;
        mount_lifetime(&server, 200).await;

        let dashboard = Dashboard::new(&settings(&server)).unwrap();
        dashboard.report(&request(None)).await;
        let report = dashboard.report(&request(None)).await;
        assert_eq!(report.downloads.map(|d| d.len()), Some(3));
    }

    #[tokio::test]
    async fn test_lifetime_failure_defaults_to_zero() {
        let server = MockServer::start().await;
        mount_downloads(&server, 1).await;
        mount_lifetime(&server, 404).await;

        let dashboard = Dashboard::new(&settings(&server)).unwrap();
        let report = dashboard.report(&request(None)).await;

        assert_eq!(report.lifetime_downloads, 0);
        assert!(report.download_metrics.is_some());
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/analytics/queries"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Syntax error"}
            })))
            .mount(&server)
            .await;
        mount_lifetime(&server, 200).await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dashboard = Dashboard::new(&settings(&server)).unwrap();
        let report = dashboard.report(&request(Some("acme/widget"))).await;

        assert_eq!(report.lifetime_downloads, 500);
        assert!(report.download_metrics.is_none());
        assert!(report.repository_stats.is_none());
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("Syntax error"));
    }

    #[tokio::test]
    async fn test_missing_warehouse_credentials_only_affect_downloads() {
        let server = MockServer::start().await;
        mount_lifetime(&server, 200).await;

        let mut settings = settings(&server);
        settings.warehouse.access_token = None;
        let dashboard = Dashboard::new(&settings).unwrap();
        let report = dashboard.report(&request(None)).await;

        assert_eq!(report.lifetime_downloads, 500);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("credentials"));
    }

    #[tokio::test]
    async fn test_compare_without_repositories() {
        let server = MockServer::start().await;
        mount_downloads(&server, 1).await;
        mount_lifetime(&server, 200).await;

        let dashboard = Dashboard::new(&settings(&server)).unwrap();
        let report = dashboard
            .compare(
                &["widget".to_string()],
                &["a/b".to_string(), "c/d".to_string()],
                range(),
                Granularity::Daily,
            )
            .await;

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.range_total, Some(45));
        assert_eq!(row.peak, Some(20));
        assert_eq!(row.lifetime_downloads, 500);
        assert_eq!(row.repository, None);
        assert_eq!(report.series[0].1.len(), 3);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_keeps_row_when_downloads_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/analytics/queries"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"code": 500, "message": "Backend error"}
            })))
            .mount(&server)
            .await;
        mount_lifetime(&server, 200).await;

        let dashboard = Dashboard::new(&settings(&server)).unwrap();
        let report = dashboard
            .compare(&["widget".to_string()], &[], range(), Granularity::Daily)
            .await;

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.package, "widget");
        assert_eq!(row.lifetime_downloads, 500);
        assert_eq!(row.range_total, None);
        assert_eq!(row.peak, None);
        assert!(report.series.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Backend error"));
    }
}
